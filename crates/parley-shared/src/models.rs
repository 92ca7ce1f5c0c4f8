//! Records exchanged with the chat listing and message history services.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::protocol::AppMessage;
use crate::types::{ChatId, LocalId, MessageId, UserId};

/// One row of the conversation list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSummary {
    pub chat_id: ChatId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "last_message", alias = "last_message_preview")]
    pub last_message_preview: Option<String>,
}

/// An entry of the users directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(alias = "user_id")]
    pub id: UserId,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

impl UserProfile {
    /// "First Last", or a placeholder built from the id when the directory
    /// has no name for this user.
    pub fn display_name(&self) -> String {
        let parts: Vec<&str> = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect();
        if parts.is_empty() {
            fallback_name(&self.id)
        } else {
            parts.join(" ")
        }
    }
}

/// Name shown for a sender the users directory does not know.
pub fn fallback_name(user_id: &UserId) -> String {
    format!("User {user_id}")
}

/// A message as stored by the message history service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    #[serde(default, alias = "message_id")]
    pub id: Option<MessageId>,
    #[serde(default)]
    pub chat_id: Option<ChatId>,
    pub sender_id: UserId,
    pub content: String,
    #[serde(default = "Utc::now", with = "lenient_timestamp")]
    pub timestamp: DateTime<Utc>,
}

impl From<AppMessage> for MessageRecord {
    fn from(msg: AppMessage) -> Self {
        Self {
            id: None,
            chat_id: Some(msg.chat_id),
            sender_id: msg.sender_id,
            content: msg.content,
            timestamp: msg.timestamp,
        }
    }
}

/// A message composed locally and not yet confirmed by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub local_id: LocalId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl OutboundMessage {
    pub fn new(chat_id: ChatId, sender_id: UserId, content: String) -> Self {
        Self {
            local_id: LocalId::new(),
            chat_id,
            sender_id,
            content,
            created_at: Utc::now(),
        }
    }

    /// The record shown in the view while the send is in flight.
    pub fn to_record(&self) -> MessageRecord {
        MessageRecord {
            id: None,
            chat_id: Some(self.chat_id.clone()),
            sender_id: self.sender_id.clone(),
            content: self.content.clone(),
            timestamp: self.created_at,
        }
    }

    /// The frame republished on the push channel once the store accepted it.
    pub fn to_app_message(&self) -> AppMessage {
        AppMessage {
            chat_id: self.chat_id.clone(),
            sender_id: self.sender_id.clone(),
            content: self.content.clone(),
            timestamp: self.created_at,
        }
    }
}

/// Timestamps arrive as RFC 3339 from browsers, as naive ISO 8601 from the
/// Python services and occasionally as epoch milliseconds. Naive values are
/// taken to be UTC.
pub mod lenient_timestamp {
    use super::*;
    use serde::de::Error as _;
    use serde::{Deserializer, Serializer};

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        let raw = raw.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
            .map(|naive| Utc.from_utc_datetime(&naive))
    }

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&ts.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        match &value {
            serde_json::Value::String(s) => {
                parse(s).ok_or_else(|| D::Error::custom(format!("unrecognised timestamp {s:?}")))
            }
            serde_json::Value::Number(n) => n
                .as_i64()
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
                .ok_or_else(|| D::Error::custom(format!("timestamp out of range: {n}"))),
            other => Err(D::Error::custom(format!("unexpected timestamp {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_chat_summary_from_listing_service() {
        let json = r#"{"chat_id": "a1b2c3d4", "name": null, "last_message": "hola", "is_active": true}"#;
        let summary: ChatSummary = serde_json::from_str(json).unwrap();
        assert_eq!(summary.chat_id, ChatId::new("a1b2c3d4"));
        assert_eq!(summary.name, None);
        assert_eq!(summary.last_message_preview.as_deref(), Some("hola"));
    }

    #[test]
    fn test_message_record_accepts_naive_python_timestamp() {
        let json = r#"{"message_id": 9, "chat_id": 42, "sender_id": "3", "content": "hola",
                       "timestamp": "2024-05-01T10:20:30.123456"}"#;
        let record: MessageRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.id, Some(MessageId::new("9")));
        assert_eq!(record.chat_id, Some(ChatId::new("42")));
        assert_eq!(record.sender_id, UserId::from(3_i64));
        assert_eq!(record.timestamp.hour(), 10);
    }

    #[test]
    fn test_message_record_accepts_epoch_millis() {
        let json = r#"{"sender_id": 1, "content": "x", "timestamp": 1700000000000}"#;
        let record: MessageRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.timestamp.timestamp(), 1_700_000_000);
        assert_eq!(record.id, None);
    }

    #[test]
    fn test_user_profile_accepts_either_id_key() {
        let by_id: UserProfile =
            serde_json::from_str(r#"{"id": 3, "first_name": "Ana", "last_name": "Ruiz"}"#)
                .unwrap();
        let by_user_id: UserProfile =
            serde_json::from_str(r#"{"user_id": "3", "first_name": "Ana"}"#).unwrap();
        assert_eq!(by_id.id, by_user_id.id);
        assert_eq!(by_id.display_name(), "Ana Ruiz");
        assert_eq!(by_user_id.display_name(), "Ana");
    }

    #[test]
    fn test_nameless_user_falls_back_to_id() {
        let profile: UserProfile =
            serde_json::from_str(r#"{"id": 8, "first_name": " ", "email": "x@y.z"}"#).unwrap();
        assert_eq!(profile.display_name(), "User 8");
    }

    #[test]
    fn test_outbound_message_record_has_no_server_id() {
        let out = OutboundMessage::new(ChatId::new("42"), UserId::new("1"), "hola".into());
        let record = out.to_record();
        assert!(record.id.is_none());
        assert_eq!(record.content, "hola");
        assert_eq!(out.to_app_message().chat_id, ChatId::new("42"));
    }
}
