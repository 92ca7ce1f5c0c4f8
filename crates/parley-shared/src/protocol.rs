//! Push channel frame codec.
//!
//! Frames are single-line text payloads. A frame is either a liveness token
//! (the bare `ping`/`pong` literals or a JSON object whose `type` is `ping`
//! or `pong`) or a JSON-encoded [`AppMessage`]. Anything else is malformed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::{PING_TOKEN, PING_TYPE, PONG_TOKEN, PONG_TYPE};
use crate::error::ProtocolError;
use crate::models::lenient_timestamp;
use crate::types::{ChatId, UserId};

/// An application message carried on the push channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppMessage {
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub content: String,
    #[serde(default = "Utc::now", with = "lenient_timestamp")]
    pub timestamp: DateTime<Utc>,
}

/// Direction of a liveness frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Ping,
    Pong,
}

/// How a liveness frame was encoded, so a reply can match it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessForm {
    Literal,
    Json,
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Heartbeat(Liveness, LivenessForm),
    AppMessage(AppMessage),
    Malformed { raw: String },
}

impl InboundFrame {
    /// Decode a raw payload. Never fails: undecodable input becomes
    /// [`InboundFrame::Malformed`].
    pub fn decode(raw: &str) -> Self {
        Self::parse(raw).unwrap_or_else(|_| InboundFrame::Malformed {
            raw: raw.to_string(),
        })
    }

    /// Decode a raw payload, keeping the reason it was rejected.
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ProtocolError::Empty);
        }
        if trimmed.eq_ignore_ascii_case(PING_TOKEN) {
            return Ok(Self::Heartbeat(Liveness::Ping, LivenessForm::Literal));
        }
        if trimmed.eq_ignore_ascii_case(PONG_TOKEN) {
            return Ok(Self::Heartbeat(Liveness::Pong, LivenessForm::Literal));
        }

        let value: Value = serde_json::from_str(trimmed)?;
        match value.get("type").and_then(Value::as_str) {
            Some(PING_TYPE) => return Ok(Self::Heartbeat(Liveness::Ping, LivenessForm::Json)),
            Some(PONG_TYPE) => return Ok(Self::Heartbeat(Liveness::Pong, LivenessForm::Json)),
            _ => {}
        }
        Ok(Self::AppMessage(serde_json::from_value(value)?))
    }

    pub fn is_heartbeat(&self) -> bool {
        matches!(self, Self::Heartbeat(..))
    }
}

/// Encode an application message as a single-line frame.
pub fn encode_app_message(msg: &AppMessage) -> Result<String, ProtocolError> {
    let text = serde_json::to_string(msg)?;
    ensure_single_line(&text)?;
    Ok(text)
}

/// The reply owed to a remote liveness probe, in the probe's own encoding.
pub fn pong_for(form: LivenessForm, now: DateTime<Utc>) -> String {
    match form {
        LivenessForm::Literal => PONG_TOKEN.to_string(),
        LivenessForm::Json => serde_json::json!({
            "type": PONG_TYPE,
            "timestamp": now.timestamp_millis(),
        })
        .to_string(),
    }
}

/// Reject payloads that would break the newline-free framing.
pub fn ensure_single_line(text: &str) -> Result<(), ProtocolError> {
    if text.contains(['\n', '\r']) {
        return Err(ProtocolError::LineBreak);
    }
    Ok(())
}
