//! Request/response collaborators: the chat listing, message history and
//! users directory services.
//!
//! The core only talks to them through [`ChatDirectory`], [`MessageStore`]
//! and [`UserDirectory`], so tests can substitute in-memory fakes. The
//! reqwest implementations accept both the wrapped payloads the services
//! return (`{"chats": [...]}`, `{"data": {...}}`) and bare ones.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

use parley_shared::{ChatId, ChatSummary, MessageRecord, OutboundMessage, UserId, UserProfile};

use crate::error::{ClientError, Result};

/// Body of a create-chat request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewChat {
    pub creator_id: UserId,
    pub participant_ids: Vec<UserId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[async_trait]
pub trait ChatDirectory: Send + Sync + 'static {
    /// All chats `user_id` takes part in, in display order.
    async fn list_chats(&self, user_id: &UserId) -> Result<Vec<ChatSummary>>;

    async fn create_chat(&self, request: &NewChat) -> Result<ChatId>;
}

#[async_trait]
pub trait MessageStore: Send + Sync + 'static {
    /// Messages of `chat_id` in server arrival order.
    async fn history(&self, chat_id: &ChatId) -> Result<Vec<MessageRecord>>;

    /// Store a message; returns the stored record.
    async fn post_message(&self, message: &OutboundMessage) -> Result<MessageRecord>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync + 'static {
    /// Every registered user, for participant pickers and sender names.
    async fn list_users(&self) -> Result<Vec<UserProfile>>;
}

const CHATS_SERVICE: &str = "chats";
const MESSAGES_SERVICE: &str = "messages";
const USERS_SERVICE: &str = "users";

#[derive(Debug, Clone)]
pub struct HttpChatDirectory {
    client: reqwest::Client,
    base: Url,
}

impl HttpChatDirectory {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            base: parse_base(base_url)?,
        })
    }
}

#[async_trait]
impl ChatDirectory for HttpChatDirectory {
    async fn list_chats(&self, user_id: &UserId) -> Result<Vec<ChatSummary>> {
        let url = endpoint(&self.base, &["users", user_id.as_str(), "chats"]);
        debug!(url = %url, "Fetching chat list");
        let response = self.client.get(url).send().await?;
        let body = read_json(CHATS_SERVICE, response).await?;
        unwrap_payload(CHATS_SERVICE, body, &["chats"])
    }

    async fn create_chat(&self, request: &NewChat) -> Result<ChatId> {
        #[derive(serde::Deserialize)]
        struct Created {
            chat_id: ChatId,
        }

        let url = endpoint(&self.base, &["chats"]);
        let response = self.client.post(url).json(request).send().await?;
        let body = read_json(CHATS_SERVICE, response).await?;
        let created: Created = unwrap_payload(CHATS_SERVICE, body, &["chat"])?;
        Ok(created.chat_id)
    }
}

#[derive(Debug, Clone)]
pub struct HttpMessageStore {
    client: reqwest::Client,
    base: Url,
}

impl HttpMessageStore {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            base: parse_base(base_url)?,
        })
    }
}

#[derive(Serialize)]
struct PostMessageBody<'a> {
    sender_id: &'a UserId,
    chat_id: &'a ChatId,
    content: &'a str,
}

#[async_trait]
impl MessageStore for HttpMessageStore {
    async fn history(&self, chat_id: &ChatId) -> Result<Vec<MessageRecord>> {
        let url = endpoint(&self.base, &["chats", chat_id.as_str(), "messages"]);
        debug!(url = %url, "Fetching message history");
        let response = self.client.get(url).send().await?;
        let body = read_json(MESSAGES_SERVICE, response).await?;
        unwrap_payload(MESSAGES_SERVICE, body, &["messages"])
    }

    async fn post_message(&self, message: &OutboundMessage) -> Result<MessageRecord> {
        let url = endpoint(&self.base, &["messages"]);
        let body = PostMessageBody {
            sender_id: &message.sender_id,
            chat_id: &message.chat_id,
            content: &message.content,
        };
        let response = self.client.post(url).json(&body).send().await?;
        let body = read_json(MESSAGES_SERVICE, response).await?;
        unwrap_payload(MESSAGES_SERVICE, body, &["data"])
    }
}

#[derive(Debug, Clone)]
pub struct HttpUserDirectory {
    client: reqwest::Client,
    base: Url,
}

impl HttpUserDirectory {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout)?,
            base: parse_base(base_url)?,
        })
    }
}

#[async_trait]
impl UserDirectory for HttpUserDirectory {
    async fn list_users(&self) -> Result<Vec<UserProfile>> {
        let url = endpoint(&self.base, &["users"]);
        debug!(url = %url, "Fetching users directory");
        let response = self.client.get(url).send().await?;
        let body = read_json(USERS_SERVICE, response).await?;
        unwrap_payload(USERS_SERVICE, body, &["users", "data"])
    }
}

fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

fn parse_base(raw: &str) -> Result<Url> {
    let url = Url::parse(raw)?;
    if url.cannot_be_a_base() {
        return Err(ClientError::InvalidUrl(raw.to_string()));
    }
    Ok(url)
}

/// `base` with `segments` appended as escaped path segments.
fn endpoint(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}

/// Read a JSON body, turning error statuses into errors. A service's own
/// `{"error": "..."}` explanation wins over the bare status.
async fn read_json(service: &'static str, response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let text = response.text().await?;
    let body = serde_json::from_str::<Value>(&text);

    if !status.is_success() {
        let message = body
            .ok()
            .as_ref()
            .and_then(|b| b.get("error"))
            .and_then(Value::as_str)
            .map(str::to_string);
        return Err(match message {
            Some(message) => ClientError::Rejected(message),
            None => ClientError::Status {
                service,
                status: status.as_u16(),
            },
        });
    }

    body.map_err(|e| ClientError::Decode {
        service,
        reason: e.to_string(),
    })
}

/// Decode `body[key]` for the first of `keys` present, otherwise the whole
/// body.
fn unwrap_payload<T: DeserializeOwned>(
    service: &'static str,
    mut body: Value,
    keys: &[&str],
) -> Result<T> {
    if let Some(message) = body.get("error").and_then(Value::as_str) {
        return Err(ClientError::Rejected(message.to_string()));
    }
    let payload = match keys.iter().find(|key| body.get(**key).is_some()) {
        Some(key) => body[*key].take(),
        None => body,
    };
    serde_json::from_value(payload).map_err(|e| ClientError::Decode {
        service,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_endpoint_escapes_segments() {
        let base = parse_base("http://localhost:5002/api/").unwrap();
        let url = endpoint(&base, &["users", "a/b", "chats"]);
        assert_eq!(url.as_str(), "http://localhost:5002/api/users/a%2Fb/chats");

        let base = parse_base("http://localhost:5003").unwrap();
        assert_eq!(
            endpoint(&base, &["messages"]).as_str(),
            "http://localhost:5003/messages"
        );
    }

    #[test]
    fn test_rejects_non_base_url() {
        assert!(matches!(
            parse_base("mailto:someone@example.com"),
            Err(ClientError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_unwraps_wrapped_and_bare_lists() {
        let wrapped = json!({"chats": [{"chat_id": 42, "name": "Team", "last_message": "hi"}]});
        let chats: Vec<ChatSummary> = unwrap_payload("chats", wrapped, &["chats"]).unwrap();
        assert_eq!(chats[0].chat_id, ChatId::new("42"));
        assert_eq!(chats[0].last_message_preview.as_deref(), Some("hi"));

        let bare = json!([{"chat_id": "ab12cd34"}]);
        let chats: Vec<ChatSummary> = unwrap_payload("chats", bare, &["chats"]).unwrap();
        assert_eq!(chats[0].chat_id, ChatId::new("ab12cd34"));
        assert_eq!(chats[0].name, None);
    }

    #[test]
    fn test_decodes_stored_message() {
        let body = json!({
            "message": "stored",
            "data": {
                "message_id": 17,
                "sender_id": 3,
                "chat_id": 42,
                "content": "hola",
                "timestamp": "2024-05-01T10:00:00.123456"
            }
        });
        let record: MessageRecord = unwrap_payload("messages", body, &["data"]).unwrap();
        assert_eq!(record.id.unwrap().as_str(), "17");
        assert_eq!(record.chat_id, Some(ChatId::new("42")));
        assert_eq!(record.content, "hola");
    }

    #[test]
    fn test_error_body_is_rejection() {
        let body = json!({"error": "Chat no encontrado"});
        let result: Result<Vec<MessageRecord>> = unwrap_payload("messages", body, &["messages"]);
        assert!(matches!(result, Err(ClientError::Rejected(m)) if m == "Chat no encontrado"));
    }

    #[test]
    fn test_malformed_payload_is_decode_error() {
        let body = json!({"messages": [{"content": "no sender"}]});
        let result: Result<Vec<MessageRecord>> = unwrap_payload("messages", body, &["messages"]);
        assert!(matches!(result, Err(ClientError::Decode { service: "messages", .. })));
    }

    #[test]
    fn test_users_directory_payload_shapes() {
        let shapes = [
            json!([{"id": 1, "first_name": "Ana", "last_name": "Ruiz"}]),
            json!({"users": [{"id": 1, "first_name": "Ana", "last_name": "Ruiz"}]}),
            json!({"data": [{"user_id": "1", "first_name": "Ana", "last_name": "Ruiz"}]}),
        ];
        for body in shapes {
            let users: Vec<UserProfile> =
                unwrap_payload("users", body, &["users", "data"]).unwrap();
            assert_eq!(users.len(), 1);
            assert_eq!(users[0].id, UserId::new("1"));
            assert_eq!(users[0].display_name(), "Ana Ruiz");
        }
    }

    #[test]
    fn test_new_chat_body() {
        let request = NewChat {
            creator_id: UserId::new("3"),
            participant_ids: vec![UserId::new("4"), UserId::new("5")],
            name: None,
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"creator_id": 3, "participant_ids": [4, 5]})
        );
    }
}
