//! # parley-shared
//!
//! Types shared by the Parley synchronization core: canonical identifiers,
//! the push-channel frame codec and the records exchanged with the chat
//! listing and message history services.

pub mod constants;
pub mod models;
pub mod protocol;
pub mod types;

mod error;

pub use error::ProtocolError;
pub use models::{fallback_name, ChatSummary, MessageRecord, OutboundMessage, UserProfile};
pub use protocol::{AppMessage, InboundFrame, Liveness};
pub use types::{ChatId, LocalId, MessageId, UserId};
