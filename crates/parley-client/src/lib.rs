//! Client-side synchronization core for Parley chats.
//!
//! [`ChatClient`] ties together the push channel from `parley-net`, the chat
//! directory, message store and users services, and the state a presentation
//! layer renders: the active chat's message list, the chat list and the
//! input buffer.

pub mod chat_list;
pub mod client;
pub mod collaborators;
pub mod config;
pub mod notices;
pub mod router;
pub mod send;
pub mod session;
pub mod view;

mod error;
mod history;

use tracing_subscriber::{fmt, EnvFilter};

pub use chat_list::{ChatListSnapshot, ChatListSynchronizer};
pub use client::{ChatClient, ConnectivityStatus};
pub use collaborators::{
    ChatDirectory, HttpChatDirectory, HttpMessageStore, HttpUserDirectory, MessageStore,
    NewChat, UserDirectory,
};
pub use config::ClientConfig;
pub use error::{ClientError, Result};
pub use notices::{Notice, Notices};
pub use router::{classify, EchoLedger, MessageRouter, Route};
pub use send::{RejectReason, SendCoordinator, SendOutcome};
pub use session::Session;
pub use view::{HistoryInstall, InputBuffer, MessageListView, ViewEntry};

/// Install the default log subscriber. `RUST_LOG` overrides the filter.
/// Does nothing if a subscriber is already installed.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("parley_client=debug,parley_net=debug,warn"));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}
