//! Transient, non-blocking notices for the presentation layer.

use tokio::sync::broadcast;

use parley_shared::ChatId;

/// How many notices a slow listener may fall behind before losing the oldest.
pub const NOTICE_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// The store refused or never received a message. `draft` is what the
    /// user typed.
    SendFailed {
        chat_id: ChatId,
        draft: String,
        reason: String,
    },
    ChatCreationFailed { reason: String },
    /// The channel dropped; automatic reconnection is under way.
    ConnectionLost,
    /// Automatic reconnection gave up. A manual retry is possible.
    ConnectionAbandoned,
}

#[derive(Debug, Clone)]
pub struct Notices {
    tx: broadcast::Sender<Notice>,
}

impl Notices {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(NOTICE_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.tx.subscribe()
    }

    pub fn post(&self, notice: Notice) {
        if self.tx.send(notice).is_err() {
            tracing::debug!("Notice dropped, nobody is listening");
        }
    }
}

impl Default for Notices {
    fn default() -> Self {
        Self::new()
    }
}
