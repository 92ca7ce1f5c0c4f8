//! Inbound frame routing.
//!
//! [`classify`] is a pure function of the frame and the active chat;
//! [`MessageRouter::dispatch`] reads the active chat at the moment a frame is
//! processed and applies the decision to the view and the chat list.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use parley_shared::{ChatId, InboundFrame, MessageRecord, UserId};

use crate::chat_list::ChatListSynchronizer;
use crate::session::Session;
use crate::view::MessageListView;

/// How many of our own published messages are remembered while waiting for
/// the server to echo them back.
const ECHO_LEDGER_CAPACITY: usize = 64;

/// What should happen to one inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    /// For the active chat.
    Append(MessageRecord),
    /// For some other chat. The view is untouched but the chat list must
    /// still be refreshed.
    IgnoreForView { chat_id: ChatId },
    DropMalformed { raw: String },
    /// Liveness traffic, owned by the connection manager.
    Heartbeat,
}

impl Route {
    /// Whether the chat list must be refreshed for this frame.
    pub fn refreshes_chat_list(&self) -> bool {
        matches!(self, Route::Append(_) | Route::IgnoreForView { .. })
    }
}

/// Decide where `frame` goes given the chat the user is looking at now.
pub fn classify(frame: InboundFrame, active_chat: Option<&ChatId>) -> Route {
    match frame {
        InboundFrame::Heartbeat(..) => Route::Heartbeat,
        InboundFrame::Malformed { raw } => Route::DropMalformed { raw },
        InboundFrame::AppMessage(msg) => {
            if active_chat == Some(&msg.chat_id) {
                Route::Append(MessageRecord::from(msg))
            } else {
                Route::IgnoreForView {
                    chat_id: msg.chat_id,
                }
            }
        }
    }
}

/// Messages this client published and expects to see echoed back.
///
/// An echo is consumed at most once, so a second, genuinely new message
/// with the same text still gets through.
#[derive(Debug, Clone, Default)]
pub struct EchoLedger {
    pending: Arc<Mutex<VecDeque<(ChatId, String)>>>,
}

impl EchoLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expect(&self, chat_id: &ChatId, content: &str) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if pending.len() == ECHO_LEDGER_CAPACITY {
            pending.pop_front();
        }
        pending.push_back((chat_id.clone(), content.to_string()));
    }

    /// Forget an expectation whose publish never went out.
    pub fn cancel(&self, chat_id: &ChatId, content: &str) {
        self.take(chat_id, content);
    }

    /// If `record` is the echo of one of our messages, consume the
    /// expectation and return `true`.
    pub fn consume(&self, own_id: &UserId, record: &MessageRecord) -> bool {
        if &record.sender_id != own_id {
            return false;
        }
        match record.chat_id.as_ref() {
            Some(chat_id) => self.take(chat_id, &record.content),
            None => false,
        }
    }

    fn take(&self, chat_id: &ChatId, content: &str) -> bool {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        match pending
            .iter()
            .position(|(c, text)| c == chat_id && text == content)
        {
            Some(index) => {
                pending.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
pub struct MessageRouter {
    session: Session,
    view: MessageListView,
    chat_list: ChatListSynchronizer,
    echoes: EchoLedger,
}

impl MessageRouter {
    pub fn new(
        session: Session,
        view: MessageListView,
        chat_list: ChatListSynchronizer,
        echoes: EchoLedger,
    ) -> Self {
        Self {
            session,
            view,
            chat_list,
            echoes,
        }
    }

    /// Route one raw frame. Frames must be dispatched in arrival order.
    pub fn dispatch(&self, raw: &str) -> Route {
        let active = self.session.active_chat();
        let route = classify(InboundFrame::decode(raw), active.as_ref());

        match &route {
            Route::Append(record) => {
                if self.echoes.consume(self.session.user_id(), record) {
                    debug!(chat = ?record.chat_id, "Own message echoed back, already shown");
                } else if !self.view.append_inbound(record.clone()) {
                    debug!(
                        chat = ?record.chat_id,
                        "View not ready for this chat, relying on history fetch"
                    );
                }
            }
            Route::IgnoreForView { chat_id } => {
                debug!(chat = %chat_id, active = ?active, "Message for another chat");
            }
            Route::DropMalformed { raw } => {
                warn!(len = raw.len(), "Dropping malformed frame");
            }
            Route::Heartbeat => {
                debug!("Heartbeat frame reached the router, ignoring");
            }
        }

        if route.refreshes_chat_list() {
            self.chat_list.request_refresh();
        }
        route
    }
}
