//! Optimistic send and reconciliation.

use std::sync::Arc;

use tracing::{debug, info, warn};

use parley_net::ConnectionManager;
use parley_shared::protocol::encode_app_message;
use parley_shared::{LocalId, OutboundMessage};

use crate::collaborators::MessageStore;
use crate::history::HistoryLoader;
use crate::notices::{Notice, Notices};
use crate::router::EchoLedger;
use crate::session::Session;
use crate::view::{InputBuffer, MessageListView};

/// Why a send never reached the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    EmptyContent,
    NoActiveChat,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Rejected(RejectReason),
    /// Stored, and the view was replaced by the authoritative history (or
    /// the user had already moved to another chat).
    Delivered { local_id: LocalId },
    /// Stored, but the history refetch failed; the optimistic entry stays,
    /// carrying the server id when the store returned one.
    DeliveredUnreconciled { local_id: LocalId },
    /// The store did not accept the message. The optimistic entry is gone.
    Failed { draft_restored: bool },
}

#[derive(Clone)]
pub struct SendCoordinator {
    session: Session,
    view: MessageListView,
    input: InputBuffer,
    store: Arc<dyn MessageStore>,
    history: HistoryLoader,
    connection: ConnectionManager,
    echoes: EchoLedger,
    notices: Notices,
}

impl SendCoordinator {
    pub fn new(
        session: Session,
        view: MessageListView,
        input: InputBuffer,
        store: Arc<dyn MessageStore>,
        connection: ConnectionManager,
        echoes: EchoLedger,
        notices: Notices,
    ) -> Self {
        let history = HistoryLoader::new(session.clone(), view.clone(), Arc::clone(&store));
        Self {
            session,
            view,
            input,
            store,
            history,
            connection,
            echoes,
            notices,
        }
    }

    /// Blank content is refused, but anything else is sent and restored on
    /// failure exactly as typed.
    pub async fn send(&self, content: &str) -> SendOutcome {
        if content.trim().is_empty() {
            return SendOutcome::Rejected(RejectReason::EmptyContent);
        }
        let Some(chat_id) = self.session.active_chat() else {
            return SendOutcome::Rejected(RejectReason::NoActiveChat);
        };

        let message = OutboundMessage::new(
            chat_id.clone(),
            self.session.user_id().clone(),
            content.to_string(),
        );
        let local_id = message.local_id;
        if !self.view.append_optimistic(&message) {
            debug!(chat = %chat_id, "View not showing target chat, no optimistic entry");
        }
        self.input.clear();

        let stored = match self.store.post_message(&message).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!(chat = %chat_id, error = %e, "Message store rejected send");
                self.view.rollback(local_id);
                let draft_restored = self.input.restore(content);
                self.notices.post(Notice::SendFailed {
                    chat_id,
                    draft: content.to_string(),
                    reason: e.to_string(),
                });
                return SendOutcome::Failed { draft_restored };
            }
        };
        info!(chat = %chat_id, local = %local_id, "Message stored");

        self.publish(&message).await;

        match self.history.load(&chat_id).await {
            Ok(true) => {
                debug!(chat = %chat_id, "View reconciled with history");
                SendOutcome::Delivered { local_id }
            }
            Ok(false) => {
                debug!(chat = %chat_id, "Active chat changed, discarding reconciliation");
                SendOutcome::Delivered { local_id }
            }
            Err(e) => {
                warn!(chat = %chat_id, error = %e, "History refetch failed after send");
                if let Some(id) = stored.id {
                    self.view.attach_server_id(local_id, id);
                }
                SendOutcome::DeliveredUnreconciled { local_id }
            }
        }
    }

    /// Best-effort republish for other participants. The store write already
    /// succeeded, so nothing here is rolled back.
    async fn publish(&self, message: &OutboundMessage) {
        if !self.connection.state().is_open() {
            debug!(chat = %message.chat_id, "Channel not open, skipping publish");
            return;
        }
        let frame = match encode_app_message(&message.to_app_message()) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Could not encode outbound frame");
                return;
            }
        };

        self.echoes.expect(&message.chat_id, &message.content);
        if let Err(e) = self.connection.publish(frame).await {
            warn!(
                chat = %message.chat_id,
                error = %e,
                "Publish failed, others will see the message on refresh"
            );
            self.echoes.cancel(&message.chat_id, &message.content);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use parley_net::memory::MemoryConnector;
    use parley_net::ConnectionConfig;
    use parley_shared::{ChatId, MessageId, MessageRecord, UserId};

    use crate::error::{ClientError, Result};

    #[derive(Default)]
    struct FakeStore {
        stored: Mutex<Vec<MessageRecord>>,
        fail_post: AtomicBool,
        fail_history: AtomicBool,
    }

    #[async_trait]
    impl MessageStore for FakeStore {
        async fn history(&self, chat_id: &ChatId) -> Result<Vec<MessageRecord>> {
            if self.fail_history.load(Ordering::SeqCst) {
                return Err(ClientError::Status {
                    service: "messages",
                    status: 502,
                });
            }
            let stored = self.stored.lock().unwrap();
            Ok(stored
                .iter()
                .filter(|r| r.chat_id.as_ref() == Some(chat_id))
                .cloned()
                .collect())
        }

        async fn post_message(&self, message: &OutboundMessage) -> Result<MessageRecord> {
            if self.fail_post.load(Ordering::SeqCst) {
                return Err(ClientError::Rejected("Usuario no pertenece al chat".into()));
            }
            let mut stored = self.stored.lock().unwrap();
            let mut record = message.to_record();
            record.id = Some(MessageId::from(stored.len() as i64 + 1));
            stored.push(record.clone());
            Ok(record)
        }
    }

    struct Harness {
        session: Session,
        view: MessageListView,
        input: InputBuffer,
        store: Arc<FakeStore>,
        notices: Notices,
        coordinator: SendCoordinator,
    }

    fn harness() -> Harness {
        let session = Session::new(UserId::new("3"));
        let view = MessageListView::new();
        let input = InputBuffer::new();
        let store = Arc::new(FakeStore::default());
        let notices = Notices::new();
        let (connector, _server) = MemoryConnector::new();
        let connection = ConnectionManager::spawn(connector, ConnectionConfig::default());
        let coordinator = SendCoordinator::new(
            session.clone(),
            view.clone(),
            input.clone(),
            store.clone(),
            connection,
            EchoLedger::new(),
            notices.clone(),
        );
        Harness {
            session,
            view,
            input,
            store,
            notices,
            coordinator,
        }
    }

    fn open_chat(h: &Harness, chat: &str) {
        h.session.set_active(Some(ChatId::new(chat)));
        h.view.reset(Some(ChatId::new(chat)));
    }

    #[tokio::test]
    async fn test_rejects_blank_content_and_missing_chat() {
        let h = harness();
        assert_eq!(
            h.coordinator.send("hola").await,
            SendOutcome::Rejected(RejectReason::NoActiveChat)
        );
        open_chat(&h, "42");
        assert_eq!(
            h.coordinator.send("   ").await,
            SendOutcome::Rejected(RejectReason::EmptyContent)
        );
        assert!(h.store.stored.lock().unwrap().is_empty());
        assert!(h.view.is_empty());
    }

    #[tokio::test]
    async fn test_success_replaces_optimistic_entry() {
        let h = harness();
        open_chat(&h, "42");
        h.input.set("hola");

        let outcome = h.coordinator.send(&h.input.get()).await;
        assert!(matches!(outcome, SendOutcome::Delivered { .. }));
        assert_eq!(h.input.get(), "");

        let entries = h.view.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].record.content, "hola");
        assert_eq!(entries[0].local_id, None);
        assert!(entries[0].record.id.is_some());
    }

    #[tokio::test]
    async fn test_failure_rolls_back_and_restores_draft() {
        let h = harness();
        open_chat(&h, "42");
        let mut notices = h.notices.subscribe();
        h.store.fail_post.store(true, Ordering::SeqCst);
        h.input.set("hola");

        let outcome = h.coordinator.send(&h.input.get()).await;
        assert_eq!(outcome, SendOutcome::Failed { draft_restored: true });
        assert!(h.view.is_empty());
        assert_eq!(h.input.get(), "hola");
        assert!(matches!(
            notices.try_recv(),
            Ok(Notice::SendFailed { draft, .. }) if draft == "hola"
        ));
    }

    #[tokio::test]
    async fn test_failure_restores_untrimmed_draft() {
        let h = harness();
        open_chat(&h, "42");
        let mut notices = h.notices.subscribe();
        h.store.fail_post.store(true, Ordering::SeqCst);
        h.input.set("  hola  ");

        let outcome = h.coordinator.send(&h.input.get()).await;
        assert_eq!(outcome, SendOutcome::Failed { draft_restored: true });
        assert_eq!(h.input.get(), "  hola  ");
        assert!(matches!(
            notices.try_recv(),
            Ok(Notice::SendFailed { draft, .. }) if draft == "  hola  "
        ));
    }

    #[tokio::test]
    async fn test_failed_refetch_keeps_entry_with_server_id() {
        let h = harness();
        open_chat(&h, "42");
        h.store.fail_history.store(true, Ordering::SeqCst);

        let outcome = h.coordinator.send("hola").await;
        let SendOutcome::DeliveredUnreconciled { local_id } = outcome else {
            panic!("unexpected outcome {outcome:?}");
        };
        let entries = h.view.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].local_id, Some(local_id));
        assert_eq!(entries[0].record.id, Some(MessageId::from(1_i64)));
    }
}
