//! Loading a chat's stored history into the view.

use std::sync::Arc;

use tracing::debug;

use parley_shared::ChatId;

use crate::collaborators::MessageStore;
use crate::error::Result;
use crate::session::Session;
use crate::view::{HistoryInstall, MessageListView};

/// Fetches tried before live frames that keep arriving are merged onto the
/// last fetch instead.
const MAX_HISTORY_FETCHES: usize = 3;

/// Installs a chat's history, unless the user has moved on by the time it
/// arrives. A fetch that raced with inbound frames is retried so the frames
/// are not overwritten by an older snapshot.
#[derive(Clone)]
pub(crate) struct HistoryLoader {
    session: Session,
    view: MessageListView,
    store: Arc<dyn MessageStore>,
}

impl HistoryLoader {
    pub(crate) fn new(
        session: Session,
        view: MessageListView,
        store: Arc<dyn MessageStore>,
    ) -> Self {
        Self {
            session,
            view,
            store,
        }
    }

    pub(crate) fn session(&self) -> &Session {
        &self.session
    }

    /// Returns whether a history was installed.
    pub(crate) async fn load(&self, chat_id: &ChatId) -> Result<bool> {
        let mut attempt = 1;
        loop {
            let mark = self.view.inbound_mark();
            let records = self.store.history(chat_id).await?;
            if !self.session.is_active(chat_id) {
                debug!(chat = %chat_id, "Discarding history for a chat no longer active");
                return Ok(false);
            }
            let count = records.len();

            if attempt == MAX_HISTORY_FETCHES {
                let installed = self
                    .view
                    .install_history_keeping_late(chat_id, records, mark);
                if installed {
                    debug!(chat = %chat_id, count, "History installed with late frames");
                }
                return Ok(installed);
            }

            match self.view.install_history(chat_id, records, mark) {
                HistoryInstall::Installed => {
                    debug!(chat = %chat_id, count, "History installed");
                    return Ok(true);
                }
                HistoryInstall::WrongChat => return Ok(false),
                HistoryInstall::Outdated => {
                    debug!(
                        chat = %chat_id,
                        attempt,
                        "Frames arrived during history fetch, refetching"
                    );
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use parley_shared::{MessageId, MessageRecord, OutboundMessage, UserId};

    /// Appends a live frame to the view during each of the first
    /// `interrupted` fetches, as the router would.
    struct RacingStore {
        view: MessageListView,
        stored: Mutex<Vec<MessageRecord>>,
        interrupted: usize,
        calls: AtomicUsize,
    }

    fn record(chat: &str, id: i64, content: &str) -> MessageRecord {
        let message = OutboundMessage::new(ChatId::new(chat), UserId::new("8"), content.into());
        let mut record = message.to_record();
        record.id = Some(MessageId::from(id));
        record
    }

    #[async_trait]
    impl MessageStore for RacingStore {
        async fn history(&self, _chat_id: &ChatId) -> Result<Vec<MessageRecord>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let snapshot = self.stored.lock().unwrap().clone();
            if call <= self.interrupted {
                let live = record("42", 100 + call as i64, &format!("live {call}"));
                self.stored.lock().unwrap().push(live.clone());
                self.view.append_inbound(live);
            }
            Ok(snapshot)
        }

        async fn post_message(&self, message: &OutboundMessage) -> Result<MessageRecord> {
            Ok(message.to_record())
        }
    }

    fn loader(interrupted: usize) -> (HistoryLoader, Arc<RacingStore>, MessageListView) {
        let session = Session::new(UserId::new("3"));
        let view = MessageListView::new();
        session.set_active(Some(ChatId::new("42")));
        view.reset(Some(ChatId::new("42")));
        let store = Arc::new(RacingStore {
            view: view.clone(),
            stored: Mutex::new(vec![record("42", 1, "earlier")]),
            interrupted,
            calls: AtomicUsize::new(0),
        });
        let loader = HistoryLoader::new(session, view.clone(), store.clone());
        (loader, store, view)
    }

    #[tokio::test]
    async fn test_quiet_fetch_installs_at_once() {
        let (loader, store, view) = loader(0);
        assert!(loader.load(&ChatId::new("42")).await.unwrap());
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
        assert_eq!(view.contents(), vec!["earlier"]);
    }

    #[tokio::test]
    async fn test_frame_during_fetch_triggers_refetch() {
        let (loader, store, view) = loader(1);
        assert!(loader.load(&ChatId::new("42")).await.unwrap());
        assert_eq!(store.calls.load(Ordering::SeqCst), 2);
        assert_eq!(view.contents(), vec!["earlier", "live 1"]);
    }

    #[tokio::test]
    async fn test_last_fetch_keeps_frames_that_beat_it() {
        let (loader, store, view) = loader(usize::MAX);
        assert!(loader.load(&ChatId::new("42")).await.unwrap());
        assert_eq!(store.calls.load(Ordering::SeqCst), MAX_HISTORY_FETCHES);
        assert_eq!(
            view.contents(),
            vec!["earlier", "live 1", "live 2", "live 3"]
        );
    }

    #[tokio::test]
    async fn test_history_for_inactive_chat_is_dropped() {
        let (loader, _store, view) = loader(0);
        loader.session().set_active(Some(ChatId::new("7")));
        assert!(!loader.load(&ChatId::new("42")).await.unwrap());
        assert!(view.is_empty());
    }
}
