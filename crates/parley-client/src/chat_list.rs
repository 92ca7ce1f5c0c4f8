//! Chat list refresh coordination.
//!
//! A single worker task owns all fetches. Triggers go through a queue of
//! depth one, so however many frames arrive during a round, at most one more
//! round follows it. Each round is numbered when it starts and a result is
//! only published if it is newer than the snapshot already shown.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use parley_shared::{ChatSummary, UserId};

use crate::collaborators::ChatDirectory;
use crate::error::{ClientError, Result};

/// The chat list as last fetched successfully.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatListSnapshot {
    /// Round that produced this snapshot; 0 before the first success.
    pub seq: u64,
    pub chats: Vec<ChatSummary>,
}

#[derive(Debug, Clone, Default)]
struct RoundOutcome {
    seq: u64,
    error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ChatListSynchronizer {
    trigger: mpsc::Sender<()>,
    rounds_started: Arc<AtomicU64>,
    completed: watch::Receiver<RoundOutcome>,
    snapshot: watch::Receiver<ChatListSnapshot>,
}

impl ChatListSynchronizer {
    /// Spawn the refresh worker for `user_id`. It stops once every handle is
    /// dropped.
    pub fn spawn(directory: Arc<dyn ChatDirectory>, user_id: UserId) -> Self {
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        let (completed_tx, completed_rx) = watch::channel(RoundOutcome::default());
        let (snapshot_tx, snapshot_rx) = watch::channel(ChatListSnapshot::default());
        let rounds_started = Arc::new(AtomicU64::new(0));

        let worker = Worker {
            directory,
            user_id,
            rounds_started: Arc::clone(&rounds_started),
            completed: completed_tx,
            snapshot: snapshot_tx,
        };
        tokio::spawn(worker.run(trigger_rx));

        Self {
            trigger: trigger_tx,
            rounds_started,
            completed: completed_rx,
            snapshot: snapshot_rx,
        }
    }

    /// Ask for a refresh without waiting for it.
    pub fn request_refresh(&self) {
        match self.trigger.try_send(()) {
            Ok(()) => {}
            Err(TrySendError::Full(())) => debug!("Chat list refresh already queued"),
            Err(TrySendError::Closed(())) => warn!("Chat list worker has stopped"),
        }
    }

    /// Refresh and wait for a round that started after this call. Failure is
    /// reported here but never clears the snapshot.
    pub async fn refresh(&self) -> Result<()> {
        let started = self.rounds_started.load(Ordering::SeqCst);
        self.request_refresh();

        let mut completed = self.completed.clone();
        let outcome = completed
            .wait_for(|outcome| outcome.seq > started)
            .await
            .map_err(|_| ClientError::SynchronizerStopped)?
            .clone();
        match outcome.error {
            Some(reason) => Err(ClientError::Refresh(reason)),
            None => Ok(()),
        }
    }

    pub fn snapshot(&self) -> ChatListSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn chats(&self) -> Vec<ChatSummary> {
        self.snapshot.borrow().chats.clone()
    }

    /// Observe snapshot replacements.
    pub fn watch(&self) -> watch::Receiver<ChatListSnapshot> {
        self.snapshot.clone()
    }
}

struct Worker {
    directory: Arc<dyn ChatDirectory>,
    user_id: UserId,
    rounds_started: Arc<AtomicU64>,
    completed: watch::Sender<RoundOutcome>,
    snapshot: watch::Sender<ChatListSnapshot>,
}

impl Worker {
    async fn run(self, mut triggers: mpsc::Receiver<()>) {
        while triggers.recv().await.is_some() {
            let seq = self.rounds_started.fetch_add(1, Ordering::SeqCst) + 1;
            debug!(seq, user = %self.user_id, "Refreshing chat list");

            let error = match self.directory.list_chats(&self.user_id).await {
                Ok(chats) => {
                    let count = chats.len();
                    if apply_round(&self.snapshot, seq, chats) {
                        info!(seq, count, "Chat list updated");
                    }
                    None
                }
                Err(e) => {
                    warn!(seq, error = %e, "Chat list refresh failed, keeping previous list");
                    Some(e.to_string())
                }
            };
            self.completed.send_replace(RoundOutcome { seq, error });
        }
        debug!("Chat list worker stopped");
    }
}

/// Publish `chats` unless a newer round already has.
fn apply_round(
    snapshot: &watch::Sender<ChatListSnapshot>,
    seq: u64,
    chats: Vec<ChatSummary>,
) -> bool {
    snapshot.send_if_modified(|current| {
        if seq <= current.seq {
            debug!(seq, current = current.seq, "Discarding stale chat list");
            return false;
        }
        *current = ChatListSnapshot { seq, chats };
        true
    })
}
