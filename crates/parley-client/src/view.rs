//! The message list of the active chat and the composer's input buffer.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use parley_shared::{ChatId, LocalId, MessageId, MessageRecord, OutboundMessage};

/// One row of the message list.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewEntry {
    pub record: MessageRecord,
    /// Set for entries appended optimistically by this client.
    pub local_id: Option<LocalId>,
}

impl ViewEntry {
    /// Still waiting for the store to confirm it.
    pub fn is_pending(&self) -> bool {
        self.local_id.is_some() && self.record.id.is_none()
    }
}

/// Inbound records kept for merging into a history fetch that keeps losing
/// the race against live frames.
const LATE_CAPACITY: usize = 256;

/// Result of [`MessageListView::install_history`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryInstall {
    Installed,
    /// The view was reset for another chat.
    WrongChat,
    /// Inbound frames were appended after the mark; the fetch may predate
    /// them.
    Outdated,
}

#[derive(Debug, Default)]
struct ViewState {
    chat_id: Option<ChatId>,
    entries: Vec<ViewEntry>,
    /// Bumped on every accepted inbound append.
    inbound_seq: u64,
    /// Inbound records since the last reset or install, tagged with their
    /// sequence number.
    late: VecDeque<(u64, MessageRecord)>,
}

impl ViewState {
    fn install(&mut self, records: Vec<MessageRecord>) {
        self.entries = records
            .into_iter()
            .map(|record| ViewEntry {
                record,
                local_id: None,
            })
            .collect();
        self.late.clear();
    }
}

/// Insertion-ordered messages of one chat, shared between the router and the
/// send path.
///
/// The list only grows, except that a single optimistic entry may be rolled
/// back and the whole list may be replaced by an authoritative fetch. A fetch
/// is only installed if no inbound frame arrived while it was in flight, so a
/// stale snapshot never hides a live message. Every
/// mutation names the chat it is meant for and is refused if the view has
/// since been reset for another chat.
#[derive(Debug, Clone, Default)]
pub struct MessageListView {
    state: Arc<Mutex<ViewState>>,
}

impl MessageListView {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ViewState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The chat whose messages the view holds.
    pub fn chat_id(&self) -> Option<ChatId> {
        self.lock().chat_id.clone()
    }

    /// Empty the view and hand it to `chat_id`.
    pub fn reset(&self, chat_id: Option<ChatId>) {
        let mut state = self.lock();
        state.chat_id = chat_id;
        state.entries.clear();
        state.late.clear();
    }

    /// Show a message before the store has accepted it. Refused if an entry
    /// with the same local id exists or the view belongs to another chat.
    pub fn append_optimistic(&self, message: &OutboundMessage) -> bool {
        let mut state = self.lock();
        if state.chat_id.as_ref() != Some(&message.chat_id) {
            return false;
        }
        if state
            .entries
            .iter()
            .any(|e| e.local_id == Some(message.local_id))
        {
            return false;
        }
        state.entries.push(ViewEntry {
            record: message.to_record(),
            local_id: Some(message.local_id),
        });
        true
    }

    /// Append a message pushed by the server.
    pub fn append_inbound(&self, record: MessageRecord) -> bool {
        let mut state = self.lock();
        if state.chat_id.is_none() || record.chat_id != state.chat_id {
            return false;
        }
        state.inbound_seq += 1;
        let seq = state.inbound_seq;
        if state.late.len() == LATE_CAPACITY {
            state.late.pop_front();
        }
        state.late.push_back((seq, record.clone()));
        state.entries.push(ViewEntry {
            record,
            local_id: None,
        });
        true
    }

    /// Take before starting a history fetch, then hand to
    /// [`install_history`](Self::install_history).
    pub fn inbound_mark(&self) -> u64 {
        self.lock().inbound_seq
    }

    /// Remove exactly the optimistic entry for `local_id`.
    pub fn rollback(&self, local_id: LocalId) -> bool {
        let mut state = self.lock();
        match state
            .entries
            .iter()
            .position(|e| e.local_id == Some(local_id))
        {
            Some(index) => {
                state.entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Swap in the authoritative list for `chat_id`, fetched after `mark` was
    /// taken. Refused as [`HistoryInstall::Outdated`] if inbound frames were
    /// appended since.
    pub fn install_history(
        &self,
        chat_id: &ChatId,
        records: Vec<MessageRecord>,
        mark: u64,
    ) -> HistoryInstall {
        let mut state = self.lock();
        if state.chat_id.as_ref() != Some(chat_id) {
            return HistoryInstall::WrongChat;
        }
        if state.inbound_seq != mark {
            return HistoryInstall::Outdated;
        }
        state.install(records);
        HistoryInstall::Installed
    }

    /// Like [`install_history`](Self::install_history), but instead of
    /// refusing an outdated fetch, keep the frames appended since `mark` after
    /// it. A late frame whose store id is already in `records` is dropped.
    pub fn install_history_keeping_late(
        &self,
        chat_id: &ChatId,
        records: Vec<MessageRecord>,
        mark: u64,
    ) -> bool {
        let mut state = self.lock();
        if state.chat_id.as_ref() != Some(chat_id) {
            return false;
        }
        let late: Vec<MessageRecord> = state
            .late
            .iter()
            .filter(|(seq, _)| *seq > mark)
            .map(|(_, record)| record.clone())
            .filter(|late| {
                late.id.is_none() || !records.iter().any(|r| r.id == late.id)
            })
            .collect();
        let mut merged = records;
        merged.extend(late);
        state.install(merged);
        true
    }

    /// Record the store's id on an optimistic entry that could not be
    /// reconciled by a refetch.
    pub fn attach_server_id(&self, local_id: LocalId, id: MessageId) -> bool {
        let mut state = self.lock();
        match state
            .entries
            .iter_mut()
            .find(|e| e.local_id == Some(local_id))
        {
            Some(entry) => {
                entry.record.id = Some(id);
                true
            }
            None => false,
        }
    }

    pub fn entries(&self) -> Vec<ViewEntry> {
        self.lock().entries.clone()
    }

    pub fn contents(&self) -> Vec<String> {
        self.lock()
            .entries
            .iter()
            .map(|e| e.record.content.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The text the user is composing.
#[derive(Debug, Clone, Default)]
pub struct InputBuffer {
    text: Arc<Mutex<String>>,
}

impl InputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> String {
        self.text.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set(&self, text: impl Into<String>) {
        *self.text.lock().unwrap_or_else(|e| e.into_inner()) = text.into();
    }

    pub fn clear(&self) {
        self.text.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// Put a failed draft back, unless the user has started typing something
    /// else in the meantime.
    pub fn restore(&self, draft: &str) -> bool {
        let mut text = self.text.lock().unwrap_or_else(|e| e.into_inner());
        if !text.is_empty() {
            return false;
        }
        *text = draft.to_string();
        true
    }
}
