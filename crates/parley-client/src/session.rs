//! Per-login session state.

use std::sync::{Arc, RwLock};

use parley_shared::{ChatId, UserId};

/// The signed-in user and the conversation they are looking at.
///
/// Clones share the active-chat cell. Readers must call
/// [`Session::active_chat`] at the moment they need the value rather than
/// keeping a copy around, since the user may switch chats at any suspension
/// point.
#[derive(Debug, Clone)]
pub struct Session {
    user_id: UserId,
    active_chat: Arc<RwLock<Option<ChatId>>>,
}

impl Session {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            active_chat: Arc::new(RwLock::new(None)),
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn active_chat(&self) -> Option<ChatId> {
        self.active_chat
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn is_active(&self, chat_id: &ChatId) -> bool {
        self.active_chat
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            == Some(chat_id)
    }

    /// Only chat selection and logout write the active chat.
    pub(crate) fn set_active(&self, chat_id: Option<ChatId>) {
        *self.active_chat.write().unwrap_or_else(|e| e.into_inner()) = chat_id;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_see_selection() {
        let session = Session::new(UserId::new("1"));
        let reader = session.clone();
        assert_eq!(reader.active_chat(), None);

        session.set_active(Some(ChatId::new("7")));
        assert_eq!(reader.active_chat(), Some(ChatId::new("7")));
        assert!(reader.is_active(&ChatId::from(7_i64)));

        session.set_active(Some(ChatId::new("9")));
        assert!(!reader.is_active(&ChatId::new("7")));
    }
}
