use std::collections::HashSet;

use tracing::trace;

use kolokol_shared::{Chat, ChatId, Message, MessageId};

/// Chat summaries ordered by last activity, most recent first.
#[derive(Debug, Default)]
pub struct ChatIndex {
    chats: Vec<Chat>,
    /// Messages already counted as unread.
    counted: HashSet<MessageId>,
}

impl ChatIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chats(&self) -> &[Chat] {
        &self.chats
    }

    pub fn get(&self, chat_id: &ChatId) -> Option<&Chat> {
        self.chats.iter().find(|c| &c.id == chat_id)
    }

    pub fn contains(&self, chat_id: &ChatId) -> bool {
        self.get(chat_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.chats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chats.is_empty()
    }

    fn position(&self, chat_id: &ChatId) -> Option<usize> {
        self.chats.iter().position(|c| &c.id == chat_id)
    }

    /// Replace or insert a chat. Returns `true` when the chat was new.
    ///
    /// Last activity never moves backwards, and a last message older than
    /// the one already known is not adopted. The unread counter of a known
    /// chat is kept: once a chat is indexed it only changes through
    /// [`ChatIndex::touch`] and [`ChatIndex::mark_read`].
    pub fn upsert(&mut self, mut chat: Chat) -> bool {
        match self.position(&chat.id) {
            Some(i) => {
                let existing = self.chats.remove(i);
                chat.unread_count = existing.unread_count;
                if existing.last_activity > chat.last_activity {
                    chat.last_activity = existing.last_activity;
                }
                let keep_existing = match (&existing.last_message, &chat.last_message) {
                    (Some(old), Some(new)) => old.created_at > new.created_at,
                    (Some(_), None) => true,
                    _ => false,
                };
                if keep_existing {
                    chat.last_message = existing.last_message;
                }
                self.insert_sorted(chat);
                false
            }
            None => {
                self.insert_sorted(chat);
                true
            }
        }
    }

    /// Record `message` as activity in its chat and move the chat up.
    ///
    /// With `count_unread` the unread counter grows by one, at most once per
    /// message id. Touching with the message already recorded as last
    /// message changes nothing. Returns whether the index changed.
    pub fn touch(&mut self, chat_id: &ChatId, message: &Message, count_unread: bool) -> bool {
        let Some(i) = self.position(chat_id) else {
            return false;
        };
        let mut chat = self.chats.remove(i);

        if chat.last_message.as_ref().map(|m| &m.id) == Some(&message.id) {
            self.chats.insert(i, chat);
            return false;
        }

        let newer = chat
            .last_message
            .as_ref()
            .map_or(true, |last| message.created_at >= last.created_at);
        if newer {
            chat.last_message = Some(message.clone());
        }
        if message.created_at > chat.last_activity {
            chat.last_activity = message.created_at;
        }
        if count_unread && self.counted.insert(message.id.clone()) {
            chat.unread_count = chat.unread_count.saturating_add(1);
        }

        trace!(chat = %chat.id, unread = chat.unread_count, "Chat touched");
        self.insert_sorted(chat);
        true
    }

    /// Reset the unread counter.
    pub fn mark_read(&mut self, chat_id: &ChatId) -> bool {
        match self.chats.iter_mut().find(|c| &c.id == chat_id) {
            Some(chat) if chat.unread_count > 0 => {
                chat.unread_count = 0;
                true
            }
            _ => false,
        }
    }

    pub fn clear(&mut self) {
        self.chats.clear();
        self.counted.clear();
    }

    // Ties go in front: the chat touched last is listed first.
    fn insert_sorted(&mut self, chat: Chat) {
        let at = self
            .chats
            .partition_point(|c| c.last_activity > chat.last_activity);
        self.chats.insert(at, chat);
    }
}
