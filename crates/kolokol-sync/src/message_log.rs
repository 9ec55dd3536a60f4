//! Ordered message sequence of the active conversation.
//!
//! Entries are kept in ascending creation order (ties broken by id) and carry
//! their sync state. History pages, live events and optimistic drafts are all
//! merged here; an id or a correlation id never appears twice.

use serde::Serialize;
use tracing::{debug, trace};

use kolokol_shared::{ChatId, CorrelationId, Message, MessageId, PageCursor, Reaction};

use crate::buffer::PendingWrite;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum EntryState {
    #[serde(rename_all = "camelCase")]
    Pending { correlation_id: CorrelationId },
    Confirmed,
    #[serde(rename_all = "camelCase")]
    Failed {
        correlation_id: CorrelationId,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub message: Message,
    pub state: EntryState,
}

impl LogEntry {
    /// Correlation id of an unconfirmed entry, or the echoed one of a
    /// confirmed message.
    pub fn correlation_id(&self) -> Option<&CorrelationId> {
        match &self.state {
            EntryState::Pending { correlation_id } | EntryState::Failed { correlation_id, .. } => {
                Some(correlation_id)
            }
            EntryState::Confirmed => self.message.correlation_id.as_ref(),
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.state == EntryState::Confirmed
    }
}

#[derive(Debug)]
pub struct MessageLog {
    chat_id: ChatId,
    entries: Vec<LogEntry>,
    oldest: Option<PageCursor>,
    exhausted: bool,
    page_in_flight: bool,
}

impl MessageLog {
    pub fn new(chat_id: ChatId) -> Self {
        Self {
            chat_id,
            entries: Vec::new(),
            oldest: None,
            exhausted: false,
            page_in_flight: false,
        }
    }

    pub fn chat_id(&self) -> &ChatId {
        &self.chat_id
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn message(&self, id: &MessageId) -> Option<&Message> {
        self.entries
            .iter()
            .find(|e| &e.message.id == id)
            .map(|e| &e.message)
    }

    pub fn entry_by_correlation(&self, correlation_id: &CorrelationId) -> Option<&LogEntry> {
        self.entries
            .iter()
            .find(|e| e.correlation_id() == Some(correlation_id))
    }

    fn position_by_correlation(&self, correlation_id: &CorrelationId) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.correlation_id() == Some(correlation_id))
    }

    /// Insert a confirmed message.
    ///
    /// Returns `false` for messages of another chat and for duplicates. A
    /// message whose correlation id matches an unconfirmed entry replaces it.
    pub fn append(&mut self, message: Message) -> bool {
        if message.chat_id != self.chat_id {
            trace!(chat = %message.chat_id, active = %self.chat_id, "Ignoring message of another chat");
            return false;
        }
        if self.entries.iter().any(|e| e.message.id == message.id) {
            return false;
        }
        if let Some(correlation_id) = message.correlation_id {
            if let Some(i) = self.position_by_correlation(&correlation_id) {
                if self.entries[i].is_confirmed() {
                    return false;
                }
                self.entries.remove(i);
            }
        }
        self.insert_sorted(LogEntry {
            message,
            state: EntryState::Confirmed,
        });
        true
    }

    /// Show a draft before the backend has seen it.
    pub fn insert_pending(&mut self, draft: Message, correlation_id: CorrelationId) -> bool {
        if draft.chat_id != self.chat_id || self.position_by_correlation(&correlation_id).is_some()
        {
            return false;
        }
        self.insert_sorted(LogEntry {
            message: draft,
            state: EntryState::Pending { correlation_id },
        });
        true
    }

    /// Re-show a buffered write, e.g. after switching back to its chat.
    pub fn restore(&mut self, write: &PendingWrite) -> bool {
        if !self.insert_pending(write.message.clone(), write.correlation_id) {
            return false;
        }
        if let Some(reason) = write.failure() {
            self.mark_failed(&write.correlation_id, reason);
        }
        true
    }

    /// Swap the unconfirmed entry of `correlation_id` for `confirmed`.
    pub fn confirm(&mut self, correlation_id: &CorrelationId, confirmed: Message) -> bool {
        let removed = self.remove_pending(correlation_id);
        let inserted = self.append(confirmed);
        removed || inserted
    }

    pub fn mark_failed(&mut self, correlation_id: &CorrelationId, reason: &str) -> bool {
        let Some(i) = self.position_by_correlation(correlation_id) else {
            return false;
        };
        let entry = &mut self.entries[i];
        if entry.is_confirmed() {
            return false;
        }
        entry.state = EntryState::Failed {
            correlation_id: *correlation_id,
            reason: reason.to_string(),
        };
        true
    }

    /// Drop the unconfirmed entry of `correlation_id`.
    pub fn remove_pending(&mut self, correlation_id: &CorrelationId) -> bool {
        match self.position_by_correlation(correlation_id) {
            Some(i) if !self.entries[i].is_confirmed() => {
                self.entries.remove(i);
                true
            }
            _ => false,
        }
    }

    pub fn set_pending_media(&mut self, correlation_id: &CorrelationId, url: &str) -> bool {
        match self.position_by_correlation(correlation_id) {
            Some(i) if !self.entries[i].is_confirmed() => {
                self.entries[i].message.media_url = Some(url.to_string());
                true
            }
            _ => false,
        }
    }

    // -- history paging --

    /// Cursor for the next (older) page; `None` before the first page.
    pub fn next_cursor(&self) -> Option<&PageCursor> {
        self.oldest.as_ref()
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn is_loading(&self) -> bool {
        self.page_in_flight
    }

    /// Claim the single page-load slot. Fails while a load is outstanding or
    /// once history is exhausted.
    pub fn begin_page_load(&mut self) -> bool {
        if self.page_in_flight || self.exhausted {
            return false;
        }
        self.page_in_flight = true;
        true
    }

    pub fn finish_page_load(&mut self) {
        self.page_in_flight = false;
    }

    /// Merge a page returned for a request of `requested` messages. Returns
    /// how many new entries were inserted.
    pub fn merge_page(&mut self, page: Vec<Message>, requested: usize) -> usize {
        self.page_in_flight = false;
        if page.len() < requested {
            self.exhausted = true;
        }

        let mut inserted = 0;
        for message in page {
            let cursor = message.cursor();
            if message.chat_id != self.chat_id {
                continue;
            }
            if self.oldest.as_ref().map_or(true, |oldest| &cursor < oldest) {
                self.oldest = Some(cursor);
            }
            if self.append(message) {
                inserted += 1;
            }
        }

        debug!(chat = %self.chat_id, inserted, exhausted = self.exhausted, "History page merged");
        inserted
    }

    // -- reactions --

    pub fn apply_reaction(&mut self, reaction: &Reaction, added: bool) -> bool {
        let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.message.id == reaction.message_id)
        else {
            return false;
        };
        let reactions = &mut entry.message.reactions;
        if added {
            reactions.upsert(&reaction.user_id, &reaction.emoji)
        } else {
            reactions.remove(&reaction.user_id, &reaction.emoji)
        }
    }

    fn insert_sorted(&mut self, entry: LogEntry) {
        let key = (entry.message.created_at, entry.message.id.clone());
        let at = self
            .entries
            .partition_point(|e| (e.message.created_at, &e.message.id) <= (key.0, &key.1));
        self.entries.insert(at, entry);
    }
}
