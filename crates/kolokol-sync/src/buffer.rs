//! Locally created messages that the backend has not confirmed yet.

use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::debug;

use kolokol_shared::{ChatId, CorrelationId, Message};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteState {
    /// Attachment upload outstanding; the message write follows it.
    Uploading,
    /// Message write outstanding.
    InFlight,
    /// Rejected by the backend. Kept until the user retries or discards it.
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct PendingWrite {
    pub correlation_id: CorrelationId,
    /// Draft as shown to the user, with a `local:` id.
    pub message: Message,
    /// Blob still to be uploaded (or re-uploaded on retry).
    pub attachment: Option<Bytes>,
    pub state: WriteState,
}

impl PendingWrite {
    pub fn is_failed(&self) -> bool {
        matches!(self.state, WriteState::Failed(_))
    }

    pub fn failure(&self) -> Option<&str> {
        match &self.state {
            WriteState::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}

/// Outcome of matching a confirmed message against the buffer.
#[derive(Debug)]
pub enum Reconciliation {
    /// The confirmation belongs to this pending write, now removed.
    Matched(PendingWrite),
    /// Not one of ours (or already reconciled).
    Unmatched,
}

/// Pending writes in send order.
#[derive(Debug)]
pub struct OptimisticWriteBuffer {
    entries: Vec<PendingWrite>,
    window: Duration,
}

impl OptimisticWriteBuffer {
    pub fn new(window: Duration) -> Self {
        Self {
            entries: Vec::new(),
            window,
        }
    }

    pub fn insert(&mut self, write: PendingWrite) {
        debug!(correlation = %write.correlation_id, chat = %write.message.chat_id, "Pending write buffered");
        self.entries.push(write);
    }

    pub fn get(&self, correlation_id: &CorrelationId) -> Option<&PendingWrite> {
        self.entries
            .iter()
            .find(|e| &e.correlation_id == correlation_id)
    }

    fn get_mut(&mut self, correlation_id: &CorrelationId) -> Option<&mut PendingWrite> {
        self.entries
            .iter_mut()
            .find(|e| &e.correlation_id == correlation_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingWrite> {
        self.entries.iter()
    }

    pub fn for_chat<'a>(&'a self, chat_id: &'a ChatId) -> impl Iterator<Item = &'a PendingWrite> {
        self.entries.iter().filter(move |e| &e.message.chat_id == chat_id)
    }

    /// Match `confirmed` to a pending write and remove it.
    ///
    /// A confirmation carrying a correlation id only ever matches by that id.
    /// Without one, the oldest write still in flight with the same chat,
    /// sender, kind and content created within the reconcile window is
    /// taken. Failed writes are never matched by content; they stay until
    /// retried or expired.
    pub fn reconcile(&mut self, confirmed: &Message) -> Reconciliation {
        let position = match &confirmed.correlation_id {
            Some(correlation_id) => self
                .entries
                .iter()
                .position(|e| &e.correlation_id == correlation_id),
            None => self
                .entries
                .iter()
                .position(|e| !e.is_failed() && self.looks_like(&e.message, confirmed)),
        };

        match position {
            Some(i) => {
                let write = self.entries.remove(i);
                debug!(
                    correlation = %write.correlation_id,
                    id = %confirmed.id,
                    "Pending write reconciled"
                );
                Reconciliation::Matched(write)
            }
            None => Reconciliation::Unmatched,
        }
    }

    fn looks_like(&self, draft: &Message, confirmed: &Message) -> bool {
        draft.chat_id == confirmed.chat_id
            && draft.sender_id == confirmed.sender_id
            && draft.kind == confirmed.kind
            && draft.content == confirmed.content
            && within(draft.created_at, confirmed.created_at, self.window)
    }

    pub fn mark_failed(&mut self, correlation_id: &CorrelationId, reason: &str) -> bool {
        match self.get_mut(correlation_id) {
            Some(entry) => {
                entry.state = WriteState::Failed(reason.to_string());
                true
            }
            None => false,
        }
    }

    pub fn mark_in_flight(&mut self, correlation_id: &CorrelationId) -> bool {
        match self.get_mut(correlation_id) {
            Some(entry) => {
                entry.state = WriteState::InFlight;
                true
            }
            None => false,
        }
    }

    /// Record the uploaded blob's URL; the attachment itself is released.
    pub fn set_media_url(&mut self, correlation_id: &CorrelationId, url: &str) -> bool {
        match self.get_mut(correlation_id) {
            Some(entry) => {
                entry.message.media_url = Some(url.to_string());
                entry.attachment = None;
                true
            }
            None => false,
        }
    }

    /// Remove a write whose remote write ultimately failed.
    pub fn expire(&mut self, correlation_id: &CorrelationId) -> Option<PendingWrite> {
        let i = self
            .entries
            .iter()
            .position(|e| &e.correlation_id == correlation_id)?;
        debug!(correlation = %correlation_id, "Pending write expired");
        Some(self.entries.remove(i))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

fn within(a: DateTime<Utc>, b: DateTime<Utc>, window: Duration) -> bool {
    let delta = if a >= b { a - b } else { b - a };
    delta.to_std().map(|d| d <= window).unwrap_or(false)
}
