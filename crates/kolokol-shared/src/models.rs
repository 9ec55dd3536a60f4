//! Domain models exchanged with the hosted backend and handed to the UI.
//!
//! Every struct derives `Serialize` and `Deserialize` so a snapshot can be
//! passed to the presentation layer as-is.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::protocol::PageCursor;
use crate::types::{ChatId, CorrelationId, MessageId, UserId};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A user profile as known to the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub avatar: Option<String>,
    pub phone_number: Option<String>,
    /// Free-form status line ("Доступен", "В отпуске", ...).
    pub status: String,
    pub is_online: bool,
    pub last_seen: DateTime<Utc>,
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    Video,
    Audio,
    Voice,
    File,
}

impl MessageKind {
    /// Whether messages of this kind reference an uploaded blob.
    pub fn is_media(self) -> bool {
        !matches!(self, MessageKind::Text)
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::Video => "video",
            MessageKind::Audio => "audio",
            MessageKind::Voice => "voice",
            MessageKind::File => "file",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Read,
}

/// A single chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    /// Text body, or the caption of a media message.
    pub content: String,
    pub kind: MessageKind,
    /// URL of the uploaded blob for media kinds.
    pub media_url: Option<String>,
    pub reply_to: Option<MessageId>,
    pub created_at: DateTime<Utc>,
    pub status: DeliveryStatus,
    #[serde(default)]
    pub reactions: ReactionSet,
    /// Echoed back by the backend for messages this client sent.
    pub correlation_id: Option<CorrelationId>,
}

impl Message {
    /// Paging position of this message.
    pub fn cursor(&self) -> PageCursor {
        PageCursor {
            created_at: self.created_at,
            message_id: self.id.clone(),
        }
    }

    /// Short single-line preview used by chat summaries.
    pub fn preview(&self) -> String {
        match self.kind {
            MessageKind::Text => self.content.clone(),
            kind if self.content.is_empty() => format!("[{kind}]"),
            kind => format!("[{kind}] {}", self.content),
        }
    }
}

// ---------------------------------------------------------------------------
// Reactions
// ---------------------------------------------------------------------------

/// A (message, user, emoji) triple.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub message_id: MessageId,
    pub user_id: UserId,
    pub emoji: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub struct ReactionKey {
    pub user_id: UserId,
    pub emoji: String,
}

/// Reactions of one message, unique per (user, emoji).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct ReactionSet {
    entries: BTreeSet<ReactionKey>,
}

impl ReactionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a reaction. Returns `false` if it was already present.
    pub fn upsert(&mut self, user_id: &UserId, emoji: &str) -> bool {
        self.entries.insert(ReactionKey {
            user_id: user_id.clone(),
            emoji: emoji.to_string(),
        })
    }

    pub fn remove(&mut self, user_id: &UserId, emoji: &str) -> bool {
        self.entries.remove(&ReactionKey {
            user_id: user_id.clone(),
            emoji: emoji.to_string(),
        })
    }

    pub fn contains(&self, user_id: &UserId, emoji: &str) -> bool {
        self.entries.iter().any(|k| &k.user_id == user_id && k.emoji == emoji)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReactionKey> {
        self.entries.iter()
    }

    /// Number of users per emoji.
    pub fn counts(&self) -> BTreeMap<&str, usize> {
        let mut counts = BTreeMap::new();
        for key in &self.entries {
            *counts.entry(key.emoji.as_str()).or_insert(0) += 1;
        }
        counts
    }
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

/// Group-only metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GroupInfo {
    pub description: Option<String>,
    pub admins: Vec<UserId>,
    pub only_admins_can_message: bool,
    pub only_admins_can_edit: bool,
}

/// A conversation, direct or group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: ChatId,
    /// Stored name. Always set for groups; direct chats derive theirs.
    pub name: Option<String>,
    pub is_group: bool,
    pub participants: Vec<UserId>,
    pub last_message: Option<Message>,
    pub unread_count: u32,
    pub avatar: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub group: Option<GroupInfo>,
}

impl Chat {
    /// The other participant of a direct chat.
    pub fn counterpart(&self, me: &UserId) -> Option<&UserId> {
        if self.is_group {
            return None;
        }
        self.participants.iter().find(|p| *p != me)
    }

    /// Name shown in the chat list.
    ///
    /// Groups (and chats with a stored name) use it; direct chats fall back to
    /// the counterpart's name as resolved by `lookup`, then to their id.
    pub fn display_name<F>(&self, me: &UserId, lookup: F) -> String
    where
        F: Fn(&UserId) -> Option<String>,
    {
        if let Some(name) = self.name.as_deref().filter(|n| !n.is_empty()) {
            return name.to_string();
        }
        match self.counterpart(me) {
            Some(other) => lookup(other).unwrap_or_else(|| other.to_string()),
            None => self.id.to_string(),
        }
    }
}
