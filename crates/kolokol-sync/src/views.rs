//! Read-only snapshots handed to the presentation layer.

use chrono::{DateTime, Utc};
use serde::Serialize;

use kolokol_shared::{Chat, ChatId, CorrelationId, MessageId, MessageKind, UserId};

use crate::directory::Directory;
use crate::message_log::{EntryState, LogEntry};
use crate::notices::Notice;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatView {
    pub id: ChatId,
    pub name: String,
    pub is_group: bool,
    pub unread_count: u32,
    pub last_message_preview: Option<String>,
    pub last_activity: DateTime<Utc>,
    /// Counterpart presence for direct chats.
    pub is_online: Option<bool>,
}

impl ChatView {
    pub fn from_chat(chat: &Chat, me: &UserId, directory: &Directory) -> Self {
        Self {
            id: chat.id.clone(),
            name: directory.display_name(chat, me),
            is_group: chat.is_group,
            unread_count: chat.unread_count,
            last_message_preview: chat.last_message.as_ref().map(|m| m.preview()),
            last_activity: chat.last_activity,
            is_online: chat
                .counterpart(me)
                .and_then(|id| directory.get(id))
                .map(|u| u.is_online),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionCount {
    pub emoji: String,
    pub count: usize,
    pub mine: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: MessageId,
    pub sender_id: UserId,
    pub sender_name: Option<String>,
    pub content: String,
    pub kind: MessageKind,
    pub media_url: Option<String>,
    pub reply_to: Option<MessageId>,
    pub created_at: DateTime<Utc>,
    pub is_mine: bool,
    /// `pending`, `confirmed` or `failed`.
    pub state: &'static str,
    pub failure: Option<String>,
    pub correlation_id: Option<CorrelationId>,
    pub reactions: Vec<ReactionCount>,
}

impl MessageView {
    pub fn from_entry(entry: &LogEntry, me: &UserId, directory: &Directory) -> Self {
        let m = &entry.message;
        let (state, failure) = match &entry.state {
            EntryState::Pending { .. } => ("pending", None),
            EntryState::Confirmed => ("confirmed", None),
            EntryState::Failed { reason, .. } => ("failed", Some(reason.clone())),
        };
        let reactions = m
            .reactions
            .counts()
            .into_iter()
            .map(|(emoji, count)| ReactionCount {
                emoji: emoji.to_string(),
                count,
                mine: m.reactions.contains(me, emoji),
            })
            .collect();

        Self {
            id: m.id.clone(),
            sender_id: m.sender_id.clone(),
            sender_name: directory.get(&m.sender_id).map(|u| u.full_name()),
            content: m.content.clone(),
            kind: m.kind,
            media_url: m.media_url.clone(),
            reply_to: m.reply_to.clone(),
            created_at: m.created_at,
            is_mine: &m.sender_id == me,
            state,
            failure,
            correlation_id: entry.correlation_id().copied(),
            reactions,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSnapshot {
    pub user_id: Option<UserId>,
    pub active_chat: Option<ChatId>,
    pub chats: Vec<ChatView>,
    pub messages: Vec<MessageView>,
    pub loading_history: bool,
    pub history_exhausted: bool,
    pub pending_writes: usize,
    pub notices: Vec<Notice>,
}
