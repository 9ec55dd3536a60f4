use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Chat, Message, MessageKind, Reaction};
use crate::types::{ChatId, CorrelationId, MessageId, Topic, UserId};

/// Position in a chat's history. Pages return messages strictly older than
/// the cursor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub struct PageCursor {
    pub created_at: DateTime<Utc>,
    pub message_id: MessageId,
}

/// Write request for a new message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub content: String,
    pub kind: MessageKind,
    pub media_url: Option<String>,
    pub reply_to: Option<MessageId>,
    pub correlation_id: CorrelationId,
}

/// Write request for a new direct chat or group
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewChat {
    pub creator: UserId,
    /// Other participants; the creator is added by the backend.
    pub participants: Vec<UserId>,
    pub is_group: bool,
    pub name: Option<String>,
    pub description: Option<String>,
}

/// Change notifications pushed by the backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RemoteEvent {
    /// A chat row was created or changed (chats topic).
    ChatChanged(Chat),

    /// A message was posted in one of the user's chats (chats topic).
    ChatActivity(Message),

    /// A message was inserted (messages topic).
    MessageCreated(Message),

    /// Reaction upserted (messages topic).
    ReactionAdded(Reaction),

    /// Reaction removed (messages topic).
    ReactionRemoved(Reaction),

    /// Presence change (user-status topic).
    UserStatusChanged {
        user_id: UserId,
        is_online: bool,
        last_seen: DateTime<Utc>,
    },
}

/// An event together with the topic it was delivered on
#[derive(Debug, Clone)]
pub struct TopicEvent {
    pub topic: Topic,
    pub event: RemoteEvent,
}
