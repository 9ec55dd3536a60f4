//! In-process [`RemoteStore`] used by tests and the demo client.
//!
//! Behaves like the hosted backend: it assigns ids and timestamps, echoes
//! correlation ids, and publishes change events on the same topics. Failure
//! injection switches let callers simulate an offline backend or a broken
//! realtime channel.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use kolokol_shared::constants::MAX_MEDIA_SIZE;
use kolokol_shared::{
    Chat, ChatId, DeliveryStatus, GroupInfo, Message, MessageId, MessageKind,
    NewChat, NewMessage, PageCursor, Reaction, ReactionSet, RemoteError, RemoteEvent, Topic, User,
    UserId,
};

use crate::store::RemoteStore;
use crate::subscription::{EventSink, Subscription, SubscriptionHub};

#[derive(Default)]
struct StoreInner {
    users: BTreeMap<UserId, User>,
    chats: Vec<Chat>,
    messages: Vec<Message>,
    reactions: BTreeSet<Reaction>,
    media: HashMap<String, Bytes>,
    next_id: u64,
    last_timestamp: Option<DateTime<Utc>>,
    reject_writes: bool,
    fail_subscriptions: bool,
}

impl StoreInner {
    fn next_id(&mut self) -> String {
        self.next_id += 1;
        (1000 + self.next_id).to_string()
    }

    /// Server clock; strictly increasing so history order is total.
    fn now(&mut self) -> DateTime<Utc> {
        let mut now = Utc::now();
        if let Some(last) = self.last_timestamp {
            if now <= last {
                now = last + Duration::milliseconds(1);
            }
        }
        self.last_timestamp = Some(now);
        now
    }

    fn with_reactions(&self, mut message: Message) -> Message {
        let mut set = ReactionSet::new();
        for r in self.reactions.iter().filter(|r| r.message_id == message.id) {
            set.upsert(&r.user_id, &r.emoji);
        }
        message.reactions = set;
        message
    }
}

/// Shared in-memory backend. Cloning yields another handle to the same data.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Mutex<StoreInner>>,
    hub: SubscriptionHub,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with the demo accounts and conversations.
    pub fn with_demo_data() -> Self {
        let store = Self::new();
        let now = Utc::now();
        let hours = |h: i64| now - Duration::hours(h);

        for (id, first, last, email) in [
            ("1", "Иван", "Иванов", "ivan@example.com"),
            ("2", "Анна", "Петрова", "anna@example.com"),
            ("3", "Пётр", "Сидоров", "petr@example.com"),
            ("4", "Мария", "Кузнецова", "maria@example.com"),
            ("5", "Олег", "Смирнов", "oleg@example.com"),
        ] {
            store.insert_user(User {
                id: UserId::from(id),
                email: email.to_string(),
                first_name: first.to_string(),
                last_name: last.to_string(),
                avatar: None,
                phone_number: None,
                status: "Доступен".to_string(),
                is_online: false,
                last_seen: hours(1),
            });
        }

        let greeting = seed_message("1", "1", "2", "Привет! Как дела?", hours(1), false);
        let reply = Message {
            created_at: now - Duration::minutes(55),
            ..seed_message("2", "1", "1", "Привет! Всё отлично, спасибо!", hours(1), true)
        };
        let meeting = seed_message("3", "2", "3", "Встреча в 15:00", hours(2), true);

        if let Ok(mut inner) = store.inner.lock() {
            inner.chats.push(Chat {
                id: ChatId::from("1"),
                name: Some("Анна Петрова".to_string()),
                is_group: false,
                participants: vec![UserId::from("1"), UserId::from("2")],
                last_message: Some(reply.clone()),
                unread_count: 2,
                avatar: None,
                created_at: hours(24),
                last_activity: reply.created_at,
                group: None,
            });
            inner.chats.push(Chat {
                id: ChatId::from("2"),
                name: Some("Рабочая группа".to_string()),
                is_group: true,
                participants: ["1", "3", "4", "5"].into_iter().map(UserId::from).collect(),
                last_message: Some(meeting.clone()),
                unread_count: 0,
                avatar: None,
                created_at: hours(48),
                last_activity: meeting.created_at,
                group: Some(GroupInfo {
                    description: None,
                    admins: vec![UserId::from("1")],
                    only_admins_can_message: false,
                    only_admins_can_edit: true,
                }),
            });
            inner.messages.extend([greeting, reply, meeting]);
        }

        store
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreInner>, RemoteError> {
        self.inner
            .lock()
            .map_err(|e| RemoteError::Query(format!("store lock poisoned: {e}")))
    }

    pub fn insert_user(&self, user: User) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.users.insert(user.id.clone(), user);
        }
    }

    pub fn user(&self, id: &UserId) -> Option<User> {
        self.inner.lock().ok()?.users.get(id).cloned()
    }

    /// Make every subsequent write and upload fail.
    pub fn set_reject_writes(&self, reject: bool) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.reject_writes = reject;
        }
        info!(reject, "Write rejection toggled");
    }

    /// Make every subsequent `subscribe` call fail.
    pub fn set_subscriptions_failing(&self, failing: bool) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.fail_subscriptions = failing;
        }
        info!(failing, "Subscription failure toggled");
    }

    pub fn listener_count(&self, topic: &Topic) -> usize {
        self.hub.listener_count(topic)
    }

    pub fn message_count(&self, chat_id: &ChatId) -> usize {
        self.inner
            .lock()
            .map(|inner| inner.messages.iter().filter(|m| &m.chat_id == chat_id).count())
            .unwrap_or(0)
    }

    /// Another participant posts a message, as seen from the backend.
    pub async fn simulate_incoming(
        &self,
        chat_id: &ChatId,
        sender: &UserId,
        content: &str,
    ) -> Result<Message, RemoteError> {
        let message = {
            let mut inner = self.lock()?;
            let id = MessageId::new(inner.next_id());
            let created_at = inner.now();
            Message {
                id,
                chat_id: chat_id.clone(),
                sender_id: sender.clone(),
                content: content.to_string(),
                kind: MessageKind::Text,
                media_url: None,
                reply_to: None,
                created_at,
                status: DeliveryStatus::Delivered,
                reactions: ReactionSet::new(),
                correlation_id: None,
            }
        };
        self.insert_and_publish(message)
    }

    /// Flip a user's presence and notify the status topic.
    pub fn set_user_online(&self, user_id: &UserId, online: bool) {
        let last_seen = {
            let Ok(mut inner) = self.inner.lock() else {
                return;
            };
            let now = inner.now();
            match inner.users.get_mut(user_id) {
                Some(user) => {
                    user.is_online = online;
                    user.last_seen = now;
                    now
                }
                None => return,
            }
        };
        self.hub.publish(
            &Topic::UserStatus,
            RemoteEvent::UserStatusChanged {
                user_id: user_id.clone(),
                is_online: online,
                last_seen,
            },
        );
    }

    fn insert_and_publish(&self, message: Message) -> Result<Message, RemoteError> {
        let participants = {
            let mut inner = self.lock()?;
            let chat = inner
                .chats
                .iter_mut()
                .find(|c| c.id == message.chat_id)
                .ok_or_else(|| RemoteError::NotFound(format!("chat {}", message.chat_id)))?;
            chat.last_message = Some(message.clone());
            if message.created_at > chat.last_activity {
                chat.last_activity = message.created_at;
            }
            let participants = chat.participants.clone();
            inner.messages.push(message.clone());
            participants
        };

        debug!(chat = %message.chat_id, id = %message.id, "Message stored");

        self.hub.publish(
            &Topic::Messages(message.chat_id.clone()),
            RemoteEvent::MessageCreated(message.clone()),
        );
        for participant in participants {
            self.hub.publish(
                &Topic::Chats(participant),
                RemoteEvent::ChatActivity(message.clone()),
            );
        }
        Ok(message)
    }

    fn message_chat(&self, message_id: &MessageId) -> Result<ChatId, RemoteError> {
        self.lock()?
            .messages
            .iter()
            .find(|m| &m.id == message_id)
            .map(|m| m.chat_id.clone())
            .ok_or_else(|| RemoteError::NotFound(format!("message {message_id}")))
    }
}

fn seed_message(
    id: &str,
    chat: &str,
    sender: &str,
    content: &str,
    created_at: DateTime<Utc>,
    read: bool,
) -> Message {
    Message {
        id: MessageId::from(id),
        chat_id: ChatId::from(chat),
        sender_id: UserId::from(sender),
        content: content.to_string(),
        kind: MessageKind::Text,
        media_url: None,
        reply_to: None,
        created_at,
        status: if read {
            DeliveryStatus::Read
        } else {
            DeliveryStatus::Delivered
        },
        reactions: ReactionSet::new(),
        correlation_id: None,
    }
}

impl RemoteStore for InMemoryStore {
    async fn fetch_chats(&self, user_id: &UserId) -> Result<Vec<Chat>, RemoteError> {
        let inner = self.lock()?;
        let mut chats: Vec<Chat> = inner
            .chats
            .iter()
            .filter(|c| c.participants.contains(user_id))
            .cloned()
            .collect();
        chats.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        Ok(chats)
    }

    async fn fetch_users(&self, ids: &[UserId]) -> Result<Vec<User>, RemoteError> {
        let inner = self.lock()?;
        Ok(ids.iter().filter_map(|id| inner.users.get(id).cloned()).collect())
    }

    async fn fetch_messages(
        &self,
        chat_id: &ChatId,
        limit: usize,
        before: Option<&PageCursor>,
    ) -> Result<Vec<Message>, RemoteError> {
        let inner = self.lock()?;
        let mut page: Vec<&Message> = inner
            .messages
            .iter()
            .filter(|m| &m.chat_id == chat_id)
            .filter(|m| before.map_or(true, |cursor| &m.cursor() < cursor))
            .collect();
        page.sort_by(|a, b| b.cursor().cmp(&a.cursor()));
        page.truncate(limit);
        Ok(page
            .into_iter()
            .map(|m| inner.with_reactions(m.clone()))
            .collect())
    }

    async fn send_message(&self, request: NewMessage) -> Result<Message, RemoteError> {
        let message = {
            let mut inner = self.lock()?;
            if inner.reject_writes {
                warn!(chat = %request.chat_id, "Rejecting message write");
                return Err(RemoteError::Write("backend unreachable".into()));
            }
            let id = MessageId::new(inner.next_id());
            let created_at = inner.now();
            Message {
                id,
                chat_id: request.chat_id,
                sender_id: request.sender_id,
                content: request.content,
                kind: request.kind,
                media_url: request.media_url,
                reply_to: request.reply_to,
                created_at,
                status: DeliveryStatus::Sent,
                reactions: ReactionSet::new(),
                correlation_id: Some(request.correlation_id),
            }
        };
        self.insert_and_publish(message)
            .map_err(|e| RemoteError::Write(e.to_string()))
    }

    async fn create_chat(&self, request: NewChat) -> Result<Chat, RemoteError> {
        if request.participants.is_empty() {
            return Err(RemoteError::Write("a chat needs at least one participant".into()));
        }

        let chat = {
            let mut inner = self.lock()?;
            if inner.reject_writes {
                return Err(RemoteError::Write("backend unreachable".into()));
            }

            let mut participants = vec![request.creator.clone()];
            for p in request.participants {
                if !participants.contains(&p) {
                    participants.push(p);
                }
            }

            if !request.is_group {
                let mut wanted = participants.clone();
                wanted.sort();
                let existing = inner.chats.iter().find(|c| {
                    let mut have = c.participants.clone();
                    have.sort();
                    !c.is_group && have == wanted
                });
                if let Some(existing) = existing {
                    return Ok(existing.clone());
                }
            }

            let now = inner.now();
            let chat = Chat {
                id: ChatId::new(inner.next_id()),
                name: request.name,
                is_group: request.is_group,
                participants,
                last_message: None,
                unread_count: 0,
                avatar: None,
                created_at: now,
                last_activity: now,
                group: request.is_group.then(|| GroupInfo {
                    description: request.description,
                    admins: vec![request.creator.clone()],
                    only_admins_can_message: false,
                    only_admins_can_edit: true,
                }),
            };
            inner.chats.push(chat.clone());
            chat
        };

        info!(chat = %chat.id, group = chat.is_group, "Chat created");
        for participant in &chat.participants {
            self.hub.publish(
                &Topic::Chats(participant.clone()),
                RemoteEvent::ChatChanged(chat.clone()),
            );
        }
        Ok(chat)
    }

    async fn add_reaction(&self, reaction: Reaction) -> Result<(), RemoteError> {
        let chat_id = self.message_chat(&reaction.message_id)?;
        {
            let mut inner = self.lock()?;
            if inner.reject_writes {
                return Err(RemoteError::Write("backend unreachable".into()));
            }
            inner.reactions.insert(reaction.clone());
        }
        self.hub.publish(
            &Topic::Messages(chat_id),
            RemoteEvent::ReactionAdded(reaction),
        );
        Ok(())
    }

    async fn remove_reaction(&self, reaction: Reaction) -> Result<(), RemoteError> {
        let chat_id = self.message_chat(&reaction.message_id)?;
        {
            let mut inner = self.lock()?;
            if inner.reject_writes {
                return Err(RemoteError::Write("backend unreachable".into()));
            }
            inner.reactions.remove(&reaction);
        }
        self.hub.publish(
            &Topic::Messages(chat_id),
            RemoteEvent::ReactionRemoved(reaction),
        );
        Ok(())
    }

    async fn upload_media(
        &self,
        owner: &UserId,
        blob: Bytes,
        kind: MessageKind,
    ) -> Result<String, RemoteError> {
        if blob.is_empty() {
            return Err(RemoteError::Upload("empty blob".into()));
        }
        if blob.len() > MAX_MEDIA_SIZE {
            return Err(RemoteError::Upload(format!(
                "blob too large: {} bytes (max {MAX_MEDIA_SIZE})",
                blob.len()
            )));
        }

        let mut inner = self.lock()?;
        if inner.reject_writes {
            return Err(RemoteError::Upload("backend unreachable".into()));
        }

        let hash = blake3::hash(&blob).to_hex().to_string();
        let url = format!("memory://media/{owner}/{kind}/{hash}");
        debug!(url = %url, size = blob.len(), "Stored media");
        inner.media.entry(url.clone()).or_insert(blob);
        Ok(url)
    }

    fn subscribe(&self, topic: Topic, sink: EventSink) -> Result<Subscription, RemoteError> {
        if self.lock()?.fail_subscriptions {
            return Err(RemoteError::Subscribe {
                topic: topic.to_string(),
                reason: "realtime channel unavailable".into(),
            });
        }
        Ok(self.hub.subscribe(topic, sink))
    }
}
