//! The single authority over client-side chat state.
//!
//! [`SyncController`] turns user intents into [`RemoteStore`] calls and
//! remote notifications into local state changes. It owns every piece of
//! state and mutates it from one place only: the action methods and
//! [`SyncController::handle_event`]. Remote calls are tracked as futures
//! whose completions come back as [`SyncEvent`]s, interleaved with pushed
//! [`TopicEvent`]s, and applied one at a time by whoever drives the
//! controller ([`SyncController::process_next`] or
//! [`SyncController::settle`]).

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use futures::future::{FutureExt, LocalBoxFuture};
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use kolokol_remote::{EventSink, RemoteStore, Subscription};
use kolokol_shared::{
    Chat, ChatId, CorrelationId, DeliveryStatus, Message, MessageId, MessageKind, NewChat,
    NewMessage, Reaction, ReactionSet, RemoteError, RemoteEvent, Topic, TopicEvent, User, UserId,
};

use crate::buffer::{OptimisticWriteBuffer, PendingWrite, Reconciliation, WriteState};
use crate::chat_index::ChatIndex;
use crate::config::SyncConfig;
use crate::directory::Directory;
use crate::error::{Result, SyncError};
use crate::events::SyncEvent;
use crate::message_log::MessageLog;
use crate::notices::{Notice, NoticeKind, Notices};
use crate::session::Session;
use crate::views::{ChatView, MessageView, SyncSnapshot};

/// A message about to be written, after validation.
struct Outgoing {
    chat_id: ChatId,
    content: String,
    kind: MessageKind,
    media_url: Option<String>,
    reply_to: Option<MessageId>,
    attachment: Option<Bytes>,
}

pub struct SyncController<R> {
    remote: Arc<R>,
    config: SyncConfig,
    session: Option<Session>,

    chats: ChatIndex,
    directory: Directory,
    buffer: OptimisticWriteBuffer,
    /// Log of the selected chat; `None` when nothing is selected.
    log: Option<MessageLog>,
    /// Bumped on every selection change; tags page requests.
    generation: u64,

    chats_sub: Option<Subscription>,
    status_sub: Option<Subscription>,
    messages_sub: Option<Subscription>,
    resubscribe_pending: bool,
    chats_loading: bool,

    notices: Notices,

    remote_tx: EventSink,
    remote_rx: mpsc::UnboundedReceiver<TopicEvent>,
    in_flight: FuturesUnordered<LocalBoxFuture<'static, SyncEvent>>,
}

impl<R> SyncController<R>
where
    R: RemoteStore + 'static,
{
    pub fn new(remote: Arc<R>, config: SyncConfig) -> Self {
        let (remote_tx, remote_rx) = mpsc::unbounded_channel();
        Self {
            remote,
            buffer: OptimisticWriteBuffer::new(config.reconcile_window),
            config,
            session: None,
            chats: ChatIndex::new(),
            directory: Directory::new(),
            log: None,
            generation: 0,
            chats_sub: None,
            status_sub: None,
            messages_sub: None,
            resubscribe_pending: false,
            chats_loading: false,
            notices: Notices::default(),
            remote_tx,
            remote_rx,
            in_flight: FuturesUnordered::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Session lifecycle
    // -----------------------------------------------------------------------

    /// Begin a session (login): subscribe to the user's chat and status
    /// topics and load the chat list. A running session is shut down first.
    pub fn start(&mut self, session: Session) {
        if self.session.is_some() {
            self.shutdown();
        }

        info!(user = %session.user_id(), "Session started");
        self.directory.upsert_all([session.user().clone()]);
        self.session = Some(session);

        self.open_session_subscriptions();
        self.request_chats();
    }

    /// End the session (logout). Every subscription is disposed, in-flight
    /// calls are abandoned and all in-memory state is cleared.
    pub fn shutdown(&mut self) {
        let subs = [
            self.messages_sub.take(),
            self.chats_sub.take(),
            self.status_sub.take(),
        ];
        for sub in subs.into_iter().flatten() {
            sub.unsubscribe();
        }

        self.in_flight = FuturesUnordered::new();
        while self.remote_rx.try_recv().is_ok() {}

        self.chats.clear();
        self.directory.clear();
        self.buffer.clear();
        self.log = None;
        self.notices.clear();
        self.generation += 1;
        self.resubscribe_pending = false;
        self.chats_loading = false;

        if let Some(session) = self.session.take() {
            info!(user = %session.user_id(), "Session ended");
        }
    }

    fn require_session(&self) -> Result<UserId> {
        self.user_id().cloned().ok_or(SyncError::NoSession)
    }

    fn open_session_subscriptions(&mut self) {
        let Some(user_id) = self.user_id().cloned() else {
            return;
        };
        if self.chats_sub.is_none() {
            self.chats_sub = self.open_subscription(Topic::Chats(user_id));
        }
        if self.status_sub.is_none() {
            self.status_sub = self.open_subscription(Topic::UserStatus);
        }
    }

    fn open_subscription(&mut self, topic: Topic) -> Option<Subscription> {
        match self.remote.subscribe(topic.clone(), self.remote_tx.clone()) {
            Ok(sub) => Some(sub),
            Err(e) => {
                warn!(topic = %topic, error = %e, "Subscription failed, retrying on next chat selection");
                self.notices
                    .push(NoticeKind::Subscription, SyncError::Subscription(e).to_string(), None);
                self.resubscribe_pending = true;
                None
            }
        }
    }

    fn track<F>(&mut self, call: F)
    where
        F: Future<Output = SyncEvent> + 'static,
    {
        self.in_flight.push(call.boxed_local());
    }

    fn request_chats(&mut self) {
        let Some(user_id) = self.user_id().cloned() else {
            return;
        };
        self.chats_loading = true;
        let remote = Arc::clone(&self.remote);
        self.track(async move { SyncEvent::ChatsLoaded(remote.fetch_chats(&user_id).await) });
    }

    fn request_users(&mut self, ids: Vec<UserId>) {
        if ids.is_empty() {
            return;
        }
        let remote = Arc::clone(&self.remote);
        self.track(async move { SyncEvent::UsersLoaded(remote.fetch_users(&ids).await) });
    }

    /// Reload the chat list from the backend.
    pub fn refresh_chats(&mut self) -> Result<()> {
        self.require_session()?;
        self.request_chats();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Selection and history
    // -----------------------------------------------------------------------

    /// Make `chat_id` the active conversation.
    ///
    /// The previous message subscription is released before a new one is
    /// opened, unread is reset and the first history page is requested.
    /// Selecting the active chat again does nothing, unless a subscription
    /// failed earlier: then this is the single retry.
    pub fn select_chat(&mut self, chat_id: &ChatId) -> Result<()> {
        self.require_session()?;

        let same = self.active_chat() == Some(chat_id);
        if same && self.messages_sub.is_some() && !self.resubscribe_pending {
            debug!(chat = %chat_id, "Chat already selected");
            return Ok(());
        }

        if self.resubscribe_pending {
            self.resubscribe_pending = false;
            self.open_session_subscriptions();
        }

        if !same {
            if let Some(old) = self.messages_sub.take() {
                old.unsubscribe();
            }
            self.generation += 1;

            let mut log = MessageLog::new(chat_id.clone());
            for write in self.buffer.for_chat(chat_id) {
                log.restore(write);
            }
            self.log = Some(log);
            info!(chat = %chat_id, generation = self.generation, "Chat selected");
        }

        self.chats.mark_read(chat_id);

        if self.messages_sub.is_none() {
            self.messages_sub = self.open_subscription(Topic::Messages(chat_id.clone()));
        }
        if !same {
            self.request_page();
        }
        Ok(())
    }

    /// Leave the active conversation and release its subscription.
    pub fn deselect_chat(&mut self) {
        if let Some(sub) = self.messages_sub.take() {
            sub.unsubscribe();
        }
        if let Some(log) = self.log.take() {
            debug!(chat = %log.chat_id(), "Chat deselected");
        }
        self.generation += 1;
    }

    /// Request the next older page of the active chat. Returns `false` when
    /// a page is already loading or history is exhausted.
    pub fn load_older(&mut self) -> Result<bool> {
        self.require_session()?;
        if self.log.is_none() {
            return Err(SyncError::Validation("no chat selected".into()));
        }
        Ok(self.request_page())
    }

    fn request_page(&mut self) -> bool {
        let Some(log) = self.log.as_mut() else {
            return false;
        };
        if !log.begin_page_load() {
            return false;
        }

        let chat_id = log.chat_id().clone();
        let before = log.next_cursor().cloned();
        let generation = self.generation;
        let limit = self.config.page_size;
        let remote = Arc::clone(&self.remote);

        debug!(chat = %chat_id, generation, first = before.is_none(), "Requesting history page");
        self.track(async move {
            let result = remote.fetch_messages(&chat_id, limit, before.as_ref()).await;
            SyncEvent::PageLoaded {
                chat_id,
                generation,
                requested: limit,
                result,
            }
        });
        true
    }

    // -----------------------------------------------------------------------
    // Sending
    // -----------------------------------------------------------------------

    /// Send a message. It is shown as pending at once; the returned
    /// correlation id identifies it until it is confirmed.
    ///
    /// For media kinds `content` is the reference of an already uploaded
    /// blob; use [`SyncController::send_media`] to upload one.
    pub fn send_message(
        &mut self,
        chat_id: &ChatId,
        content: &str,
        kind: MessageKind,
    ) -> Result<CorrelationId> {
        self.validate_content(content, kind)?;
        let media_url = kind.is_media().then(|| content.to_string());
        self.enqueue(Outgoing {
            chat_id: chat_id.clone(),
            content: content.to_string(),
            kind,
            media_url,
            reply_to: None,
            attachment: None,
        })
    }

    pub fn send_reply(
        &mut self,
        chat_id: &ChatId,
        content: &str,
        reply_to: &MessageId,
    ) -> Result<CorrelationId> {
        self.validate_content(content, MessageKind::Text)?;
        self.enqueue(Outgoing {
            chat_id: chat_id.clone(),
            content: content.to_string(),
            kind: MessageKind::Text,
            media_url: None,
            reply_to: Some(reply_to.clone()),
            attachment: None,
        })
    }

    /// Upload `blob` and send it as a `kind` message with an optional
    /// caption. Upload failures mark the message failed.
    pub fn send_media(
        &mut self,
        chat_id: &ChatId,
        blob: Bytes,
        kind: MessageKind,
        caption: &str,
    ) -> Result<CorrelationId> {
        self.require_session()?;
        if !kind.is_media() {
            return Err(SyncError::Validation(format!("{kind} is not a media kind")));
        }
        if blob.is_empty() {
            return Err(SyncError::Validation("attachment is empty".into()));
        }
        if blob.len() > self.config.max_media_bytes {
            return Err(SyncError::Validation(format!(
                "attachment too large: {} bytes (max {})",
                blob.len(),
                self.config.max_media_bytes
            )));
        }
        self.enqueue(Outgoing {
            chat_id: chat_id.clone(),
            content: caption.to_string(),
            kind,
            media_url: None,
            reply_to: None,
            attachment: Some(blob),
        })
    }

    fn validate_content(&self, content: &str, kind: MessageKind) -> Result<()> {
        self.require_session()?;
        if content.trim().is_empty() {
            let what = if kind.is_media() {
                "media reference is empty"
            } else {
                "message text is empty"
            };
            return Err(SyncError::Validation(what.into()));
        }
        Ok(())
    }

    fn enqueue(&mut self, outgoing: Outgoing) -> Result<CorrelationId> {
        let sender_id = self.require_session()?;
        let correlation_id = CorrelationId::new();

        let draft = Message {
            id: MessageId::local(&correlation_id),
            chat_id: outgoing.chat_id,
            sender_id,
            content: outgoing.content,
            kind: outgoing.kind,
            media_url: outgoing.media_url,
            reply_to: outgoing.reply_to,
            created_at: Utc::now(),
            status: DeliveryStatus::Sent,
            reactions: ReactionSet::new(),
            correlation_id: Some(correlation_id),
        };
        let state = if outgoing.attachment.is_some() {
            WriteState::Uploading
        } else {
            WriteState::InFlight
        };
        let write = PendingWrite {
            correlation_id,
            message: draft,
            attachment: outgoing.attachment,
            state,
        };

        if let Some(log) = self.log.as_mut() {
            log.insert_pending(write.message.clone(), correlation_id);
        }
        self.dispatch(&write);
        self.buffer.insert(write);

        info!(correlation = %correlation_id, "Message queued");
        Ok(correlation_id)
    }

    fn dispatch(&mut self, write: &PendingWrite) {
        let remote = Arc::clone(&self.remote);
        let correlation_id = write.correlation_id;

        match &write.attachment {
            Some(blob) => {
                let owner = write.message.sender_id.clone();
                let blob = blob.clone();
                let kind = write.message.kind;
                debug!(correlation = %correlation_id, size = blob.len(), "Uploading attachment");
                self.track(async move {
                    let result = remote.upload_media(&owner, blob, kind).await;
                    SyncEvent::MediaUploaded {
                        correlation_id,
                        result,
                    }
                });
            }
            None => {
                let m = &write.message;
                let request = NewMessage {
                    chat_id: m.chat_id.clone(),
                    sender_id: m.sender_id.clone(),
                    content: m.content.clone(),
                    kind: m.kind,
                    media_url: m.media_url.clone(),
                    reply_to: m.reply_to.clone(),
                    correlation_id,
                };
                self.track(async move {
                    let result = remote.send_message(request).await;
                    SyncEvent::SendCompleted {
                        correlation_id,
                        result,
                    }
                });
            }
        }
    }

    /// Send a failed message again. The failed entry is replaced by a new
    /// pending one with a fresh correlation id, which is returned.
    pub fn retry(&mut self, correlation_id: &CorrelationId) -> Result<CorrelationId> {
        self.require_session()?;
        let write = self
            .buffer
            .get(correlation_id)
            .ok_or(SyncError::UnknownPending(*correlation_id))?;
        if !write.is_failed() {
            return Err(SyncError::NotRetryable(*correlation_id));
        }

        let write = self
            .buffer
            .expire(correlation_id)
            .ok_or(SyncError::UnknownPending(*correlation_id))?;
        if let Some(log) = self.log.as_mut() {
            log.remove_pending(correlation_id);
        }

        info!(correlation = %correlation_id, "Retrying failed write");
        let m = write.message;
        self.enqueue(Outgoing {
            chat_id: m.chat_id,
            content: m.content,
            kind: m.kind,
            media_url: m.media_url,
            reply_to: m.reply_to,
            attachment: write.attachment,
        })
    }

    /// Discard a failed message.
    pub fn expire(&mut self, correlation_id: &CorrelationId) -> Result<()> {
        let write = self
            .buffer
            .get(correlation_id)
            .ok_or(SyncError::UnknownPending(*correlation_id))?;
        if !write.is_failed() {
            return Err(SyncError::StillInFlight(*correlation_id));
        }

        self.buffer.expire(correlation_id);
        if let Some(log) = self.log.as_mut() {
            log.remove_pending(correlation_id);
        }
        info!(correlation = %correlation_id, "Failed write discarded");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Chats and reactions
    // -----------------------------------------------------------------------

    /// Open a direct chat with `participants` (the user is added implicitly).
    pub fn create_chat(&mut self, participants: &[UserId]) -> Result<()> {
        let creator = self.require_session()?;
        let participants: Vec<UserId> = participants
            .iter()
            .filter(|p| **p != creator)
            .cloned()
            .collect();
        if participants.is_empty() {
            return Err(SyncError::Validation("a chat needs another participant".into()));
        }
        self.request_chat(NewChat {
            creator,
            participants,
            is_group: false,
            name: None,
            description: None,
        });
        Ok(())
    }

    pub fn create_group(
        &mut self,
        name: &str,
        participants: &[UserId],
        description: Option<&str>,
    ) -> Result<()> {
        let creator = self.require_session()?;
        if name.trim().is_empty() {
            return Err(SyncError::Validation("group name is empty".into()));
        }
        if participants.is_empty() {
            return Err(SyncError::Validation("a group needs participants".into()));
        }
        self.request_chat(NewChat {
            creator,
            participants: participants.to_vec(),
            is_group: true,
            name: Some(name.trim().to_string()),
            description: description.map(str::to_string),
        });
        Ok(())
    }

    fn request_chat(&mut self, request: NewChat) {
        let remote = Arc::clone(&self.remote);
        self.track(async move { SyncEvent::ChatCreated(remote.create_chat(request).await) });
    }

    pub fn add_reaction(&mut self, message_id: &MessageId, emoji: &str) -> Result<()> {
        self.react(message_id, emoji, true)
    }

    pub fn remove_reaction(&mut self, message_id: &MessageId, emoji: &str) -> Result<()> {
        self.react(message_id, emoji, false)
    }

    // Applied optimistically, reverted if the backend refuses.
    fn react(&mut self, message_id: &MessageId, emoji: &str, added: bool) -> Result<()> {
        let user_id = self.require_session()?;
        if emoji.trim().is_empty() {
            return Err(SyncError::Validation("emoji is empty".into()));
        }
        if message_id.is_local() {
            return Err(SyncError::Validation(
                "cannot react to an unconfirmed message".into(),
            ));
        }

        let log = self
            .log
            .as_mut()
            .filter(|log| log.message(message_id).is_some())
            .ok_or_else(|| SyncError::UnknownMessage(message_id.clone()))?;

        let reaction = Reaction {
            message_id: message_id.clone(),
            user_id,
            emoji: emoji.to_string(),
        };
        if !log.apply_reaction(&reaction, added) {
            debug!(id = %message_id, emoji, added, "Reaction already in requested state");
            return Ok(());
        }

        let remote = Arc::clone(&self.remote);
        self.track(async move {
            let result = if added {
                remote.add_reaction(reaction.clone()).await
            } else {
                remote.remove_reaction(reaction.clone()).await
            };
            SyncEvent::ReactionCompleted {
                reaction,
                added,
                result,
            }
        });
        Ok(())
    }

    pub fn dismiss_notice(&mut self, id: u64) -> bool {
        self.notices.dismiss(id)
    }

    // -----------------------------------------------------------------------
    // Event routing
    // -----------------------------------------------------------------------

    /// Apply one event. Events arriving without a session are dropped.
    pub fn handle_event(&mut self, event: SyncEvent) {
        if self.session.is_none() {
            debug!(event = ?event, "Dropping event outside of a session");
            return;
        }

        match event {
            SyncEvent::Remote(TopicEvent { topic, event }) => self.on_remote(topic, event),
            SyncEvent::ChatsLoaded(result) => self.on_chats_loaded(result),
            SyncEvent::UsersLoaded(Ok(users)) => self.directory.upsert_all(users),
            SyncEvent::UsersLoaded(Err(e)) => {
                warn!(error = %e, "Failed to load user profiles");
            }
            SyncEvent::PageLoaded {
                chat_id,
                generation,
                requested,
                result,
            } => self.on_page_loaded(chat_id, generation, requested, result),
            SyncEvent::MediaUploaded {
                correlation_id,
                result,
            } => self.on_media_uploaded(correlation_id, result),
            SyncEvent::SendCompleted {
                correlation_id,
                result,
            } => self.on_send_completed(correlation_id, result),
            SyncEvent::ChatCreated(Ok(chat)) => {
                info!(chat = %chat.id, group = chat.is_group, "Chat created");
                self.on_chat_changed(chat);
            }
            SyncEvent::ChatCreated(Err(e)) => {
                warn!(error = %e, "Failed to create chat");
                self.notices.push(
                    NoticeKind::RemoteWrite,
                    SyncError::RemoteWrite(e).to_string(),
                    None,
                );
            }
            SyncEvent::ReactionCompleted {
                reaction,
                added,
                result,
            } => self.on_reaction_completed(reaction, added, result),
        }
    }

    fn on_remote(&mut self, topic: Topic, event: RemoteEvent) {
        match (topic, event) {
            (Topic::Chats(_), RemoteEvent::ChatChanged(chat)) => self.on_chat_changed(chat),
            (Topic::Chats(_), RemoteEvent::ChatActivity(message)) => {
                self.on_chat_activity(message)
            }
            (Topic::Messages(chat_id), event) => {
                if self.active_chat() != Some(&chat_id) {
                    debug!(chat = %chat_id, "Dropping event of a chat that is no longer selected");
                    return;
                }
                match event {
                    RemoteEvent::MessageCreated(message) => self.apply_confirmed(message),
                    RemoteEvent::ReactionAdded(reaction) => {
                        if let Some(log) = self.log.as_mut() {
                            log.apply_reaction(&reaction, true);
                        }
                    }
                    RemoteEvent::ReactionRemoved(reaction) => {
                        if let Some(log) = self.log.as_mut() {
                            log.apply_reaction(&reaction, false);
                        }
                    }
                    other => debug!(event = ?other, "Unexpected event on a message topic"),
                }
            }
            (
                Topic::UserStatus,
                RemoteEvent::UserStatusChanged {
                    user_id,
                    is_online,
                    last_seen,
                },
            ) => {
                self.directory.apply_status(&user_id, is_online, last_seen);
            }
            (topic, event) => debug!(topic = %topic, event = ?event, "Ignoring unexpected event"),
        }
    }

    fn upsert_chat(&mut self, mut chat: Chat) {
        if self.active_chat() == Some(&chat.id) {
            chat.unread_count = 0;
        }
        let chat_id = chat.id.clone();
        let inserted = self.chats.upsert(chat);
        debug!(chat = %chat_id, inserted, "Chat upserted");
    }

    fn on_chat_changed(&mut self, chat: Chat) {
        let missing = self.directory.missing([&chat]);
        self.upsert_chat(chat);
        self.request_users(missing);
    }

    fn on_chats_loaded(&mut self, result: std::result::Result<Vec<Chat>, RemoteError>) {
        self.chats_loading = false;
        match result {
            Ok(chats) => {
                info!(count = chats.len(), "Chat list loaded");
                let missing = self.directory.missing(chats.iter());
                for chat in chats {
                    self.upsert_chat(chat);
                }
                self.request_users(missing);
            }
            Err(e) => {
                warn!(error = %e, "Failed to load chats");
                self.notices
                    .push(NoticeKind::Query, SyncError::Query(e).to_string(), None);
            }
        }
    }

    // Unread is counted here only: once per inbound message of a chat that
    // is not selected.
    fn on_chat_activity(&mut self, message: Message) {
        let Some(me) = self.user_id().cloned() else {
            return;
        };
        let active = self.active_chat() == Some(&message.chat_id);

        if !active && message.sender_id == me {
            // Confirmation of a send made while another chat was selected.
            self.buffer.reconcile(&message);
        }

        let inbound = message.sender_id != me;
        if !self.chats.contains(&message.chat_id) {
            debug!(chat = %message.chat_id, "Activity in an unknown chat, reloading chat list");
            if !self.chats_loading {
                self.request_chats();
            }
            return;
        }
        self.chats
            .touch(&message.chat_id, &message, inbound && !active);
    }

    /// Reconcile an authoritative message with the pending writes and the
    /// active log. Safe to call any number of times for the same message.
    fn apply_confirmed(&mut self, message: Message) {
        let reconciled = self.buffer.reconcile(&message);

        if let Some(log) = self
            .log
            .as_mut()
            .filter(|log| log.chat_id() == &message.chat_id)
        {
            match &reconciled {
                Reconciliation::Matched(write) => {
                    log.confirm(&write.correlation_id, message.clone());
                }
                Reconciliation::Unmatched => {
                    log.append(message.clone());
                }
            }
        }

        self.chats.touch(&message.chat_id, &message, false);
    }

    fn on_send_completed(
        &mut self,
        correlation_id: CorrelationId,
        result: std::result::Result<Message, RemoteError>,
    ) {
        match result {
            Ok(mut message) => {
                debug!(correlation = %correlation_id, id = %message.id, "Send confirmed");
                if message.correlation_id.is_none() {
                    message.correlation_id = Some(correlation_id);
                }
                self.apply_confirmed(message);
            }
            Err(e) => self.fail_write(correlation_id, SyncError::RemoteWrite(e)),
        }
    }

    fn on_media_uploaded(
        &mut self,
        correlation_id: CorrelationId,
        result: std::result::Result<String, RemoteError>,
    ) {
        match result {
            Ok(url) => {
                if !self.buffer.set_media_url(&correlation_id, &url) {
                    debug!(correlation = %correlation_id, "Upload finished for a discarded write");
                    return;
                }
                self.buffer.mark_in_flight(&correlation_id);
                if let Some(log) = self.log.as_mut() {
                    log.set_pending_media(&correlation_id, &url);
                }
                if let Some(write) = self.buffer.get(&correlation_id).cloned() {
                    self.dispatch(&write);
                }
            }
            Err(e) => self.fail_write(correlation_id, SyncError::Upload(e)),
        }
    }

    fn fail_write(&mut self, correlation_id: CorrelationId, error: SyncError) {
        let kind = match error {
            SyncError::Upload(_) => NoticeKind::Upload,
            _ => NoticeKind::RemoteWrite,
        };
        let reason = error.to_string();
        warn!(correlation = %correlation_id, error = %reason, "Write failed");

        let known = self.buffer.mark_failed(&correlation_id, &reason);
        if let Some(log) = self.log.as_mut() {
            log.mark_failed(&correlation_id, &reason);
        }
        if known {
            self.notices.push(kind, reason, Some(correlation_id));
        }
    }

    fn on_page_loaded(
        &mut self,
        chat_id: ChatId,
        generation: u64,
        requested: usize,
        result: std::result::Result<Vec<Message>, RemoteError>,
    ) {
        let current = self.generation;
        let Some(log) = self
            .log
            .as_mut()
            .filter(|log| log.chat_id() == &chat_id && generation == current)
        else {
            debug!(chat = %chat_id, generation, current, "Discarding stale history page");
            return;
        };

        match result {
            Ok(page) => {
                // Drafts the page already contains are confirmed by it.
                for message in &page {
                    if let Reconciliation::Matched(write) = self.buffer.reconcile(message) {
                        log.remove_pending(&write.correlation_id);
                    }
                }
                log.merge_page(page, requested);
            }
            Err(e) => {
                log.finish_page_load();
                warn!(chat = %chat_id, error = %e, "Failed to load history page");
                self.notices
                    .push(NoticeKind::Query, SyncError::Query(e).to_string(), None);
            }
        }
    }

    fn on_reaction_completed(
        &mut self,
        reaction: Reaction,
        added: bool,
        result: std::result::Result<(), RemoteError>,
    ) {
        let Err(e) = result else {
            return;
        };
        warn!(id = %reaction.message_id, emoji = %reaction.emoji, error = %e, "Reaction write failed");
        if let Some(log) = self.log.as_mut() {
            log.apply_reaction(&reaction, !added);
        }
        self.notices.push(
            NoticeKind::RemoteWrite,
            SyncError::RemoteWrite(e).to_string(),
            None,
        );
    }

    // -----------------------------------------------------------------------
    // Driving
    // -----------------------------------------------------------------------

    /// Wait for the next pushed event or call completion.
    pub async fn next_event(&mut self) -> Option<SyncEvent> {
        if let Ok(event) = self.remote_rx.try_recv() {
            return Some(SyncEvent::Remote(event));
        }
        if self.in_flight.is_empty() {
            return self.remote_rx.recv().await.map(SyncEvent::Remote);
        }
        tokio::select! {
            Some(event) = self.remote_rx.recv() => Some(SyncEvent::Remote(event)),
            Some(event) = self.in_flight.next() => Some(event),
            else => None,
        }
    }

    /// Wait for and apply one event.
    pub async fn process_next(&mut self) -> bool {
        match self.next_event().await {
            Some(event) => {
                self.handle_event(event);
                true
            }
            None => false,
        }
    }

    /// Apply events until no remote call is outstanding and nothing is
    /// queued.
    pub async fn settle(&mut self) {
        loop {
            while let Ok(event) = self.remote_rx.try_recv() {
                self.handle_event(SyncEvent::Remote(event));
            }
            match self.in_flight.next().await {
                Some(event) => self.handle_event(event),
                None => break,
            }
        }
    }

    // -----------------------------------------------------------------------
    // Read model
    // -----------------------------------------------------------------------

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn user_id(&self) -> Option<&UserId> {
        self.session.as_ref().map(Session::user_id)
    }

    pub fn active_chat(&self) -> Option<&ChatId> {
        self.log.as_ref().map(MessageLog::chat_id)
    }

    pub fn chats(&self) -> &ChatIndex {
        &self.chats
    }

    pub fn messages(&self) -> Option<&MessageLog> {
        self.log.as_ref()
    }

    pub fn pending(&self) -> &OptimisticWriteBuffer {
        &self.buffer
    }

    pub fn notices(&self) -> &[Notice] {
        self.notices.items()
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn user(&self, id: &UserId) -> Option<&User> {
        self.directory.get(id)
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn is_loading(&self) -> bool {
        self.chats_loading || self.log.as_ref().map_or(false, MessageLog::is_loading)
    }

    /// Whether remote calls are still outstanding.
    pub fn has_in_flight(&self) -> bool {
        !self.in_flight.is_empty()
    }

    pub fn snapshot(&self) -> SyncSnapshot {
        let me = self.user_id().cloned();

        let chats = match &me {
            Some(me) => self
                .chats
                .chats()
                .iter()
                .map(|c| ChatView::from_chat(c, me, &self.directory))
                .collect(),
            None => Vec::new(),
        };
        let messages = match (&me, &self.log) {
            (Some(me), Some(log)) => log
                .entries()
                .iter()
                .map(|e| MessageView::from_entry(e, me, &self.directory))
                .collect(),
            _ => Vec::new(),
        };

        SyncSnapshot {
            user_id: me,
            active_chat: self.active_chat().cloned(),
            chats,
            messages,
            loading_history: self.log.as_ref().map_or(false, MessageLog::is_loading),
            history_exhausted: self.log.as_ref().map_or(false, MessageLog::is_exhausted),
            pending_writes: self.buffer.len(),
            notices: self.notices.items().to_vec(),
        }
    }
}
