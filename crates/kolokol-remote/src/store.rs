use std::future::Future;

use bytes::Bytes;

use kolokol_shared::{
    Chat, ChatId, Message, MessageKind, NewChat, NewMessage, PageCursor, Reaction, RemoteError,
    Topic, User, UserId,
};

use crate::subscription::{EventSink, Subscription};

/// The hosted backend: authentication-free view of relational storage, file
/// storage and realtime change notification.
///
/// Every call is non-blocking; completion is observed by awaiting the
/// returned future.
pub trait RemoteStore {
    fn fetch_chats(&self, user_id: &UserId)
        -> impl Future<Output = Result<Vec<Chat>, RemoteError>>;

    fn fetch_users(&self, ids: &[UserId]) -> impl Future<Output = Result<Vec<User>, RemoteError>>;

    /// Messages of `chat_id` strictly older than `before`, newest first, at
    /// most `limit` of them.
    fn fetch_messages(
        &self,
        chat_id: &ChatId,
        limit: usize,
        before: Option<&PageCursor>,
    ) -> impl Future<Output = Result<Vec<Message>, RemoteError>>;

    fn send_message(
        &self,
        message: NewMessage,
    ) -> impl Future<Output = Result<Message, RemoteError>>;

    fn create_chat(&self, chat: NewChat) -> impl Future<Output = Result<Chat, RemoteError>>;

    fn add_reaction(&self, reaction: Reaction) -> impl Future<Output = Result<(), RemoteError>>;

    fn remove_reaction(&self, reaction: Reaction)
        -> impl Future<Output = Result<(), RemoteError>>;

    /// Store a blob and return the URL it can be fetched from.
    fn upload_media(
        &self,
        owner: &UserId,
        blob: Bytes,
        kind: MessageKind,
    ) -> impl Future<Output = Result<String, RemoteError>>;

    /// Start delivering events of `topic` into `sink` until the returned
    /// handle is disposed.
    fn subscribe(&self, topic: Topic, sink: EventSink) -> Result<Subscription, RemoteError>;
}
