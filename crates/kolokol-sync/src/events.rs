use kolokol_shared::{Chat, ChatId, CorrelationId, Message, Reaction, RemoteError, TopicEvent, User};

/// Everything that can change the controller's state after an action
/// returned: pushed notifications and completions of remote calls.
#[derive(Debug)]
pub enum SyncEvent {
    Remote(TopicEvent),

    ChatsLoaded(Result<Vec<Chat>, RemoteError>),

    UsersLoaded(Result<Vec<User>, RemoteError>),

    /// `generation` is the selection counter at request time.
    PageLoaded {
        chat_id: ChatId,
        generation: u64,
        requested: usize,
        result: Result<Vec<Message>, RemoteError>,
    },

    MediaUploaded {
        correlation_id: CorrelationId,
        result: Result<String, RemoteError>,
    },

    SendCompleted {
        correlation_id: CorrelationId,
        result: Result<Message, RemoteError>,
    },

    ChatCreated(Result<Chat, RemoteError>),

    ReactionCompleted {
        reaction: Reaction,
        added: bool,
        result: Result<(), RemoteError>,
    },
}
