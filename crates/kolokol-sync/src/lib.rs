//! # kolokol-sync
//!
//! Client-side synchronization core: keeps the chat list and the active
//! conversation consistent with the remote store while the user is sending,
//! scrolling and switching chats.
//!
//! Everything funnels through [`SyncController`]. It shows writes
//! optimistically, reconciles them with their confirmations exactly once,
//! holds at most one message subscription (for the selected chat) and drops
//! history pages that arrive after the selection moved on.

pub mod buffer;
pub mod chat_index;
pub mod config;
pub mod controller;
pub mod directory;
pub mod error;
pub mod events;
pub mod message_log;
pub mod notices;
pub mod session;
pub mod views;

pub use buffer::{OptimisticWriteBuffer, PendingWrite, Reconciliation, WriteState};
pub use chat_index::ChatIndex;
pub use config::SyncConfig;
pub use controller::SyncController;
pub use directory::Directory;
pub use error::{Result, SyncError};
pub use events::SyncEvent;
pub use message_log::{EntryState, LogEntry, MessageLog};
pub use notices::{Notice, NoticeKind, Notices};
pub use session::Session;
pub use views::{ChatView, MessageView, ReactionCount, SyncSnapshot};
