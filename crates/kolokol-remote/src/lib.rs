//! # kolokol-remote
//!
//! The contract of the hosted backend the sync core talks to, the
//! subscription plumbing that carries its change notifications, cursor
//! paging over message history, and an in-memory implementation of the whole
//! contract.

pub mod memory;
pub mod paging;
pub mod store;
pub mod subscription;

pub use memory::InMemoryStore;
pub use paging::history;
pub use store::RemoteStore;
pub use subscription::{EventSink, Subscription, SubscriptionHub};
