//! # kolokol-shared
//!
//! Identifiers, domain models and the remote-store protocol types shared by
//! every Kolokol crate.

pub mod constants;
pub mod error;
pub mod models;
pub mod protocol;
pub mod types;

pub use error::RemoteError;
pub use models::*;
pub use protocol::*;
pub use types::*;
