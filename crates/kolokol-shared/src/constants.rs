/// Application name
pub const APP_NAME: &str = "Kolokol";

/// Prefix of message ids assigned locally before confirmation
pub const LOCAL_MESSAGE_PREFIX: &str = "local:";

/// Default number of messages per history page
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Default window (milliseconds) in which an uncorrelated confirmation may
/// match a pending write by content
pub const DEFAULT_RECONCILE_WINDOW_MS: u64 = 30_000;

/// Maximum media upload size in bytes (50 MiB)
pub const MAX_MEDIA_SIZE: usize = 50 * 1024 * 1024;
