//! Sync layer configuration loaded from environment variables.
//!
//! Every setting has a default, so an empty environment is valid.

use std::time::Duration;

use kolokol_shared::constants::{DEFAULT_PAGE_SIZE, DEFAULT_RECONCILE_WINDOW_MS, MAX_MEDIA_SIZE};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Messages requested per history page.
    /// Env: `KOLOKOL_PAGE_SIZE`
    /// Default: `50`
    pub page_size: usize,

    /// How far apart a pending write and an uncorrelated confirmation may be
    /// and still be matched by content.
    /// Env: `KOLOKOL_RECONCILE_WINDOW_MS`
    /// Default: `30000`
    pub reconcile_window: Duration,

    /// Largest blob accepted by `send_media`.
    /// Env: `KOLOKOL_MAX_MEDIA_BYTES`
    /// Default: 50 MiB
    pub max_media_bytes: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            reconcile_window: Duration::from_millis(DEFAULT_RECONCILE_WINDOW_MS),
            max_media_bytes: MAX_MEDIA_SIZE,
        }
    }
}

impl SyncConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(val) = lookup("KOLOKOL_PAGE_SIZE") {
            match val.trim().parse::<usize>() {
                Ok(n) if n > 0 => config.page_size = n,
                _ => tracing::warn!(value = %val, "Invalid KOLOKOL_PAGE_SIZE, using default"),
            }
        }

        if let Some(val) = lookup("KOLOKOL_RECONCILE_WINDOW_MS") {
            match val.trim().parse::<u64>() {
                Ok(ms) => config.reconcile_window = Duration::from_millis(ms),
                Err(_) => tracing::warn!(
                    value = %val,
                    "Invalid KOLOKOL_RECONCILE_WINDOW_MS, using default"
                ),
            }
        }

        if let Some(val) = lookup("KOLOKOL_MAX_MEDIA_BYTES") {
            match val.trim().parse::<usize>() {
                Ok(n) if n > 0 => config.max_media_bytes = n,
                _ => tracing::warn!(value = %val, "Invalid KOLOKOL_MAX_MEDIA_BYTES, using default"),
            }
        }

        config
    }
}
