//! # kolokol-client
//!
//! Headless Kolokol client. Runs a scripted session against the in-memory
//! backend and prints what the presentation layer would render.
//!
//! - `RUST_LOG` controls log output
//! - `KOLOKOL_USER` picks the demo account to log in as (default `1`)
//! - `KOLOKOL_PAGE_SIZE`, `KOLOKOL_RECONCILE_WINDOW_MS` and
//!   `KOLOKOL_MAX_MEDIA_BYTES` tune the sync layer

mod demo;

use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use kolokol_remote::InMemoryStore;
use kolokol_shared::constants::APP_NAME;
use kolokol_shared::UserId;
use kolokol_sync::{Session, SyncConfig, SyncController};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new("info,kolokol_sync=debug,kolokol_remote=debug")
            }),
        )
        .init();

    info!("Starting {} client v{}", APP_NAME, env!("CARGO_PKG_VERSION"));

    let config = SyncConfig::from_env();
    info!(?config, "Loaded configuration");

    let user_id = UserId::new(std::env::var("KOLOKOL_USER").unwrap_or_else(|_| "1".into()));
    let store = InMemoryStore::with_demo_data();
    let user = store
        .user(&user_id)
        .with_context(|| format!("unknown demo user {user_id}"))?;

    let mut sync = SyncController::new(Arc::new(store.clone()), config);
    sync.start(Session::new(user));

    demo::run(&store, &mut sync).await?;

    sync.shutdown();
    info!("Session closed");
    Ok(())
}
