use anyhow::{bail, Context};
use bytes::Bytes;
use futures::StreamExt;
use tracing::info;

use kolokol_remote::{history, InMemoryStore};
use kolokol_shared::{ChatId, MessageKind, UserId};
use kolokol_sync::SyncController;

type Controller = SyncController<InMemoryStore>;

/// Walk through a typical session: open a chat, talk, lose the backend for a
/// moment and recover.
pub async fn run(store: &InMemoryStore, sync: &mut Controller) -> anyhow::Result<()> {
    sync.settle().await;
    print_snapshot("chat list", sync)?;

    let chat_id = sync
        .chats()
        .chats()
        .first()
        .map(|c| c.id.clone())
        .context("the demo user has no chats")?;
    sync.select_chat(&chat_id)?;
    sync.settle().await;

    sync.send_message(&chat_id, "Привет", MessageKind::Text)?;
    sync.settle().await;

    let partner = counterpart(sync, &chat_id)?;
    let incoming = store
        .simulate_incoming(&chat_id, &partner, "Привет! Что нового?")
        .await?;
    sync.settle().await;

    sync.add_reaction(&incoming.id, "👍")?;
    sync.send_media(
        &chat_id,
        Bytes::from_static(b"\x89PNG demo picture"),
        MessageKind::Image,
        "Фото с прогулки",
    )?;
    sync.settle().await;
    print_snapshot("after chatting", sync)?;

    info!("Backend goes offline");
    store.set_reject_writes(true);
    let failed = sync.send_message(&chat_id, "Ты здесь?", MessageKind::Text)?;
    sync.settle().await;
    print_snapshot("offline", sync)?;

    info!("Backend is back");
    store.set_reject_writes(false);
    sync.retry(&failed)?;
    sync.settle().await;
    let notices: Vec<u64> = sync.notices().iter().map(|n| n.id).collect();
    for id in notices {
        sync.dismiss_notice(id);
    }
    print_snapshot("recovered", sync)?;

    let page_size = sync.config().page_size;
    let mut pages = Box::pin(history(store, chat_id.clone(), page_size, None));
    let mut total = 0;
    while let Some(page) = pages.next().await {
        total += page?.len();
    }
    info!(chat = %chat_id, total, "Full history walked");

    Ok(())
}

fn counterpart(sync: &Controller, chat_id: &ChatId) -> anyhow::Result<UserId> {
    let me = sync.user_id().context("no session")?;
    let chat = sync.chats().get(chat_id).context("selected chat vanished")?;
    match chat.participants.iter().find(|p| *p != me) {
        Some(other) => Ok(other.clone()),
        None => bail!("chat {chat_id} has no other participant"),
    }
}

fn print_snapshot(label: &str, sync: &Controller) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(&sync.snapshot())?;
    println!("=== {label} ===\n{json}");
    Ok(())
}
