use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;
use kolokol_remote::InMemoryStore;
use kolokol_shared::{
    ChatId, CorrelationId, MessageId, MessageKind, Reaction, RemoteEvent, Topic, TopicEvent,
    UserId,
};
use kolokol_sync::{
    EntryState, NoticeKind, Session, SyncConfig, SyncController, SyncError, SyncEvent,
};

type Controller = SyncController<InMemoryStore>;

fn chat(id: &str) -> ChatId {
    ChatId::from(id)
}

fn user(id: &str) -> UserId {
    UserId::from(id)
}

fn controller(store: &InMemoryStore, config: SyncConfig) -> Controller {
    SyncController::new(Arc::new(store.clone()), config)
}

fn ivan(store: &InMemoryStore) -> Session {
    Session::new(store.user(&user("1")).expect("demo user"))
}

async fn logged_in_with(store: &InMemoryStore, config: SyncConfig) -> Controller {
    let mut sync = controller(store, config);
    sync.start(ivan(store));
    sync.settle().await;
    sync
}

async fn logged_in() -> (InMemoryStore, Controller) {
    let store = InMemoryStore::with_demo_data();
    let sync = logged_in_with(&store, SyncConfig::default()).await;
    (store, sync)
}

async fn in_chat(id: &str) -> (InMemoryStore, Controller) {
    let (store, mut sync) = logged_in().await;
    sync.select_chat(&chat(id)).unwrap();
    sync.settle().await;
    (store, sync)
}

fn contents(sync: &Controller) -> Vec<String> {
    sync.messages()
        .map(|log| {
            log.entries()
                .iter()
                .map(|e| e.message.content.clone())
                .collect()
        })
        .unwrap_or_default()
}

fn count_content(sync: &Controller, content: &str) -> usize {
    contents(sync).iter().filter(|c| *c == content).count()
}

fn unread(sync: &Controller, id: &str) -> u32 {
    sync.chats().get(&chat(id)).expect("chat").unread_count
}

fn entry_state(sync: &Controller, correlation_id: &CorrelationId) -> Option<EntryState> {
    sync.messages()?
        .entry_by_correlation(correlation_id)
        .map(|e| e.state.clone())
}

// ---------------------------------------------------------------------------
// Session and chat list
// ---------------------------------------------------------------------------

#[tokio::test]
async fn login_loads_chats_and_profiles() {
    let (store, sync) = logged_in().await;

    let order: Vec<&str> = sync.chats().chats().iter().map(|c| c.id.as_str()).collect();
    assert_eq!(order, vec!["1", "2"]);
    assert_eq!(unread(&sync, "1"), 2);

    for id in ["2", "3", "4", "5"] {
        assert!(sync.directory().contains(&user(id)), "profile {id} missing");
    }
    assert_eq!(store.listener_count(&Topic::Chats(user("1"))), 1);
    assert_eq!(store.listener_count(&Topic::UserStatus), 1);
    assert!(!sync.has_in_flight());
}

#[tokio::test]
async fn logout_disposes_every_subscription() {
    let (store, mut sync) = in_chat("1").await;
    assert_eq!(store.listener_count(&Topic::Messages(chat("1"))), 1);

    sync.shutdown();

    assert_eq!(store.listener_count(&Topic::Chats(user("1"))), 0);
    assert_eq!(store.listener_count(&Topic::UserStatus), 0);
    assert_eq!(store.listener_count(&Topic::Messages(chat("1"))), 0);
    assert!(sync.session().is_none());
    assert!(sync.chats().is_empty());
    assert!(sync.messages().is_none());

    // Writes after logout are refused.
    assert_eq!(
        sync.send_message(&chat("1"), "Привет", MessageKind::Text),
        Err(SyncError::NoSession)
    );
}

#[tokio::test]
async fn restarting_a_session_does_not_leak_subscriptions() {
    let (store, mut sync) = in_chat("1").await;
    sync.start(ivan(&store));
    sync.settle().await;

    assert_eq!(store.listener_count(&Topic::Chats(user("1"))), 1);
    assert_eq!(store.listener_count(&Topic::Messages(chat("1"))), 0);
    assert_eq!(sync.chats().len(), 2);
}

#[tokio::test]
async fn presence_changes_reach_the_directory() {
    let (store, mut sync) = logged_in().await;
    store.set_user_online(&user("2"), true);
    sync.settle().await;

    assert!(sync.user(&user("2")).unwrap().is_online);
    let view = sync
        .snapshot()
        .chats
        .into_iter()
        .find(|c| c.id == chat("1"))
        .unwrap();
    assert_eq!(view.is_online, Some(true));
    assert_eq!(view.name, "Анна Петрова");
}

#[tokio::test]
async fn created_chats_join_the_index() {
    let (_store, mut sync) = logged_in().await;

    sync.create_chat(&[user("3")]).unwrap();
    sync.create_group("Выходные", &[user("2"), user("4")], Some("Планы"))
        .unwrap();
    sync.settle().await;

    assert_eq!(sync.chats().len(), 4);
    let group = sync
        .chats()
        .chats()
        .iter()
        .find(|c| c.name.as_deref() == Some("Выходные"))
        .expect("group chat");
    assert!(group.is_group);
    assert_eq!(group.participants.len(), 3);

    // Asking for the same direct chat again returns the existing one.
    sync.create_chat(&[user("3")]).unwrap();
    sync.settle().await;
    assert_eq!(sync.chats().len(), 4);
}

#[tokio::test]
async fn chat_creation_is_validated() {
    let (_store, mut sync) = logged_in().await;
    assert!(matches!(
        sync.create_chat(&[user("1")]),
        Err(SyncError::Validation(_))
    ));
    assert!(matches!(
        sync.create_group("  ", &[user("2")], None),
        Err(SyncError::Validation(_))
    ));
    assert!(matches!(
        sync.create_group("Пусто", &[], None),
        Err(SyncError::Validation(_))
    ));
}

// ---------------------------------------------------------------------------
// Selection and history
// ---------------------------------------------------------------------------

#[tokio::test]
async fn selecting_a_chat_loads_history_and_clears_unread() {
    let (store, sync) = in_chat("1").await;

    assert_eq!(sync.active_chat(), Some(&chat("1")));
    assert_eq!(
        contents(&sync),
        vec!["Привет! Как дела?", "Привет! Всё отлично, спасибо!"]
    );
    assert_eq!(unread(&sync, "1"), 0);
    assert!(sync.messages().unwrap().is_exhausted());
    assert_eq!(store.listener_count(&Topic::Messages(chat("1"))), 1);
}

#[tokio::test]
async fn selecting_the_active_chat_again_is_a_no_op() {
    let (store, mut sync) = in_chat("1").await;

    sync.select_chat(&chat("1")).unwrap();
    assert!(!sync.has_in_flight());
    sync.settle().await;

    assert_eq!(store.listener_count(&Topic::Messages(chat("1"))), 1);
    assert_eq!(sync.messages().unwrap().len(), 2);
}

#[tokio::test]
async fn switching_chats_moves_the_subscription() {
    let (store, mut sync) = in_chat("1").await;

    sync.select_chat(&chat("2")).unwrap();
    sync.settle().await;

    assert_eq!(store.listener_count(&Topic::Messages(chat("1"))), 0);
    assert_eq!(store.listener_count(&Topic::Messages(chat("2"))), 1);
    assert_eq!(contents(&sync), vec!["Встреча в 15:00"]);

    sync.deselect_chat();
    assert_eq!(store.listener_count(&Topic::Messages(chat("2"))), 0);
    assert!(sync.active_chat().is_none());
}

#[tokio::test]
async fn page_for_a_previous_selection_is_discarded() {
    let (_store, mut sync) = logged_in().await;

    // Chat 1's first page is still outstanding when chat 2 is selected.
    sync.select_chat(&chat("1")).unwrap();
    sync.select_chat(&chat("2")).unwrap();
    sync.settle().await;

    let log = sync.messages().unwrap();
    assert_eq!(log.chat_id(), &chat("2"));
    assert!(log.entries().iter().all(|e| e.message.chat_id == chat("2")));
    assert_eq!(log.len(), 1);

    // A late page tagged with an old generation changes nothing either.
    let mut stale = log.entries()[0].message.clone();
    stale.id = MessageId::from("999");

    sync.handle_event(SyncEvent::PageLoaded {
        chat_id: chat("2"),
        generation: 0,
        requested: 50,
        result: Ok(vec![stale]),
    });
    assert_eq!(sync.messages().unwrap().len(), 1);
}

#[tokio::test]
async fn older_pages_arrive_without_duplicates() {
    let store = InMemoryStore::with_demo_data();
    for i in 0..20 {
        store
            .simulate_incoming(&chat("1"), &user("2"), &format!("сообщение {i}"))
            .await
            .unwrap();
    }

    let config = SyncConfig {
        page_size: 5,
        ..SyncConfig::default()
    };
    let mut sync = logged_in_with(&store, config).await;
    sync.select_chat(&chat("1")).unwrap();
    sync.settle().await;
    assert_eq!(sync.messages().unwrap().len(), 5);

    let mut pages = 1;
    while sync.load_older().unwrap() {
        // A second request while one is outstanding is refused.
        assert!(!sync.load_older().unwrap());
        sync.settle().await;
        pages += 1;
    }

    let log = sync.messages().unwrap();
    assert_eq!(pages, 5);
    assert_eq!(log.len(), 22);
    assert!(log.is_exhausted());

    let ids: HashSet<&MessageId> = log.entries().iter().map(|e| &e.message.id).collect();
    assert_eq!(ids.len(), 22);
    let ordered = log
        .entries()
        .windows(2)
        .all(|w| w[0].message.created_at <= w[1].message.created_at);
    assert!(ordered);
}

// ---------------------------------------------------------------------------
// Unread counting
// ---------------------------------------------------------------------------

#[tokio::test]
async fn inbound_messages_count_as_unread_once() {
    let (store, mut sync) = in_chat("2").await;

    let incoming = store
        .simulate_incoming(&chat("1"), &user("2"), "Ты тут?")
        .await
        .unwrap();
    sync.settle().await;

    assert_eq!(unread(&sync, "1"), 3);
    assert_eq!(sync.chats().chats()[0].id, chat("1"));
    let last = sync.chats().get(&chat("1")).unwrap().last_message.clone();
    assert_eq!(last.map(|m| m.id), Some(incoming.id.clone()));

    // A replayed activity event is not counted again.
    sync.handle_event(SyncEvent::Remote(TopicEvent {
        topic: Topic::Chats(user("1")),
        event: RemoteEvent::ChatActivity(incoming),
    }));
    assert_eq!(unread(&sync, "1"), 3);

    sync.select_chat(&chat("1")).unwrap();
    assert_eq!(unread(&sync, "1"), 0);
}

#[tokio::test]
async fn messages_in_the_active_chat_are_not_unread() {
    let (store, mut sync) = in_chat("2").await;

    store
        .simulate_incoming(&chat("2"), &user("3"), "Перенесём на 16:00?")
        .await
        .unwrap();
    sync.settle().await;

    assert_eq!(unread(&sync, "2"), 0);
    assert_eq!(count_content(&sync, "Перенесём на 16:00?"), 1);
}

#[tokio::test]
async fn chat_list_reload_keeps_local_unread() {
    let (store, mut sync) = in_chat("1").await;

    store
        .simulate_incoming(&chat("2"), &user("3"), "Кто идёт на встречу?")
        .await
        .unwrap();
    sync.settle().await;
    assert_eq!((unread(&sync, "1"), unread(&sync, "2")), (0, 1));

    // The backend still reports its own stale counters.
    sync.deselect_chat();
    sync.refresh_chats().unwrap();
    sync.settle().await;
    assert_eq!((unread(&sync, "1"), unread(&sync, "2")), (0, 1));
}

#[tokio::test]
async fn replayed_older_activity_is_not_counted_again() {
    let (store, mut sync) = in_chat("1").await;

    let first = store
        .simulate_incoming(&chat("2"), &user("3"), "Первое")
        .await
        .unwrap();
    store
        .simulate_incoming(&chat("2"), &user("4"), "Второе")
        .await
        .unwrap();
    sync.settle().await;
    assert_eq!(unread(&sync, "2"), 2);

    sync.handle_event(SyncEvent::Remote(TopicEvent {
        topic: Topic::Chats(user("1")),
        event: RemoteEvent::ChatActivity(first),
    }));
    assert_eq!(unread(&sync, "2"), 2);
    let last = sync.chats().get(&chat("2")).unwrap().last_message.clone();
    assert_eq!(last.map(|m| m.content), Some("Второе".to_string()));
}

// ---------------------------------------------------------------------------
// Optimistic writes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sent_message_is_shown_at_once_and_confirmed_once() {
    let (store, mut sync) = in_chat("1").await;

    let correlation = sync
        .send_message(&chat("1"), "Привет", MessageKind::Text)
        .unwrap();
    assert_eq!(
        entry_state(&sync, &correlation),
        Some(EntryState::Pending {
            correlation_id: correlation
        })
    );
    assert_eq!(sync.pending().len(), 1);

    sync.settle().await;

    assert_eq!(count_content(&sync, "Привет"), 1);
    assert_eq!(entry_state(&sync, &correlation), Some(EntryState::Confirmed));
    assert!(sync.pending().is_empty());
    assert_eq!(store.message_count(&chat("1")), 3);

    let own = sync.chats().get(&chat("1")).unwrap();
    assert_eq!(own.unread_count, 0);
    assert_eq!(own.last_message.as_ref().unwrap().content, "Привет");
}

#[tokio::test]
async fn confirmation_event_before_write_response() {
    let (_store, mut sync) = in_chat("1").await;

    let correlation = sync
        .send_message(&chat("1"), "Привет", MessageKind::Text)
        .unwrap();

    // Hold the write response back and apply the pushed events first.
    let response = sync.next_event().await.expect("write response");
    assert!(matches!(response, SyncEvent::SendCompleted { .. }));
    // MessageCreated on the chat topic, then ChatActivity on ours.
    for _ in 0..2 {
        let event = sync.next_event().await.expect("pushed event");
        assert!(matches!(event, SyncEvent::Remote(_)));
        sync.handle_event(event);
    }

    assert_eq!(entry_state(&sync, &correlation), Some(EntryState::Confirmed));
    assert!(sync.pending().is_empty());

    sync.handle_event(response);
    assert_eq!(count_content(&sync, "Привет"), 1);
    assert_eq!(sync.messages().unwrap().len(), 3);
}

#[tokio::test]
async fn identical_texts_stay_separate() {
    let (_store, mut sync) = in_chat("1").await;

    let first = sync.send_message(&chat("1"), "ok", MessageKind::Text).unwrap();
    let second = sync.send_message(&chat("1"), "ok", MessageKind::Text).unwrap();
    assert_ne!(first, second);
    sync.settle().await;

    assert_eq!(count_content(&sync, "ok"), 2);
    assert_eq!(entry_state(&sync, &first), Some(EntryState::Confirmed));
    assert_eq!(entry_state(&sync, &second), Some(EntryState::Confirmed));
}

#[tokio::test]
async fn failed_write_stays_visible_until_discarded() {
    let (store, mut sync) = in_chat("1").await;
    store.set_reject_writes(true);

    let correlation = sync
        .send_message(&chat("1"), "Привет", MessageKind::Text)
        .unwrap();
    assert_eq!(
        sync.expire(&correlation),
        Err(SyncError::StillInFlight(correlation))
    );
    sync.settle().await;

    assert!(matches!(
        entry_state(&sync, &correlation),
        Some(EntryState::Failed { .. })
    ));
    assert!(sync.pending().get(&correlation).unwrap().is_failed());
    let notice = sync.notices()[0].clone();
    assert_eq!(notice.kind, NoticeKind::RemoteWrite);
    assert_eq!(notice.correlation_id, Some(correlation));
    assert_eq!(store.message_count(&chat("1")), 2);

    sync.expire(&correlation).unwrap();
    assert_eq!(entry_state(&sync, &correlation), None);
    assert!(sync.pending().is_empty());
    assert_eq!(count_content(&sync, "Привет"), 0);
    assert_eq!(
        sync.expire(&correlation),
        Err(SyncError::UnknownPending(correlation))
    );

    assert!(sync.dismiss_notice(notice.id));
    assert!(sync.notices().is_empty());
}

#[tokio::test]
async fn uncorrelated_echo_leaves_failed_write_alone() {
    let (store, mut sync) = in_chat("1").await;
    store.set_reject_writes(true);

    let failed = sync.send_message(&chat("1"), "hi", MessageKind::Text).unwrap();
    sync.settle().await;

    // Same sender and text, but no correlation id: another device's send.
    let mut echo = sync.pending().get(&failed).unwrap().message.clone();
    echo.id = MessageId::from("5000");
    echo.correlation_id = None;
    sync.handle_event(SyncEvent::Remote(TopicEvent {
        topic: Topic::Messages(chat("1")),
        event: RemoteEvent::MessageCreated(echo),
    }));

    assert!(sync.pending().get(&failed).unwrap().is_failed());
    assert!(matches!(
        entry_state(&sync, &failed),
        Some(EntryState::Failed { .. })
    ));
    assert_eq!(count_content(&sync, "hi"), 2);
}

#[tokio::test]
async fn retry_resends_a_failed_write() {
    let (store, mut sync) = in_chat("1").await;
    store.set_reject_writes(true);

    let failed = sync
        .send_message(&chat("1"), "Привет", MessageKind::Text)
        .unwrap();
    assert_eq!(sync.retry(&failed), Err(SyncError::NotRetryable(failed)));
    sync.settle().await;

    store.set_reject_writes(false);
    let retried = sync.retry(&failed).unwrap();
    assert_ne!(retried, failed);
    assert_eq!(entry_state(&sync, &failed), None);
    sync.settle().await;

    assert_eq!(count_content(&sync, "Привет"), 1);
    assert_eq!(entry_state(&sync, &retried), Some(EntryState::Confirmed));
    assert!(sync.pending().is_empty());
    assert_eq!(store.message_count(&chat("1")), 3);

    let unknown = CorrelationId::new();
    assert_eq!(sync.retry(&unknown), Err(SyncError::UnknownPending(unknown)));
}

#[tokio::test]
async fn pending_writes_survive_switching_chats() {
    let (store, mut sync) = in_chat("1").await;
    store.set_reject_writes(true);

    let correlation = sync
        .send_message(&chat("1"), "Привет", MessageKind::Text)
        .unwrap();
    sync.settle().await;

    sync.select_chat(&chat("2")).unwrap();
    sync.settle().await;
    assert_eq!(count_content(&sync, "Привет"), 0);

    sync.select_chat(&chat("1")).unwrap();
    sync.settle().await;
    assert!(matches!(
        entry_state(&sync, &correlation),
        Some(EntryState::Failed { .. })
    ));
}

#[tokio::test]
async fn replies_keep_their_reference() {
    let (_store, mut sync) = in_chat("1").await;
    let target = MessageId::from("1");

    let correlation = sync.send_reply(&chat("1"), "Отлично!", &target).unwrap();
    sync.settle().await;

    let entry = sync
        .messages()
        .unwrap()
        .entry_by_correlation(&correlation)
        .unwrap();
    assert!(entry.is_confirmed());
    assert_eq!(entry.message.reply_to, Some(target));
}

#[tokio::test]
async fn input_is_validated_before_sending() {
    let store = InMemoryStore::with_demo_data();
    let mut sync = controller(
        &store,
        SyncConfig {
            max_media_bytes: 8,
            ..SyncConfig::default()
        },
    );

    assert_eq!(sync.select_chat(&chat("1")), Err(SyncError::NoSession));
    assert_eq!(
        sync.send_message(&chat("1"), "Привет", MessageKind::Text),
        Err(SyncError::NoSession)
    );

    sync.start(ivan(&store));
    sync.settle().await;
    sync.select_chat(&chat("1")).unwrap();
    sync.settle().await;

    assert!(matches!(
        sync.send_message(&chat("1"), "   ", MessageKind::Text),
        Err(SyncError::Validation(_))
    ));
    assert!(matches!(
        sync.send_media(&chat("1"), Bytes::from_static(b"abc"), MessageKind::Text, ""),
        Err(SyncError::Validation(_))
    ));
    assert!(matches!(
        sync.send_media(&chat("1"), Bytes::new(), MessageKind::Image, ""),
        Err(SyncError::Validation(_))
    ));
    assert!(matches!(
        sync.send_media(&chat("1"), Bytes::from_static(b"0123456789"), MessageKind::Image, ""),
        Err(SyncError::Validation(_))
    ));

    assert!(sync.pending().is_empty());
    assert_eq!(sync.messages().unwrap().len(), 2);
    assert_eq!(store.message_count(&chat("1")), 2);
}

// ---------------------------------------------------------------------------
// Media
// ---------------------------------------------------------------------------

#[tokio::test]
async fn media_is_uploaded_then_sent() {
    let (_store, mut sync) = in_chat("1").await;

    let correlation = sync
        .send_media(
            &chat("1"),
            Bytes::from_static(b"\xff\xd8\xff fake jpeg"),
            MessageKind::Image,
            "Смотри",
        )
        .unwrap();
    assert!(matches!(
        entry_state(&sync, &correlation),
        Some(EntryState::Pending { .. })
    ));
    sync.settle().await;

    let entry = sync
        .messages()
        .unwrap()
        .entry_by_correlation(&correlation)
        .unwrap();
    assert!(entry.is_confirmed());
    assert_eq!(entry.message.kind, MessageKind::Image);
    assert_eq!(entry.message.content, "Смотри");
    let url = entry.message.media_url.as_deref().unwrap();
    assert!(url.starts_with("memory://media/1/image/"), "unexpected url {url}");
}

#[tokio::test]
async fn failed_upload_can_be_retried() {
    let (store, mut sync) = in_chat("1").await;
    store.set_reject_writes(true);

    let failed = sync
        .send_media(&chat("1"), Bytes::from_static(b"voice"), MessageKind::Voice, "")
        .unwrap();
    sync.settle().await;

    assert!(matches!(
        entry_state(&sync, &failed),
        Some(EntryState::Failed { .. })
    ));
    assert_eq!(sync.notices()[0].kind, NoticeKind::Upload);
    assert!(sync.pending().get(&failed).unwrap().attachment.is_some());

    store.set_reject_writes(false);
    let retried = sync.retry(&failed).unwrap();
    sync.settle().await;

    let entry = sync
        .messages()
        .unwrap()
        .entry_by_correlation(&retried)
        .unwrap();
    assert!(entry.is_confirmed());
    assert!(entry.message.media_url.is_some());
}

// ---------------------------------------------------------------------------
// Reactions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reactions_are_unique_per_user_and_emoji() {
    let (_store, mut sync) = in_chat("1").await;
    let m1 = MessageId::from("1");

    sync.add_reaction(&m1, "👍").unwrap();
    sync.add_reaction(&m1, "👍").unwrap();
    sync.settle().await;

    let message = sync.messages().unwrap().message(&m1).unwrap();
    assert_eq!(message.reactions.len(), 1);
    assert!(message.reactions.contains(&user("1"), "👍"));

    // Re-delivery of the same reaction event changes nothing.
    sync.handle_event(SyncEvent::Remote(TopicEvent {
        topic: Topic::Messages(chat("1")),
        event: RemoteEvent::ReactionAdded(Reaction {
            message_id: m1.clone(),
            user_id: user("1"),
            emoji: "👍".into(),
        }),
    }));
    assert_eq!(sync.messages().unwrap().message(&m1).unwrap().reactions.len(), 1);

    sync.remove_reaction(&m1, "👍").unwrap();
    sync.settle().await;
    assert!(sync.messages().unwrap().message(&m1).unwrap().reactions.is_empty());
}

#[tokio::test]
async fn rejected_reaction_is_reverted() {
    let (store, mut sync) = in_chat("1").await;
    let m1 = MessageId::from("1");
    store.set_reject_writes(true);

    sync.add_reaction(&m1, "❤️").unwrap();
    assert_eq!(sync.messages().unwrap().message(&m1).unwrap().reactions.len(), 1);
    sync.settle().await;

    assert!(sync.messages().unwrap().message(&m1).unwrap().reactions.is_empty());
    assert_eq!(sync.notices()[0].kind, NoticeKind::RemoteWrite);
}

#[tokio::test]
async fn reactions_need_a_confirmed_message() {
    let (store, mut sync) = in_chat("1").await;
    store.set_reject_writes(true);
    let correlation = sync
        .send_message(&chat("1"), "Привет", MessageKind::Text)
        .unwrap();

    let local = MessageId::local(&correlation);
    assert!(matches!(
        sync.add_reaction(&local, "👍"),
        Err(SyncError::Validation(_))
    ));
    let missing = MessageId::from("404");
    assert_eq!(
        sync.add_reaction(&missing, "👍"),
        Err(SyncError::UnknownMessage(missing))
    );
}

// ---------------------------------------------------------------------------
// Subscription failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failed_subscriptions_are_reported_and_retried_on_selection() {
    let store = InMemoryStore::with_demo_data();
    store.set_subscriptions_failing(true);
    let mut sync = logged_in_with(&store, SyncConfig::default()).await;

    // Reads still work.
    assert_eq!(sync.chats().len(), 2);
    let failures = sync
        .notices()
        .iter()
        .filter(|n| n.kind == NoticeKind::Subscription)
        .count();
    assert_eq!(failures, 2);

    sync.select_chat(&chat("1")).unwrap();
    sync.settle().await;
    assert_eq!(store.listener_count(&Topic::Messages(chat("1"))), 0);
    assert_eq!(sync.messages().unwrap().len(), 2);

    store.set_subscriptions_failing(false);
    sync.select_chat(&chat("1")).unwrap();

    assert_eq!(store.listener_count(&Topic::Chats(user("1"))), 1);
    assert_eq!(store.listener_count(&Topic::UserStatus), 1);
    assert_eq!(store.listener_count(&Topic::Messages(chat("1"))), 1);

    // Once healthy, reselection is a no-op again.
    sync.select_chat(&chat("1")).unwrap();
    assert_eq!(store.listener_count(&Topic::Messages(chat("1"))), 1);
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

#[tokio::test]
async fn snapshot_serializes_for_the_ui() {
    let (store, mut sync) = in_chat("1").await;
    store.set_reject_writes(true);
    sync.send_message(&chat("1"), "Привет", MessageKind::Text)
        .unwrap();
    sync.settle().await;

    let json = serde_json::to_value(sync.snapshot()).unwrap();
    assert_eq!(json["userId"], "1");
    assert_eq!(json["activeChat"], "1");
    assert_eq!(json["pendingWrites"], 1);
    assert_eq!(json["chats"].as_array().unwrap().len(), 2);

    let messages = json["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[0]["senderName"], "Анна Петрова");
    assert_eq!(messages[2]["state"], "failed");
    assert_eq!(messages[2]["isMine"], true);
    assert_eq!(json["notices"][0]["kind"], "remoteWrite");
}
