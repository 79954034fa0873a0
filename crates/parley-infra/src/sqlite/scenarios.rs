//! End-to-end behaviour of the User and Chat stores over SQLite.

use std::time::Duration;

use chrono::{TimeZone, Utc};
use parley_core::OperationContext;
use parley_core::user::UserManager;
use parley_types::chat::{ChatExchange, SessionId};
use parley_types::config::DatabaseConfig;
use parley_types::error::{StoreError, StoreErrorKind};
use parley_types::params::ChatSessionParameters;
use sqlx::ConnectOptions;
use sqlx::sqlite::SqliteConnectOptions;
use tokio_util::sync::CancellationToken;

use super::SqliteRepositories;
use super::test_support::test_repositories;

async fn store() -> UserManager<SqliteRepositories> {
    UserManager::new(test_repositories().await)
}

fn exchange_at(request: &str, response: &str, secs: u32) -> ChatExchange {
    ChatExchange {
        request_timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, secs).unwrap(),
        request: request.to_string(),
        response_timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 10, 1, secs).unwrap(),
        response: response.to_string(),
    }
}

#[tokio::test]
async fn test_register_then_lookup_returns_same_id() {
    let users = store().await;
    for name in ["alice", "bob", "carol"] {
        let registered = users.register_user(name).await.unwrap();
        let found = users.get_user_by_name(name).await.unwrap();
        assert_eq!(found.id(), registered.id());
    }
}

#[tokio::test]
async fn test_duplicate_registration_is_conflict() {
    let users = store().await;
    users.register_user("alice").await.unwrap();
    let err = users.register_user("alice").await.unwrap_err();
    assert_eq!(err.kind(), StoreErrorKind::Conflict);
    assert_eq!(users.list_users().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_deleting_user_removes_only_its_data() {
    let users = store().await;
    let alice = users.register_user("alice").await.unwrap();
    let bob = users.register_user("bob").await.unwrap();

    let a_session = alice.chat_session_manager().new_session("m1").await.unwrap();
    a_session
        .record_one_exchange(&exchange_at("hi", "hello", 0))
        .await
        .unwrap();
    alice
        .set_active_session_id(a_session.session_id())
        .await
        .unwrap();

    let b_chats = bob.chat_session_manager();
    let b_session = b_chats.new_session("m1").await.unwrap();
    b_session
        .record_one_exchange(&exchange_at("yo", "hey", 0))
        .await
        .unwrap();

    users.delete_user(&alice.id()).await.unwrap();

    assert!(users.get_user(&alice.id()).await.unwrap_err().is_not_found());
    assert!(a_session.exchanges().await.unwrap().is_empty());
    assert!(alice.chat_session_manager().list_sessions().await.unwrap().is_empty());

    let remaining = b_chats.list_sessions().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].exchanges().await.unwrap().len(), 1);

    // Deleting again is still fine.
    users.delete_user(&alice.id()).await.unwrap();
}

#[tokio::test]
async fn test_first_exchange_is_earliest_request() {
    let users = store().await;
    let alice = users.register_user("alice").await.unwrap();
    let session = alice.chat_session_manager().new_session("m1").await.unwrap();

    let t1 = exchange_at("early", "r1", 1);
    let t2 = exchange_at("late", "r2", 2);
    session.record_one_exchange(&t2).await.unwrap();
    session.record_one_exchange(&t1).await.unwrap();

    assert_eq!(session.first_exchange().await.unwrap().request, "early");
    assert_eq!(session.exchanges().await.unwrap(), vec![t1, t2]);
}

#[tokio::test]
async fn test_out_of_bounds_settings_are_rejected_atomically() {
    let users = store().await;
    let alice = users.register_user("alice").await.unwrap();
    let chats = alice.chat_session_manager();
    let mut session = chats.new_session("m1").await.unwrap();
    let before = session.settings().clone();

    let mut update = ChatSessionParameters::new("m1");
    update.max_tokens = 551;
    update.frequency_penalty = Some(2.3);
    let err = session.change_settings(&update).await.unwrap_err();
    assert!(matches!(err, StoreError::ValidationFailed(_)));

    let stored = chats.get_session(session.session_id()).await.unwrap();
    assert_eq!(stored.settings(), &before);
    assert_eq!(session.settings(), &before);
}

#[tokio::test]
async fn test_settings_merge_keeps_untouched_fields() {
    let users = store().await;
    let alice = users.register_user("alice").await.unwrap();
    let chats = alice.chat_session_manager();
    let mut session = chats.new_session("m1").await.unwrap();

    let mut first = ChatSessionParameters::new("m1");
    first.presence_penalty = Some(-1.0);
    first.stop = vec!["END".to_string()];
    session.change_settings(&first).await.unwrap();

    let mut update = ChatSessionParameters::new("m1");
    update.max_tokens = 551;
    update.temperature = Some(0.398);
    session.change_settings(&update).await.unwrap();

    let stored = chats.get_session(session.session_id()).await.unwrap();
    let settings = stored.settings();
    assert_eq!(settings.max_tokens, 551);
    assert_eq!(settings.temperature, Some(0.398));
    assert_eq!(settings.presence_penalty, Some(-1.0));
    assert_eq!(settings.stop, vec!["END".to_string()]);
    assert!(settings.top_p.is_none());
    assert!(settings.suffix.is_none());
}

#[tokio::test]
async fn test_deleting_active_session_clears_pointer() {
    let users = store().await;
    let alice = users.register_user("alice").await.unwrap();
    let chats = alice.chat_session_manager();
    let session = chats.new_session("m1").await.unwrap();
    chats.set_active_session(&session).await.unwrap();
    assert_eq!(alice.active_session_id().as_ref(), Some(session.session_id()));

    chats.delete_session(session.session_id()).await.unwrap();
    assert!(alice.active_session_id().is_none());

    // An independently fetched handle sees the same stored state.
    let fresh = users.get_user(&alice.id()).await.unwrap();
    assert!(fresh.active_session_id().is_none());
}

#[tokio::test]
async fn test_foreign_or_unknown_active_session_rejected() {
    let users = store().await;
    let alice = users.register_user("alice").await.unwrap();
    let bob = users.register_user("bob").await.unwrap();
    let own = alice.chat_session_manager().new_session("m1").await.unwrap();
    alice.set_active_session_id(own.session_id()).await.unwrap();

    let foreign = bob.chat_session_manager().new_session("m1").await.unwrap();
    let err = alice
        .set_active_session_id(foreign.session_id())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), StoreErrorKind::ReferentialViolation);

    let err = alice
        .set_active_session_id(&parley_types::chat::SessionId::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), StoreErrorKind::ReferentialViolation);

    alice.refresh().await.unwrap();
    assert_eq!(alice.active_session_id().as_ref(), Some(own.session_id()));
}

#[tokio::test]
async fn test_delete_latest_then_record_same_request() {
    let users = store().await;
    let alice = users.register_user("alice").await.unwrap();
    let session = alice.chat_session_manager().new_session("m1").await.unwrap();

    session
        .record_one_exchange(&exchange_at("hi", "hello", 0))
        .await
        .unwrap();
    session.delete_latest_exchange().await.unwrap();
    assert!(session.exchanges().await.unwrap().is_empty());

    session
        .record_one_exchange(&exchange_at("hi", "hello", 0))
        .await
        .unwrap();
    assert_eq!(session.exchanges().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_same_model_sessions_stay_isolated() {
    let users = store().await;
    let alice = users.register_user("alice").await.unwrap();
    let bob = users.register_user("bob").await.unwrap();
    let a_chats = alice.chat_session_manager();
    let b_chats = bob.chat_session_manager();

    let a_session = a_chats.new_session("m1").await.unwrap();
    let b_session = b_chats.new_session("m1").await.unwrap();

    let a_ids: Vec<_> = a_chats
        .list_sessions()
        .await
        .unwrap()
        .iter()
        .map(|s| s.session_id().clone())
        .collect();
    assert_eq!(a_ids, vec![a_session.session_id().clone()]);
    assert!(!a_ids.contains(b_session.session_id()));
    assert!(a_chats
        .get_session(b_session.session_id())
        .await
        .unwrap_err()
        .is_not_found());
}

#[tokio::test]
async fn test_cancelled_operation_leaves_no_trace() {
    let users = store().await;
    let token = CancellationToken::new();
    token.cancel();
    let ctx = OperationContext::with_cancellation(token);

    let err = ctx.run(users.register_user("alice")).await.unwrap_err();
    assert_eq!(err.kind(), StoreErrorKind::Cancelled);
    assert!(users.list_users().await.unwrap().is_empty());

    let ctx = OperationContext::new().with_timeout(Duration::from_secs(5));
    let alice = ctx.run(users.register_user("alice")).await.unwrap();
    assert_eq!(alice.name(), "alice");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_mid_bulk_delete_removes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let config = DatabaseConfig::default();
    let users = super::open_user_manager(&config, dir.path()).await.unwrap();
    let alice = users.register_user("alice").await.unwrap();
    let chats = alice.chat_session_manager();

    let mut ids = Vec::new();
    for model in ["m1", "m2", "m3"] {
        let session = chats.new_session(model).await.unwrap();
        session
            .record_one_exchange(&exchange_at("q", "a", 0))
            .await
            .unwrap();
        ids.push(session.session_id().clone());
    }
    // The real sessions go first; the unknown ids keep the delete loop busy.
    ids.extend((0..50_000).map(|_| SessionId::new()));

    let token = CancellationToken::new();
    let ctx = OperationContext::with_cancellation(token.clone());
    let path = super::pool::database_path(&config, dir.path());
    let watcher = tokio::spawn(async move {
        let mut other = SqliteConnectOptions::new()
            .filename(&path)
            .busy_timeout(Duration::ZERO)
            .connect()
            .await
            .unwrap();
        // Once the write lock is taken the delete transaction is open.
        while sqlx::query("BEGIN IMMEDIATE")
            .execute(&mut other)
            .await
            .is_ok()
        {
            sqlx::query("ROLLBACK").execute(&mut other).await.unwrap();
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        token.cancel();
    });

    let err = ctx
        .run(chats.delete_multiple_sessions(&ids))
        .await
        .unwrap_err();
    watcher.await.unwrap();
    assert_eq!(err.kind(), StoreErrorKind::Cancelled);

    let remaining = chats.list_sessions().await.unwrap();
    assert_eq!(remaining.len(), 3);
    for session in &remaining {
        assert_eq!(session.exchanges().await.unwrap().len(), 1);
    }

    // The writer is usable again once the rollback has run.
    chats.delete_session(&ids[0]).await.unwrap();
    assert_eq!(chats.list_sessions().await.unwrap().len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_two_pools_on_one_file_write_concurrently() {
    let dir = tempfile::tempdir().unwrap();
    let config = DatabaseConfig::default();
    let first = super::open_user_manager(&config, dir.path()).await.unwrap();
    let alice = first.register_user("alice").await.unwrap();
    let session_id = alice
        .chat_session_manager()
        .new_session("m0")
        .await
        .unwrap()
        .session_id()
        .clone();
    let second = super::open_user_manager(&config, dir.path()).await.unwrap();

    let write_loop = |users: UserManager<SqliteRepositories>, label: &'static str| {
        let session_id = session_id.clone();
        async move {
            let user = users.get_user_by_name("alice").await?;
            let mut session = user.chat_session_manager().get_session(&session_id).await?;
            for i in 0..100u32 {
                session
                    .change_settings(&ChatSessionParameters::new(format!("{label}-{i}")))
                    .await?;
                session
                    .record_one_exchange(&exchange_at(label, "ok", i % 60))
                    .await?;
            }
            Ok::<_, StoreError>(())
        }
    };

    let (a, b) = tokio::join!(write_loop(first.clone(), "a"), write_loop(second, "b"));
    a.unwrap();
    b.unwrap();

    let session = alice
        .chat_session_manager()
        .get_session(&session_id)
        .await
        .unwrap();
    assert_eq!(session.exchanges().await.unwrap().len(), 200);
    assert!(session.model().ends_with("-99"));
}

#[tokio::test]
async fn test_concurrent_registrations_of_one_name() {
    let users = store().await;
    let attempts = (0..8).map(|_| {
        let users = users.clone();
        tokio::spawn(async move { users.register_user("racer").await.map(|_| ()) })
    });

    let mut ok = 0;
    let mut conflicts = 0;
    for handle in attempts.collect::<Vec<_>>() {
        match handle.await.unwrap() {
            Ok(()) => ok += 1,
            Err(e) if e.kind() == StoreErrorKind::Conflict => conflicts += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(ok, 1);
    assert_eq!(conflicts, 7);
}

#[tokio::test]
async fn test_data_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let config = DatabaseConfig::default();

    let users = super::open_user_manager(&config, dir.path()).await.unwrap();
    let alice = users.register_user("alice").await.unwrap();
    let session = alice.chat_session_manager().new_session("m1").await.unwrap();
    alice.set_active_session_id(session.session_id()).await.unwrap();
    users.repositories().pool().close().await;

    let reopened = super::open_user_manager(&config, dir.path()).await.unwrap();
    let alice_again = reopened.get_user_by_name("alice").await.unwrap();
    let active = alice_again
        .chat_session_manager()
        .current_active_session()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(active.session_id(), session.session_id());
    assert_eq!(active.model(), "m1");
}
