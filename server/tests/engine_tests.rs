//! End-to-end engine scenarios: accept through the admission pipeline, drive
//! the dispatcher against scripted providers, assert the resulting state
//! machine, timeline, and ledgers.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use sqlx::PgPool;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use courier_server::dispatch::Dispatcher;
use courier_server::db::{init_db, DbConfig};
use courier_server::enqueue::{self, AcceptOutcome, AcceptRequest};
use courier_server::error::ApiError;
use courier_server::models::{
    minute_window, EventType, Message, MessageStatus, MessageType, ProjectStatus,
};
use courier_server::providers::{ChannelProvider, ProviderBroker, ProviderError};
use courier_server::store;

static DB_LOCK: Mutex<()> = Mutex::const_new(());

async fn setup_test_db() -> PgPool {
    let database_url = std::env::var("TEST_DATABASE_URL")
        .unwrap_or_else(|_| "postgres://localhost/courier_test".to_string());

    let config = DbConfig {
        database_url,
        max_connections: 10,
        min_connections: 2,
        acquire_timeout: Duration::from_secs(30),
        idle_timeout: Duration::from_secs(600),
    };

    init_db(config).await.expect("Failed to initialize test database")
}

async fn cleanup_test_data(pool: &PgPool) {
    sqlx::query(
        "TRUNCATE TABLE events, messages, usage, rate_limit_tracking, api_keys, admin_events, projects CASCADE",
    )
    .execute(pool)
    .await
    .expect("Failed to cleanup test data");
}

#[derive(Clone, Copy)]
enum Step {
    Succeed,
    FailTransient,
    FailPermanent,
}

/// Provider double that replays a fixed script of verdicts, then succeeds.
struct ScriptedProvider {
    script: Vec<Step>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    fn new(script: Vec<Step>) -> Self {
        Self {
            script,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ChannelProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn send(&self, _message: &Message) -> Result<serde_json::Value, ProviderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script.get(call).copied().unwrap_or(Step::Succeed) {
            Step::Succeed => Ok(json!({ "provider": "scripted", "call": call })),
            Step::FailTransient => Err(ProviderError::Transient("upstream flake".into())),
            Step::FailPermanent => Err(ProviderError::Permanent("invalid recipient".into())),
        }
    }
}

fn dispatcher_with_script(pool: &PgPool, script: Vec<Step>) -> Dispatcher {
    let mut broker = ProviderBroker::new();
    broker.register(MessageType::Email, Arc::new(ScriptedProvider::new(script)));
    Dispatcher::new(pool.clone(), Arc::new(broker), 10)
}

fn email_request(key: Option<&str>) -> AcceptRequest {
    AcceptRequest {
        message_type: MessageType::Email,
        from_address: "b@y.test".into(),
        to_address: "a@x.test".into(),
        subject: None,
        body: "hi".into(),
        idempotency_key: key.map(String::from),
    }
}

async fn accept_one(pool: &PgPool, project_id: Uuid) -> Message {
    match enqueue::accept(pool, project_id, email_request(None))
        .await
        .expect("accept")
    {
        AcceptOutcome::Queued(message) => message,
        AcceptOutcome::Duplicate { .. } => panic!("unexpected duplicate"),
    }
}

/// Make a parked retry claimable now.
async fn expire_backoff(pool: &PgPool, message_id: Uuid) {
    sqlx::query(
        "UPDATE messages SET next_attempt_at = NOW() - INTERVAL '1 second' WHERE id = $1",
    )
    .bind(message_id)
    .execute(pool)
    .await
    .expect("expire backoff");
}

async fn event_types(pool: &PgPool, message_id: Uuid) -> Vec<EventType> {
    store::list_events(pool, message_id)
        .await
        .expect("events")
        .into_iter()
        .map(|e| e.event_type)
        .collect()
}

#[tokio::test]
async fn happy_path_delivery() {
    let _guard = DB_LOCK.lock().await;
    let pool = setup_test_db().await;
    cleanup_test_data(&pool).await;

    let project = store::create_project(&pool, "acme", "ops@acme.test", Some(1000), Some(60))
        .await
        .expect("project");
    let message = accept_one(&pool, project.id).await;

    let dispatcher = dispatcher_with_script(&pool, vec![Step::Succeed]);
    let processed = dispatcher.run_once().await.expect("poll");
    assert_eq!(processed, 1);

    let delivered = store::get_message(&pool, message.id)
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(delivered.status, MessageStatus::Delivered);
    assert_eq!(delivered.attempts, 1);

    assert_eq!(
        event_types(&pool, message.id).await,
        vec![EventType::Requested, EventType::Delivered]
    );

    let period = courier_server::models::current_period(Utc::now());
    let usage = store::total_usage_for_period(&pool, project.id, &period)
        .await
        .expect("usage");
    assert_eq!(usage, 1);

    // Nothing left to claim.
    assert_eq!(dispatcher.run_once().await.expect("poll"), 0);
}

#[tokio::test]
async fn idempotent_duplicate_returns_first_message() {
    let _guard = DB_LOCK.lock().await;
    let pool = setup_test_db().await;
    cleanup_test_data(&pool).await;

    let project = store::create_project(&pool, "acme", "ops@acme.test", None, None)
        .await
        .expect("project");

    let first = match enqueue::accept(&pool, project.id, email_request(Some("k1")))
        .await
        .expect("first accept")
    {
        AcceptOutcome::Queued(message) => message,
        AcceptOutcome::Duplicate { .. } => panic!("first accept must be fresh"),
    };

    match enqueue::accept(&pool, project.id, email_request(Some("k1")))
        .await
        .expect("second accept")
    {
        AcceptOutcome::Duplicate { message_id, status } => {
            assert_eq!(message_id, first.id);
            assert_eq!(status, MessageStatus::Queued);
        }
        AcceptOutcome::Queued(_) => panic!("second accept must be a duplicate"),
    }

    let rows = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM messages WHERE project_id = $1 AND idempotency_key = 'k1'",
    )
    .bind(project.id)
    .fetch_one(&pool)
    .await
    .expect("count");
    assert_eq!(rows, 1);
}

#[tokio::test]
async fn transient_retries_then_success() {
    let _guard = DB_LOCK.lock().await;
    let pool = setup_test_db().await;
    cleanup_test_data(&pool).await;

    let project = store::create_project(&pool, "acme", "ops@acme.test", None, None)
        .await
        .expect("project");
    let message = accept_one(&pool, project.id).await;

    let dispatcher =
        dispatcher_with_script(&pool, vec![Step::FailTransient, Step::FailTransient, Step::Succeed]);

    // First attempt fails; the message stays queued, parked behind backoff.
    dispatcher.run_once().await.expect("poll 1");
    let after_first = store::get_message(&pool, message.id)
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(after_first.status, MessageStatus::Queued);
    assert_eq!(after_first.attempts, 1);
    assert!(after_first.next_attempt_at.is_some());

    // Park it firmly in the future: a poll must not touch it.
    sqlx::query("UPDATE messages SET next_attempt_at = NOW() + INTERVAL '1 hour' WHERE id = $1")
        .bind(message.id)
        .execute(&pool)
        .await
        .expect("park");
    dispatcher.run_once().await.expect("poll while parked");
    let untouched = store::get_message(&pool, message.id)
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(untouched.attempts, 1);

    expire_backoff(&pool, message.id).await;
    dispatcher.run_once().await.expect("poll 2");
    expire_backoff(&pool, message.id).await;
    dispatcher.run_once().await.expect("poll 3");

    let final_state = store::get_message(&pool, message.id)
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(final_state.status, MessageStatus::Delivered);
    assert_eq!(final_state.attempts, 3);

    assert_eq!(
        event_types(&pool, message.id).await,
        vec![
            EventType::Requested,
            EventType::Failed,
            EventType::Failed,
            EventType::Delivered,
        ]
    );
}

#[tokio::test]
async fn dead_letter_after_attempt_ceiling() {
    let _guard = DB_LOCK.lock().await;
    let pool = setup_test_db().await;
    cleanup_test_data(&pool).await;

    let project = store::create_project(&pool, "acme", "ops@acme.test", None, None)
        .await
        .expect("project");
    let message = accept_one(&pool, project.id).await;

    let dispatcher = dispatcher_with_script(
        &pool,
        vec![Step::FailTransient, Step::FailTransient, Step::FailTransient],
    );

    for _ in 0..3 {
        dispatcher.run_once().await.expect("poll");
        expire_backoff(&pool, message.id).await;
    }

    // Attempts are exhausted but termination happens on the next poll.
    let exhausted = store::get_message(&pool, message.id)
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(exhausted.status, MessageStatus::Queued);
    assert_eq!(exhausted.attempts, 3);

    dispatcher.run_once().await.expect("dead-letter poll");

    let dead = store::get_message(&pool, message.id)
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(dead.status, MessageStatus::Dead);
    assert_eq!(dead.attempts, 3);

    let events = event_types(&pool, message.id).await;
    assert_eq!(events.first(), Some(&EventType::Requested));
    assert_eq!(events.last(), Some(&EventType::Dead));

    // No usage for undelivered mail.
    let period = courier_server::models::current_period(Utc::now());
    let usage = store::total_usage_for_period(&pool, project.id, &period)
        .await
        .expect("usage");
    assert_eq!(usage, 0);
}

#[tokio::test]
async fn permanent_failure_is_terminal() {
    let _guard = DB_LOCK.lock().await;
    let pool = setup_test_db().await;
    cleanup_test_data(&pool).await;

    let project = store::create_project(&pool, "acme", "ops@acme.test", None, None)
        .await
        .expect("project");
    let message = accept_one(&pool, project.id).await;

    let dispatcher = dispatcher_with_script(&pool, vec![Step::FailPermanent]);
    dispatcher.run_once().await.expect("poll");

    let failed = store::get_message(&pool, message.id)
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(failed.status, MessageStatus::Failed);
    assert_eq!(failed.attempts, 1);
    assert!(failed.status.is_terminal());

    assert_eq!(
        event_types(&pool, message.id).await,
        vec![EventType::Requested, EventType::Failed]
    );

    // Terminal: further polls never touch it.
    dispatcher.run_once().await.expect("idle poll");
    let still_failed = store::get_message(&pool, message.id)
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(still_failed.attempts, 1);
    assert_eq!(still_failed.status, MessageStatus::Failed);
}

#[tokio::test]
async fn quota_rejection_consumes_no_rate_token() {
    let _guard = DB_LOCK.lock().await;
    let pool = setup_test_db().await;
    cleanup_test_data(&pool).await;

    let project = store::create_project(&pool, "acme", "ops@acme.test", Some(5), Some(60))
        .await
        .expect("project");

    let period = courier_server::models::current_period(Utc::now());
    let mut tx = pool.begin().await.expect("begin");
    for _ in 0..5 {
        store::increment_usage(&mut tx, project.id, &period, MessageType::Email)
            .await
            .expect("seed usage");
    }
    tx.commit().await.expect("commit");

    let err = enqueue::accept(&pool, project.id, email_request(None))
        .await
        .expect_err("quota must reject");
    match err {
        ApiError::MonthlyQuotaExceeded { limit, current } => {
            assert_eq!(limit, 5);
            assert_eq!(current, 5);
        }
        other => panic!("expected quota error, got {other:?}"),
    }

    let messages = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM messages")
        .fetch_one(&pool)
        .await
        .expect("count");
    assert_eq!(messages, 0);

    // Quota precedes the rate limiter, so no token was spent.
    let window = minute_window(Utc::now());
    let tokens = store::rate_bucket_count(&pool, project.id, window)
        .await
        .expect("bucket");
    assert_eq!(tokens, 0);
}

#[tokio::test]
async fn rate_limit_rejection_counts_the_rejected_attempt() {
    let _guard = DB_LOCK.lock().await;
    let pool = setup_test_db().await;
    cleanup_test_data(&pool).await;

    let project = store::create_project(&pool, "acme", "ops@acme.test", None, Some(3))
        .await
        .expect("project");

    // Keep all four accepts inside one minute window.
    {
        use chrono::Timelike;
        let second = Utc::now().second();
        if second >= 55 {
            tokio::time::sleep(Duration::from_secs((61 - second) as u64)).await;
        }
    }

    for _ in 0..3 {
        accept_one(&pool, project.id).await;
    }

    let err = enqueue::accept(&pool, project.id, email_request(None))
        .await
        .expect_err("fourth accept must hit the limit");
    match err {
        ApiError::RateLimitExceeded { limit, current } => {
            assert_eq!(limit, 3);
            assert_eq!(current, 4);
        }
        other => panic!("expected rate error, got {other:?}"),
    }

    // The rejected admission still consumed its token.
    let window = minute_window(Utc::now());
    let tokens = store::rate_bucket_count(&pool, project.id, window)
        .await
        .expect("bucket");
    assert_eq!(tokens, 4);

    let messages = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM messages")
        .fetch_one(&pool)
        .await
        .expect("count");
    assert_eq!(messages, 3);
}

#[tokio::test]
async fn suspended_project_rejects_new_messages() {
    let _guard = DB_LOCK.lock().await;
    let pool = setup_test_db().await;
    cleanup_test_data(&pool).await;

    let project = store::create_project(&pool, "acme", "ops@acme.test", None, None)
        .await
        .expect("project");
    store::set_project_status(&pool, project.id, ProjectStatus::Suspended)
        .await
        .expect("suspend");

    let err = enqueue::accept(&pool, project.id, email_request(None))
        .await
        .expect_err("suspended project must reject");
    assert!(matches!(err, ApiError::ProjectSuspended));
}

#[tokio::test]
async fn suspended_project_pauses_queued_messages_without_penalty() {
    let _guard = DB_LOCK.lock().await;
    let pool = setup_test_db().await;
    cleanup_test_data(&pool).await;

    let project = store::create_project(&pool, "acme", "ops@acme.test", None, None)
        .await
        .expect("project");
    let message = accept_one(&pool, project.id).await;

    store::set_project_status(&pool, project.id, ProjectStatus::Suspended)
        .await
        .expect("suspend");

    let dispatcher = dispatcher_with_script(&pool, vec![Step::Succeed]);
    dispatcher.run_once().await.expect("poll");
    dispatcher.run_once().await.expect("poll again");

    let paused = store::get_message(&pool, message.id)
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(paused.status, MessageStatus::Queued);
    assert_eq!(paused.attempts, 0);

    // Only skip observations accumulate, one per poll.
    assert_eq!(
        event_types(&pool, message.id).await,
        vec![EventType::Requested, EventType::Skipped, EventType::Skipped]
    );

    // Resuming the project resumes delivery.
    store::set_project_status(&pool, project.id, ProjectStatus::Active)
        .await
        .expect("resume");
    dispatcher.run_once().await.expect("poll after resume");

    let delivered = store::get_message(&pool, message.id)
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(delivered.status, MessageStatus::Delivered);
    assert_eq!(delivered.attempts, 1);
}

#[tokio::test]
async fn future_next_attempt_is_never_claimed() {
    let _guard = DB_LOCK.lock().await;
    let pool = setup_test_db().await;
    cleanup_test_data(&pool).await;

    let project = store::create_project(&pool, "acme", "ops@acme.test", None, None)
        .await
        .expect("project");
    let message = accept_one(&pool, project.id).await;

    sqlx::query("UPDATE messages SET next_attempt_at = NOW() + INTERVAL '1 hour' WHERE id = $1")
        .bind(message.id)
        .execute(&pool)
        .await
        .expect("park in the future");

    let dispatcher = dispatcher_with_script(&pool, vec![Step::Succeed]);
    assert_eq!(dispatcher.run_once().await.expect("poll"), 0);

    let untouched = store::get_message(&pool, message.id)
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(untouched.status, MessageStatus::Queued);
    assert_eq!(untouched.attempts, 0);
    assert_eq!(event_types(&pool, message.id).await, vec![EventType::Requested]);
}

#[tokio::test]
async fn unsupported_channel_stays_queued_for_retry() {
    let _guard = DB_LOCK.lock().await;
    let pool = setup_test_db().await;
    cleanup_test_data(&pool).await;

    let project = store::create_project(&pool, "acme", "ops@acme.test", None, None)
        .await
        .expect("project");
    let message = accept_one(&pool, project.id).await;

    // Broker with no adapters at all: the factory failure path must not
    // crash the worker, and the message must come back retryable.
    let dispatcher = Dispatcher::new(pool.clone(), Arc::new(ProviderBroker::new()), 10);
    dispatcher.run_once().await.expect("poll");

    let parked = store::get_message(&pool, message.id)
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(parked.status, MessageStatus::Queued);
    assert_eq!(parked.attempts, 1);
    assert!(parked.next_attempt_at.is_some());
}
