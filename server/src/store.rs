//! Typed data-access facade over Postgres.
//!
//! Every engine component goes through these operations; SQL and transaction
//! boundaries live here. Functions take either a pool (single-statement
//! operations) or an open transaction (the enqueue and dispatch paths, which
//! must commit several writes atomically).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::db::DbPool;
use crate::models::{
    ApiKeyRecord, Event, EventType, Message, MessageStatus, MessageType, Project, ProjectStatus,
    UsageBucket,
};

const MESSAGE_COLUMNS: &str = "id, project_id, type, status, from_address, to_address, subject, \
     body, metadata, idempotency_key, attempts, max_attempts, next_attempt_at, scheduled_for, \
     created_at, updated_at";

/// True when the database rejected a write for violating a unique index.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map(|db| db.is_unique_violation())
        .unwrap_or(false)
}

// =============================================================================
// Projects
// =============================================================================

pub async fn get_project(pool: &DbPool, project_id: Uuid) -> Result<Option<Project>> {
    let project = sqlx::query_as::<_, Project>(
        "SELECT id, name, owner_email, status, monthly_limit, rate_limit_per_minute, created_at
         FROM projects WHERE id = $1",
    )
    .bind(project_id)
    .fetch_optional(pool)
    .await
    .context("Failed to fetch project")?;

    Ok(project)
}

/// Project status as seen inside the dispatcher's claim transaction.
pub async fn get_project_status(
    tx: &mut Transaction<'_, Postgres>,
    project_id: Uuid,
) -> Result<Option<ProjectStatus>> {
    let status = sqlx::query_scalar::<_, ProjectStatus>(
        "SELECT status FROM projects WHERE id = $1",
    )
    .bind(project_id)
    .fetch_optional(&mut **tx)
    .await
    .context("Failed to fetch project status")?;

    Ok(status)
}

pub async fn set_project_status(
    pool: &DbPool,
    project_id: Uuid,
    status: ProjectStatus,
) -> Result<Option<Project>> {
    let project = sqlx::query_as::<_, Project>(
        "UPDATE projects SET status = $2 WHERE id = $1
         RETURNING id, name, owner_email, status, monthly_limit, rate_limit_per_minute, created_at",
    )
    .bind(project_id)
    .bind(status)
    .fetch_optional(pool)
    .await
    .context("Failed to update project status")?;

    Ok(project)
}

/// Used by tests and seeds; production projects are created out of band.
pub async fn create_project(
    pool: &DbPool,
    name: &str,
    owner_email: &str,
    monthly_limit: Option<i32>,
    rate_limit_per_minute: Option<i32>,
) -> Result<Project> {
    let project = sqlx::query_as::<_, Project>(
        "INSERT INTO projects (name, owner_email, status, monthly_limit, rate_limit_per_minute)
         VALUES ($1, $2, 'active', $3, $4)
         RETURNING id, name, owner_email, status, monthly_limit, rate_limit_per_minute, created_at",
    )
    .bind(name)
    .bind(owner_email)
    .bind(monthly_limit)
    .bind(rate_limit_per_minute)
    .fetch_one(pool)
    .await
    .context("Failed to create project")?;

    Ok(project)
}

// =============================================================================
// API keys
// =============================================================================

/// Look up a non-revoked key by its SHA-256 hex digest, joined with the
/// owning project's status so the auth path is a single round trip.
pub async fn find_active_api_key(pool: &DbPool, key_hash: &str) -> Result<Option<ApiKeyRecord>> {
    let record = sqlx::query_as::<_, ApiKeyRecord>(
        "SELECT k.id, k.project_id, p.status AS project_status
         FROM api_keys k
         JOIN projects p ON p.id = k.project_id
         WHERE k.key_hash = $1 AND k.revoked_at IS NULL",
    )
    .bind(key_hash)
    .fetch_optional(pool)
    .await
    .context("Failed to look up API key")?;

    Ok(record)
}

/// Best-effort bookkeeping; failures are the caller's to ignore.
pub async fn touch_api_key(pool: &DbPool, key_id: Uuid) -> Result<()> {
    sqlx::query("UPDATE api_keys SET last_used_at = NOW() WHERE id = $1")
        .bind(key_id)
        .execute(pool)
        .await
        .context("Failed to touch API key")?;

    Ok(())
}

pub async fn create_api_key(
    pool: &DbPool,
    project_id: Uuid,
    key_hash: &str,
    name: &str,
) -> Result<Uuid> {
    let id = sqlx::query_scalar::<_, Uuid>(
        "INSERT INTO api_keys (project_id, key_hash, name) VALUES ($1, $2, $3) RETURNING id",
    )
    .bind(project_id)
    .bind(key_hash)
    .bind(name)
    .fetch_one(pool)
    .await
    .context("Failed to create API key")?;

    Ok(id)
}

// =============================================================================
// Messages
// =============================================================================

/// Fields the enqueuer supplies for a fresh message.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub project_id: Uuid,
    pub message_type: MessageType,
    pub from_address: String,
    pub to_address: String,
    pub subject: Option<String>,
    pub body: String,
    pub metadata: Option<serde_json::Value>,
    pub idempotency_key: Option<String>,
}

/// Insert a queued message. Returns the raw sqlx error so the caller can
/// recognize an idempotency unique-violation and recover.
pub async fn insert_message(
    tx: &mut Transaction<'_, Postgres>,
    new: &NewMessage,
) -> std::result::Result<Message, sqlx::Error> {
    let sql = format!(
        "INSERT INTO messages
             (project_id, type, status, from_address, to_address, subject, body, metadata,
              idempotency_key, attempts, max_attempts)
         VALUES ($1, $2, 'queued', $3, $4, $5, $6, $7, $8, 0, 3)
         RETURNING {MESSAGE_COLUMNS}"
    );

    sqlx::query_as::<_, Message>(&sql)
        .bind(new.project_id)
        .bind(new.message_type)
        .bind(&new.from_address)
        .bind(&new.to_address)
        .bind(&new.subject)
        .bind(&new.body)
        .bind(&new.metadata)
        .bind(&new.idempotency_key)
        .fetch_one(&mut **tx)
        .await
}

pub async fn get_message(pool: &DbPool, message_id: Uuid) -> Result<Option<Message>> {
    let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1");

    let message = sqlx::query_as::<_, Message>(&sql)
        .bind(message_id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch message")?;

    Ok(message)
}

/// Tenant-scoped read; a message outside the project is invisible.
pub async fn get_project_message(
    pool: &DbPool,
    project_id: Uuid,
    message_id: Uuid,
) -> Result<Option<Message>> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1 AND project_id = $2"
    );

    let message = sqlx::query_as::<_, Message>(&sql)
        .bind(message_id)
        .bind(project_id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch message")?;

    Ok(message)
}

/// Most-recent-first page of a project's messages, optionally filtered by
/// status.
pub async fn list_project_messages(
    pool: &DbPool,
    project_id: Uuid,
    status: Option<MessageStatus>,
    limit: i64,
    offset: i64,
) -> Result<Vec<Message>> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS}
         FROM messages
         WHERE project_id = $1 AND ($2::text IS NULL OR status = $2)
         ORDER BY created_at DESC
         LIMIT $3 OFFSET $4"
    );

    let messages = sqlx::query_as::<_, Message>(&sql)
        .bind(project_id)
        .bind(status)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
        .context("Failed to list messages")?;

    Ok(messages)
}

pub async fn find_message_by_idempotency_key(
    pool: &DbPool,
    project_id: Uuid,
    key: &str,
) -> Result<Option<Message>> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages WHERE project_id = $1 AND idempotency_key = $2"
    );

    let message = sqlx::query_as::<_, Message>(&sql)
        .bind(project_id)
        .bind(key)
        .fetch_optional(pool)
        .await
        .context("Failed to look up idempotency key")?;

    Ok(message)
}

/// Claim up to `batch_size` ready messages for exclusive processing.
///
/// `FOR UPDATE SKIP LOCKED` hands each concurrent worker a disjoint set
/// without any out-of-band coordination; the locks dissolve with the
/// transaction.
pub async fn claim_ready_messages(
    tx: &mut Transaction<'_, Postgres>,
    batch_size: i64,
) -> Result<Vec<Message>> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS}
         FROM messages
         WHERE status = 'queued'
           AND (next_attempt_at IS NULL OR next_attempt_at <= NOW())
         ORDER BY created_at ASC
         LIMIT $1
         FOR UPDATE SKIP LOCKED"
    );

    let messages = sqlx::query_as::<_, Message>(&sql)
        .bind(batch_size)
        .fetch_all(&mut **tx)
        .await
        .context("Failed to claim messages")?;

    Ok(messages)
}

/// Increment the attempt counter and return the new value.
pub async fn increment_attempts(
    tx: &mut Transaction<'_, Postgres>,
    message_id: Uuid,
) -> Result<i32> {
    let attempts = sqlx::query_scalar::<_, i32>(
        "UPDATE messages SET attempts = attempts + 1, updated_at = NOW()
         WHERE id = $1
         RETURNING attempts",
    )
    .bind(message_id)
    .fetch_one(&mut **tx)
    .await
    .context("Failed to increment attempts")?;

    Ok(attempts)
}

pub async fn mark_message_status(
    tx: &mut Transaction<'_, Postgres>,
    message_id: Uuid,
    status: MessageStatus,
) -> Result<()> {
    sqlx::query("UPDATE messages SET status = $2, updated_at = NOW() WHERE id = $1")
        .bind(message_id)
        .bind(status)
        .execute(&mut **tx)
        .await
        .context("Failed to update message status")?;

    Ok(())
}

/// Leave the message queued and park it until `next_attempt_at`.
pub async fn schedule_retry(
    tx: &mut Transaction<'_, Postgres>,
    message_id: Uuid,
    next_attempt_at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "UPDATE messages SET next_attempt_at = $2, updated_at = NOW() WHERE id = $1",
    )
    .bind(message_id)
    .bind(next_attempt_at)
    .execute(&mut **tx)
    .await
    .context("Failed to schedule retry")?;

    Ok(())
}

// =============================================================================
// Events
// =============================================================================

pub async fn insert_event(
    tx: &mut Transaction<'_, Postgres>,
    message_id: Uuid,
    project_id: Uuid,
    event_type: EventType,
    provider_response: Option<serde_json::Value>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO events (message_id, project_id, event_type, provider_response)
         VALUES ($1, $2, $3, $4)",
    )
    .bind(message_id)
    .bind(project_id)
    .bind(event_type)
    .bind(provider_response)
    .execute(&mut **tx)
    .await
    .context("Failed to insert event")?;

    Ok(())
}

pub async fn list_events(pool: &DbPool, message_id: Uuid) -> Result<Vec<Event>> {
    let events = sqlx::query_as::<_, Event>(
        "SELECT id, message_id, project_id, event_type, provider_response, created_at
         FROM events
         WHERE message_id = $1
         ORDER BY created_at ASC",
    )
    .bind(message_id)
    .fetch_all(pool)
    .await
    .context("Failed to list events")?;

    Ok(events)
}

// =============================================================================
// Usage ledger
// =============================================================================

/// Atomic monthly counter increment; buckets appear lazily on first delivery.
pub async fn increment_usage(
    tx: &mut Transaction<'_, Postgres>,
    project_id: Uuid,
    period: &str,
    message_type: MessageType,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO usage (project_id, period, message_type, count)
         VALUES ($1, $2, $3, 1)
         ON CONFLICT (project_id, period, message_type)
         DO UPDATE SET count = usage.count + 1",
    )
    .bind(project_id)
    .bind(period)
    .bind(message_type)
    .execute(&mut **tx)
    .await
    .context("Failed to increment usage")?;

    Ok(())
}

/// Sum of this period's buckets across channels; the quota input.
pub async fn total_usage_for_period(
    pool: &DbPool,
    project_id: Uuid,
    period: &str,
) -> Result<i64> {
    let total = sqlx::query_scalar::<_, Option<i64>>(
        "SELECT SUM(count) FROM usage WHERE project_id = $1 AND period = $2",
    )
    .bind(project_id)
    .bind(period)
    .fetch_one(pool)
    .await
    .context("Failed to sum usage")?;

    Ok(total.unwrap_or(0))
}

pub async fn usage_buckets_for_period(
    pool: &DbPool,
    project_id: Uuid,
    period: &str,
) -> Result<Vec<UsageBucket>> {
    let buckets = sqlx::query_as::<_, UsageBucket>(
        "SELECT project_id, period, message_type, count
         FROM usage
         WHERE project_id = $1 AND period = $2
         ORDER BY message_type",
    )
    .bind(project_id)
    .bind(period)
    .fetch_all(pool)
    .await
    .context("Failed to list usage buckets")?;

    Ok(buckets)
}

// =============================================================================
// Rate-limit buckets
// =============================================================================

/// Consume one token from the project's current minute window and return the
/// window's new count. Insert-on-conflict-increment makes lost updates
/// impossible under concurrent admissions.
pub async fn increment_rate_bucket(
    pool: &DbPool,
    project_id: Uuid,
    window: DateTime<Utc>,
) -> Result<i32> {
    let count = sqlx::query_scalar::<_, i32>(
        "INSERT INTO rate_limit_tracking (project_id, minute_window, count)
         VALUES ($1, $2, 1)
         ON CONFLICT (project_id, minute_window)
         DO UPDATE SET count = rate_limit_tracking.count + 1
         RETURNING count",
    )
    .bind(project_id)
    .bind(window)
    .fetch_one(pool)
    .await
    .context("Failed to increment rate bucket")?;

    Ok(count)
}

pub async fn rate_bucket_count(
    pool: &DbPool,
    project_id: Uuid,
    window: DateTime<Utc>,
) -> Result<i64> {
    let count = sqlx::query_scalar::<_, Option<i32>>(
        "SELECT count FROM rate_limit_tracking WHERE project_id = $1 AND minute_window = $2",
    )
    .bind(project_id)
    .bind(window)
    .fetch_optional(pool)
    .await
    .context("Failed to read rate bucket")?
    .flatten();

    Ok(count.unwrap_or(0) as i64)
}

// =============================================================================
// Janitor
// =============================================================================

/// Delete one chunk of events older than `cutoff`; returns rows removed.
pub async fn delete_old_events_chunk(
    pool: &DbPool,
    cutoff: DateTime<Utc>,
    chunk_size: i64,
) -> Result<u64> {
    let result = sqlx::query(
        "DELETE FROM events
         WHERE id IN (
             SELECT id FROM events WHERE created_at < $1 LIMIT $2
         )",
    )
    .bind(cutoff)
    .bind(chunk_size)
    .execute(pool)
    .await
    .context("Failed to delete old events")?;

    Ok(result.rows_affected())
}

/// Delete one chunk of terminal messages older than `cutoff`.
pub async fn delete_old_terminal_messages_chunk(
    pool: &DbPool,
    cutoff: DateTime<Utc>,
    chunk_size: i64,
) -> Result<u64> {
    let result = sqlx::query(
        "DELETE FROM messages
         WHERE id IN (
             SELECT id FROM messages
             WHERE status IN ('delivered', 'failed', 'dead') AND created_at < $1
             LIMIT $2
         )",
    )
    .bind(cutoff)
    .bind(chunk_size)
    .execute(pool)
    .await
    .context("Failed to delete old terminal messages")?;

    Ok(result.rows_affected())
}

pub async fn delete_stale_rate_buckets(pool: &DbPool, cutoff: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query("DELETE FROM rate_limit_tracking WHERE minute_window < $1")
        .bind(cutoff)
        .execute(pool)
        .await
        .context("Failed to delete stale rate buckets")?;

    Ok(result.rows_affected())
}

// =============================================================================
// Admin audit trail
// =============================================================================

pub async fn insert_admin_event(
    pool: &DbPool,
    project_id: Option<Uuid>,
    action: &str,
    detail: Option<serde_json::Value>,
) -> Result<()> {
    sqlx::query("INSERT INTO admin_events (project_id, action, detail) VALUES ($1, $2, $3)")
        .bind(project_id)
        .bind(action)
        .bind(detail)
        .execute(pool)
        .await
        .context("Failed to insert admin event")?;

    Ok(())
}
