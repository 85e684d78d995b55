//! Database models for projects, messages, events, and the usage ledgers.

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// =============================================================================
// Enumerations (stored as TEXT, CHECK-constrained in the schema)
// =============================================================================

/// Tenant lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Active,
    Suspended,
}

/// Delivery channel for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Email,
    Sms,
    Whatsapp,
    Push,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Email => "email",
            MessageType::Sms => "sms",
            MessageType::Whatsapp => "whatsapp",
            MessageType::Push => "push",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message lifecycle state. `Delivered`, `Failed` and `Dead` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Queued,
    Delivered,
    Failed,
    Dead,
}

impl MessageStatus {
    /// Terminal messages never transition again.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, MessageStatus::Queued)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Queued => "queued",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Failed => "failed",
            MessageStatus::Dead => "dead",
        }
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only timeline entry kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Requested,
    Queued,
    Sent,
    Delivered,
    Failed,
    Bounced,
    Opened,
    Clicked,
    Dead,
    Skipped,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Requested => "requested",
            EventType::Queued => "queued",
            EventType::Sent => "sent",
            EventType::Delivered => "delivered",
            EventType::Failed => "failed",
            EventType::Bounced => "bounced",
            EventType::Opened => "opened",
            EventType::Clicked => "clicked",
            EventType::Dead => "dead",
            EventType::Skipped => "skipped",
        }
    }
}

// =============================================================================
// Rows
// =============================================================================

/// Tenant. Created externally; the engine only reads it (admin writes aside).
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub owner_email: String,
    pub status: ProjectStatus,
    /// NULL = unlimited.
    pub monthly_limit: Option<i32>,
    /// NULL = unlimited.
    pub rate_limit_per_minute: Option<i32>,
    pub created_at: DateTime<Utc>,
}

impl Project {
    pub fn is_suspended(&self) -> bool {
        self.status == ProjectStatus::Suspended
    }
}

/// API key row joined with the owning project's status for the auth path.
#[derive(Debug, Clone, FromRow)]
pub struct ApiKeyRecord {
    pub id: Uuid,
    pub project_id: Uuid,
    pub project_status: ProjectStatus,
}

/// One durable delivery intent, possibly retried multiple times.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Message {
    pub id: Uuid,
    pub project_id: Uuid,
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub message_type: MessageType,
    pub status: MessageStatus,
    pub from_address: String,
    pub to_address: String,
    pub subject: Option<String>,
    pub body: String,
    pub metadata: Option<serde_json::Value>,
    pub idempotency_key: Option<String>,
    pub attempts: i32,
    pub max_attempts: i32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// Reserved for scheduled delivery; never set by the engine.
    pub scheduled_for: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only lifecycle observation.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Event {
    pub id: Uuid,
    pub message_id: Uuid,
    pub project_id: Uuid,
    pub event_type: EventType,
    pub provider_response: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Per-project, per-month, per-channel delivery counter.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct UsageBucket {
    pub project_id: Uuid,
    pub period: String,
    pub message_type: MessageType,
    pub count: i32,
}

/// The calendar-month key used by the usage ledger, e.g. "2026-08".
pub fn current_period(now: DateTime<Utc>) -> String {
    now.format("%Y-%m").to_string()
}

/// Wall-clock time truncated to the minute; the tumbling rate-limit window.
pub fn minute_window(now: DateTime<Utc>) -> DateTime<Utc> {
    now.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now)
}
