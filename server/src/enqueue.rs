//! Message acceptance: the ordered admission pipeline.
//!
//! Suspension is checked first (free and always fatal), then quota (read
//! only), then the rate limiter (consumes a token, so it must not be charged
//! for requests that die earlier), then idempotency. The final insert and its
//! `requested` event commit in one transaction; the idempotency unique index
//! settles any race the advisory read missed.

use anyhow::Context;
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::DbPool;
use crate::error::ApiError;
use crate::idempotency::{self, IdempotencyCheck};
use crate::models::{EventType, Message, MessageStatus, MessageType};
use crate::quota::{self, QuotaDecision};
use crate::rate_limit::{self, RateDecision};
use crate::store::{self, NewMessage};

/// What the caller gets back from a successful accept.
#[derive(Debug, Clone)]
pub enum AcceptOutcome {
    /// Fresh message, now queued for delivery.
    Queued(Message),
    /// An earlier accept under the same idempotency key won.
    Duplicate {
        message_id: Uuid,
        status: MessageStatus,
    },
}

/// Admission request, already syntax-validated by the transport layer.
#[derive(Debug, Clone)]
pub struct AcceptRequest {
    pub message_type: MessageType,
    pub from_address: String,
    pub to_address: String,
    pub subject: Option<String>,
    pub body: String,
    pub idempotency_key: Option<String>,
}

#[tracing::instrument(skip(pool, request), fields(channel = %request.message_type))]
pub async fn accept(
    pool: &DbPool,
    project_id: Uuid,
    request: AcceptRequest,
) -> Result<AcceptOutcome, ApiError> {
    let project = store::get_project(pool, project_id)
        .await?
        .ok_or(ApiError::NotFound("project"))?;

    if project.is_suspended() {
        return Err(ApiError::ProjectSuspended);
    }

    if let QuotaDecision::Exceeded { current, limit } = quota::check(pool, &project).await? {
        debug!(project_id = %project.id, current, limit, "monthly quota exceeded");
        return Err(ApiError::MonthlyQuotaExceeded { limit, current });
    }

    if let RateDecision::Exceeded { current, limit } = rate_limit::acquire(pool, &project).await? {
        debug!(project_id = %project.id, current, limit, "rate limit exceeded");
        return Err(ApiError::RateLimitExceeded { limit, current });
    }

    if let IdempotencyCheck::Duplicate { message_id, status } =
        idempotency::check(pool, project.id, request.idempotency_key.as_deref()).await?
    {
        debug!(project_id = %project.id, message_id = %message_id, "idempotency hit");
        return Ok(AcceptOutcome::Duplicate { message_id, status });
    }

    let new = NewMessage {
        project_id: project.id,
        message_type: request.message_type,
        from_address: request.from_address,
        to_address: request.to_address,
        subject: request.subject,
        body: request.body,
        metadata: None,
        idempotency_key: request.idempotency_key,
    };

    let mut tx = pool
        .begin()
        .await
        .context("Failed to open enqueue transaction")?;

    let message = match store::insert_message(&mut tx, &new).await {
        Ok(message) => message,
        Err(err) if store::is_unique_violation(&err) => {
            // Lost the insert race; the index picked a winner. Roll back and
            // hand the caller the winning row.
            drop(tx);
            let key = new
                .idempotency_key
                .as_deref()
                .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("unique violation without key")))?;
            let winner = store::find_message_by_idempotency_key(pool, project.id, key)
                .await?
                .ok_or_else(|| {
                    ApiError::Internal(anyhow::anyhow!("idempotency winner vanished"))
                })?;
            return Ok(AcceptOutcome::Duplicate {
                message_id: winner.id,
                status: winner.status,
            });
        }
        Err(err) => {
            return Err(ApiError::Internal(
                anyhow::Error::new(err).context("Failed to insert message"),
            ))
        }
    };

    store::insert_event(&mut tx, message.id, project.id, EventType::Requested, None).await?;

    tx.commit()
        .await
        .context("Failed to commit enqueue transaction")?;

    info!(
        project_id = %project.id,
        message_id = %message.id,
        channel = %message.message_type,
        "message accepted"
    );
    metrics::counter!("messages_accepted_total", 1);

    Ok(AcceptOutcome::Queued(message))
}
