//! Idempotency guard for message acceptance.
//!
//! The read here is advisory; the unique partial index on
//! `(project_id, idempotency_key)` is the arbiter under concurrent accepts.
//! A losing inserter re-consults the guard to return the winner's id.

use anyhow::Result;
use uuid::Uuid;

use crate::db::DbPool;
use crate::models::MessageStatus;
use crate::store;

/// Outcome of an idempotency check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdempotencyCheck {
    /// No prior message under this key (or no key supplied).
    Fresh,
    /// An earlier accept already created this message.
    Duplicate {
        message_id: Uuid,
        status: MessageStatus,
    },
}

pub async fn check(
    pool: &DbPool,
    project_id: Uuid,
    key: Option<&str>,
) -> Result<IdempotencyCheck> {
    let Some(key) = key else {
        return Ok(IdempotencyCheck::Fresh);
    };

    match store::find_message_by_idempotency_key(pool, project_id, key).await? {
        Some(existing) => Ok(IdempotencyCheck::Duplicate {
            message_id: existing.id,
            status: existing.status,
        }),
        None => Ok(IdempotencyCheck::Fresh),
    }
}
