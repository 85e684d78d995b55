//! Usage ledger: monthly per-channel delivery counters.

use anyhow::Result;
use chrono::Utc;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::models::{current_period, MessageType};
use crate::store;

/// Record one successful delivery against the `(project, period, channel)`
/// bucket. Called only from inside the dispatcher's transaction so the
/// counter commits together with the `delivered` transition.
pub async fn record(
    tx: &mut Transaction<'_, Postgres>,
    project_id: Uuid,
    channel: MessageType,
) -> Result<()> {
    let period = current_period(Utc::now());
    store::increment_usage(tx, project_id, &period, channel).await
}
