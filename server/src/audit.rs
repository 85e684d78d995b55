//! Control-plane audit trail.
//!
//! Admin writes record an `admin_events` row through a bounded in-process
//! channel drained by a dedicated task. Submission never blocks a request:
//! when the channel is full the record is dropped and counted. Dropping the
//! last [`AuditHandle`] closes the channel; the writer drains what remains
//! and exits, which is how shutdown flushes the trail.

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, warn};
use uuid::Uuid;

use crate::db::DbPool;
use crate::store;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug)]
pub struct AuditRecord {
    pub project_id: Option<Uuid>,
    pub action: String,
    pub detail: Option<Value>,
}

#[derive(Clone)]
pub struct AuditHandle {
    tx: mpsc::Sender<AuditRecord>,
}

impl AuditHandle {
    /// Enqueue a record; drops it with a warning if the writer is behind.
    pub fn record(&self, record: AuditRecord) {
        if let Err(mpsc::error::TrySendError::Full(dropped)) = self.tx.try_send(record) {
            warn!(action = %dropped.action, "audit channel full, dropping record");
            metrics::counter!("admin_events_dropped_total", 1);
        }
    }
}

/// Spawn the writer task. The returned handle is cheap to clone; await the
/// `JoinHandle` after the server stops to flush the remaining records.
pub fn spawn_writer(pool: DbPool) -> (AuditHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<AuditRecord>(CHANNEL_CAPACITY);

    let task = tokio::spawn(async move {
        while let Some(record) = rx.recv().await {
            if let Err(e) = store::insert_admin_event(
                &pool,
                record.project_id,
                &record.action,
                record.detail,
            )
            .await
            {
                error!(error = %e, action = %record.action, "failed to write admin event");
            }
        }
    });

    (AuditHandle { tx }, task)
}
