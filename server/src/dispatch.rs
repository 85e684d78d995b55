//! The worker loop's delivery engine.
//!
//! One poll = one transaction: claim a batch of ready messages with
//! `FOR UPDATE SKIP LOCKED`, drive each through the state machine, commit at
//! the end of the batch. A crash mid-batch rolls back the uncommitted portion
//! and the claim dissolves, so those messages become claimable again.
//!
//! Provider calls happen inside the transaction, before commit. If the commit
//! fails after a provider accepted a send, the message stays `queued` and is
//! retried: this is the at-least-once boundary.

use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use sqlx::{Postgres, Transaction};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::db::DbPool;
use crate::models::{EventType, Message, MessageStatus, ProjectStatus};
use crate::providers::ProviderBroker;
use crate::retry;
use crate::store;
use crate::usage;

/// Cumulative outcome counters, reported by the supervisor heartbeat.
#[derive(Debug, Default)]
pub struct DispatchCounters {
    pub claimed: AtomicU64,
    pub delivered: AtomicU64,
    pub retried: AtomicU64,
    pub failed: AtomicU64,
    pub dead: AtomicU64,
    pub skipped: AtomicU64,
}

impl DispatchCounters {
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            claimed: self.claimed.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dead: self.dead.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CounterSnapshot {
    pub claimed: u64,
    pub delivered: u64,
    pub retried: u64,
    pub failed: u64,
    pub dead: u64,
    pub skipped: u64,
}

/// Per-batch tallies, folded into the shared counters only after commit so a
/// rolled-back batch never shows up in the heartbeat.
#[derive(Debug, Default)]
struct BatchTally {
    delivered: u64,
    retried: u64,
    failed: u64,
    dead: u64,
    skipped: u64,
}

pub struct Dispatcher {
    pool: DbPool,
    broker: Arc<ProviderBroker>,
    batch_size: i64,
    counters: Arc<DispatchCounters>,
}

impl Dispatcher {
    pub fn new(pool: DbPool, broker: Arc<ProviderBroker>, batch_size: i64) -> Self {
        Self {
            pool,
            broker,
            batch_size,
            counters: Arc::new(DispatchCounters::default()),
        }
    }

    pub fn counters(&self) -> Arc<DispatchCounters> {
        Arc::clone(&self.counters)
    }

    /// Run one poll. Returns the number of messages processed and committed.
    #[tracing::instrument(skip(self))]
    pub async fn run_once(&self) -> Result<usize> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to open claim transaction")?;

        let batch = store::claim_ready_messages(&mut tx, self.batch_size).await?;
        if batch.is_empty() {
            tx.rollback().await.ok();
            return Ok(0);
        }

        debug!(count = batch.len(), "claimed batch");

        let mut tally = BatchTally::default();
        for message in &batch {
            self.process_one(&mut tx, message, &mut tally).await?;
        }

        tx.commit()
            .await
            .context("Failed to commit dispatch batch")?;

        self.counters
            .claimed
            .fetch_add(batch.len() as u64, Ordering::Relaxed);
        self.counters
            .delivered
            .fetch_add(tally.delivered, Ordering::Relaxed);
        self.counters
            .retried
            .fetch_add(tally.retried, Ordering::Relaxed);
        self.counters.failed.fetch_add(tally.failed, Ordering::Relaxed);
        self.counters.dead.fetch_add(tally.dead, Ordering::Relaxed);
        self.counters
            .skipped
            .fetch_add(tally.skipped, Ordering::Relaxed);

        metrics::counter!("messages_delivered_total", tally.delivered);
        metrics::counter!("messages_dead_lettered_total", tally.dead);

        Ok(batch.len())
    }

    /// Drive a single claimed message through the state machine.
    async fn process_one(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        message: &Message,
        tally: &mut BatchTally,
    ) -> Result<()> {
        // Suspension re-check against the live project row. A suspended
        // project pauses delivery without penalty: record the observation,
        // leave status and attempts untouched, and the message stays
        // claimable for when the project is resumed.
        let project_status = store::get_project_status(tx, message.project_id).await?;
        match project_status {
            Some(ProjectStatus::Suspended) | None => {
                store::insert_event(
                    tx,
                    message.id,
                    message.project_id,
                    EventType::Skipped,
                    Some(json!({ "reason": "Project suspended" })),
                )
                .await?;
                tally.skipped += 1;
                return Ok(());
            }
            Some(ProjectStatus::Active) => {}
        }

        // Ceiling check before attempting: a message that exhausted its
        // attempts on earlier polls dead-letters now.
        if message.attempts >= message.max_attempts {
            store::mark_message_status(tx, message.id, MessageStatus::Dead).await?;
            store::insert_event(
                tx,
                message.id,
                message.project_id,
                EventType::Dead,
                Some(json!({
                    "reason": "Max attempts exceeded",
                    "attempts": message.attempts,
                })),
            )
            .await?;
            warn!(message_id = %message.id, attempts = message.attempts, "dead-lettered");
            tally.dead += 1;
            return Ok(());
        }

        let attempts = store::increment_attempts(tx, message.id).await?;

        let verdict = self.broker.send(message).await;

        if verdict.success {
            store::mark_message_status(tx, message.id, MessageStatus::Delivered).await?;
            store::insert_event(
                tx,
                message.id,
                message.project_id,
                EventType::Delivered,
                Some(verdict.provider_response),
            )
            .await?;
            usage::record(tx, message.project_id, message.message_type).await?;
            info!(message_id = %message.id, attempts, "delivered");
            tally.delivered += 1;
        } else if verdict.retryable {
            // Attempt bookkeeping only; if this attempt was the last, the
            // next poll dead-letters the message.
            let backoff = retry::backoff(attempts as u32);
            let next_attempt_at = Utc::now()
                + ChronoDuration::from_std(backoff).unwrap_or(ChronoDuration::seconds(1800));
            store::schedule_retry(tx, message.id, next_attempt_at).await?;
            store::insert_event(
                tx,
                message.id,
                message.project_id,
                EventType::Failed,
                Some(json!({
                    "retryable": true,
                    "error": verdict.error_message,
                    "next_attempt_at": next_attempt_at,
                    "backoff_seconds": backoff.as_secs(),
                    "provider_response": verdict.provider_response,
                })),
            )
            .await?;
            debug!(
                message_id = %message.id,
                attempts,
                backoff_seconds = backoff.as_secs(),
                "transient failure, retry scheduled"
            );
            tally.retried += 1;
        } else {
            store::mark_message_status(tx, message.id, MessageStatus::Failed).await?;
            store::insert_event(
                tx,
                message.id,
                message.project_id,
                EventType::Failed,
                Some(json!({
                    "retryable": false,
                    "error": verdict.error_message,
                    "provider_response": verdict.provider_response,
                })),
            )
            .await?;
            info!(message_id = %message.id, attempts, "permanent failure");
            tally.failed += 1;
        }

        Ok(())
    }
}
