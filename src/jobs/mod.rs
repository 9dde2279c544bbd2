//! Scheduled Jobs
//!
//! Background jobs that close the gaps left by asynchronous callbacks:
//! replaying inbox entries that could not be reconciled on arrival, and
//! failing pending transactions whose initiation never reached the gateway.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

use crate::callbacks::CallbackDispatcher;
use crate::config::JobsConfig;
use crate::inbox::InboxStatus;
use crate::reconciliation::{ReconcileOutcome, ReconciliationEngine};
use crate::store::{LedgerStore, StoreError};

/// Entries handled per replay pass
pub const REPLAY_BATCH_SIZE: i64 = 100;

/// Transactions handled per reaper pass
pub const REAPER_BATCH_SIZE: i64 = 100;

/// Failure reason recorded by the reaper
pub const STALE_PENDING_REASON: &str = "Initiation did not complete; no gateway request recorded";

// =========================================================================
// Inbox replay
// =========================================================================

/// Outcome counts of one replay pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub replayed: u64,
    pub processed: u64,
    pub unmatched: u64,
    pub failed: u64,
    pub rejected: u64,
    pub dead_lettered: u64,
}

/// Re-dispatch replayable inbox entries last touched before `settle_for`
/// ago. Entries that used up `max_attempts` are marked dead instead.
pub async fn replay_inbox(
    store: &dyn LedgerStore,
    dispatcher: &CallbackDispatcher,
    max_attempts: i32,
    settle_for: Duration,
) -> Result<ReplaySummary, JobError> {
    let older_than = Utc::now() - to_chrono(settle_for)?;
    let entries = store.list_replayable(older_than, REPLAY_BATCH_SIZE).await?;
    let mut summary = ReplaySummary::default();

    for entry in entries {
        if entry.attempts >= max_attempts {
            tracing::error!(
                entry_id = %entry.id,
                callback_kind = %entry.kind,
                attempts = entry.attempts,
                last_error = ?entry.last_error,
                payload = %entry.payload,
                "Callback dead-lettered after repeated failures"
            );
            store
                .update_callback(entry.id, InboxStatus::Dead, entry.last_error.clone())
                .await?;
            summary.dead_lettered += 1;
            continue;
        }

        summary.replayed += 1;
        match dispatcher.process(&entry).await {
            InboxStatus::Processed => summary.processed += 1,
            InboxStatus::Unmatched => summary.unmatched += 1,
            InboxStatus::Rejected => summary.rejected += 1,
            _ => summary.failed += 1,
        }
    }

    if summary.replayed > 0 || summary.dead_lettered > 0 {
        tracing::info!(
            replayed = summary.replayed,
            processed = summary.processed,
            unmatched = summary.unmatched,
            failed = summary.failed,
            dead_lettered = summary.dead_lettered,
            "Inbox replay pass finished"
        );
    }

    Ok(summary)
}

// =========================================================================
// Stale-pending reaper
// =========================================================================

/// Fail pending transactions older than `stale_after` that never received
/// a correlation key (withdrawals are refunded). Transactions holding a key
/// are left for their callback.
pub async fn reap_stale_pending(
    store: &dyn LedgerStore,
    engine: &ReconciliationEngine,
    stale_after: Duration,
) -> Result<u64, JobError> {
    let older_than = Utc::now() - to_chrono(stale_after)?;
    let stale = store.list_stale_pending(older_than, REAPER_BATCH_SIZE).await?;
    let mut reaped = 0;

    for tx in stale {
        match engine.fail_transaction(tx.id, STALE_PENDING_REASON).await {
            Ok(ReconcileOutcome::Settled { .. }) => {
                tracing::warn!(
                    transaction_id = %tx.id,
                    user_id = %tx.user_id,
                    transaction_kind = %tx.kind,
                    amount = %tx.amount,
                    created_at = %tx.created_at,
                    "Failed stale pending transaction"
                );
                reaped += 1;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::error!(transaction_id = %tx.id, error = %e, "Could not reap stale transaction");
            }
        }
    }

    Ok(reaped)
}

fn to_chrono(d: Duration) -> Result<chrono::Duration, JobError> {
    chrono::Duration::from_std(d).map_err(|_| JobError::InvalidDuration(d))
}

// =========================================================================
// Job Scheduler
// =========================================================================

/// Configuration for job scheduler
#[derive(Debug, Clone)]
pub struct JobSchedulerConfig {
    /// Interval between inbox replay passes (default: 30 seconds)
    pub inbox_replay_interval: Duration,
    /// Attempts before an inbox entry is dead-lettered (default: 10)
    pub inbox_max_attempts: i32,
    /// Interval between reaper passes (default: 1 minute)
    pub reaper_interval: Duration,
    /// Age at which a keyless pending transaction is failed (default: 15 minutes)
    pub stale_pending_after: Duration,
}

impl Default for JobSchedulerConfig {
    fn default() -> Self {
        Self {
            inbox_replay_interval: Duration::from_secs(30),
            inbox_max_attempts: 10,
            reaper_interval: Duration::from_secs(60),
            stale_pending_after: Duration::from_secs(900),
        }
    }
}

impl From<&JobsConfig> for JobSchedulerConfig {
    fn from(config: &JobsConfig) -> Self {
        Self {
            inbox_replay_interval: config.inbox_replay_interval,
            inbox_max_attempts: config.inbox_max_attempts,
            stale_pending_after: config.stale_pending_after,
            ..Self::default()
        }
    }
}

/// Job Scheduler - runs the replay and reaper jobs
pub struct JobScheduler {
    store: Arc<dyn LedgerStore>,
    dispatcher: CallbackDispatcher,
    engine: ReconciliationEngine,
    config: JobSchedulerConfig,
}

impl JobScheduler {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        dispatcher: CallbackDispatcher,
        engine: ReconciliationEngine,
        config: JobSchedulerConfig,
    ) -> Self {
        Self {
            store,
            dispatcher,
            engine,
            config,
        }
    }

    /// Start the job scheduler in the background
    /// Returns a handle that can be used to abort the scheduler
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        tracing::info!(config = ?self.config, "Job scheduler started");

        let mut replay_interval = interval(self.config.inbox_replay_interval);
        let mut reaper_interval = interval(self.config.reaper_interval);

        loop {
            tokio::select! {
                _ = replay_interval.tick() => {
                    if let Err(e) = self.replay().await {
                        tracing::error!(error = %e, "Inbox replay failed");
                    }
                }
                _ = reaper_interval.tick() => {
                    if let Err(e) = self.reap().await {
                        tracing::error!(error = %e, "Stale-pending reaper failed");
                    }
                }
            }
        }
    }

    async fn replay(&self) -> Result<ReplaySummary, JobError> {
        replay_inbox(
            self.store.as_ref(),
            &self.dispatcher,
            self.config.inbox_max_attempts,
            self.config.inbox_replay_interval,
        )
        .await
    }

    async fn reap(&self) -> Result<u64, JobError> {
        reap_stale_pending(self.store.as_ref(), &self.engine, self.config.stale_pending_after).await
    }

    /// Run all jobs once (for manual trigger or testing)
    pub async fn run_all_once(&self) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        match self.replay().await {
            Ok(summary) => report.replay = summary,
            Err(e) => report.errors.push(format!("Inbox replay: {}", e)),
        }

        match self.reap().await {
            Ok(count) => report.transactions_reaped = count,
            Err(e) => report.errors.push(format!("Stale-pending reaper: {}", e)),
        }

        report.completed_at = Utc::now();
        report
    }
}

/// Report from running all jobs once
#[derive(Debug, Clone, Default)]
pub struct MaintenanceReport {
    pub replay: ReplaySummary,
    pub transactions_reaped: u64,
    pub errors: Vec<String>,
    pub completed_at: DateTime<Utc>,
}

/// Job execution errors
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Duration out of range: {0:?}")]
    InvalidDuration(Duration),
}

// =========================================================================
// Tests
// =========================================================================
