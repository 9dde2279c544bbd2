//! Reconciliation Engine
//!
//! Matches a gateway outcome to its pending transaction, decides the
//! terminal state and balance effect, and commits both through the store's
//! conditional write. A write conflict means someone else moved first: the
//! engine re-reads and decides again, so a duplicate callback racing the
//! original ends up as a no-op instead of a second mutation.

use chrono::{DateTime, Utc};
use rand::Rng;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::callbacks::{CallbackEvent, GatewayOutcome};
use crate::domain::{DomainError, Transaction, TransactionKind, TransactionStatus, UserAccount};
use crate::store::{AccountWrite, LedgerStore, Settlement};

use super::ReconcileError;

/// Retry behaviour on write conflicts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Exponential backoff with up to one base delay of jitter
    fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_millis() as u64;
        let exp = base.saturating_mul(1u64 << attempt.min(10));
        let jitter = if base == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=base)
        };
        Duration::from_millis(exp + jitter)
    }
}

/// Result of handling one outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The transaction moved to a terminal state in this call
    Settled {
        transaction_id: Uuid,
        status: TransactionStatus,
    },
    /// The transaction was already terminal; nothing changed
    AlreadyTerminal {
        transaction_id: Uuid,
        status: TransactionStatus,
    },
    /// No transaction carries the correlation key; nothing changed
    Unmatched,
}

#[derive(Debug, Clone, Copy)]
enum Target<'a> {
    Correlation {
        kind: TransactionKind,
        key: &'a str,
        /// Transaction id we sent as OriginatorConversationID
        originator: Option<&'a str>,
    },
    Id(Uuid),
}

impl fmt::Display for Target<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Correlation { kind, key, .. } => write!(f, "{} {}", kind, key),
            Target::Id(id) => write!(f, "transaction {}", id),
        }
    }
}

/// Reconciliation engine over a shared store handle
#[derive(Clone)]
pub struct ReconciliationEngine {
    store: Arc<dyn LedgerStore>,
    retry: RetryPolicy,
}

impl ReconciliationEngine {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self::with_retry_policy(store, RetryPolicy::default())
    }

    pub fn with_retry_policy(store: Arc<dyn LedgerStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    /// Apply a callback outcome to the transaction it names
    pub async fn reconcile(&self, event: &CallbackEvent) -> Result<ReconcileOutcome, ReconcileError> {
        let target = Target::Correlation {
            kind: event.kind.transaction_kind(),
            key: &event.correlation_key,
            originator: event.originator_key.as_deref(),
        };
        self.settle_with_retry(target, &event.outcome).await
    }

    /// Record the gateway's correlation key, retrying while the store is
    /// unavailable
    pub async fn attach_correlation(
        &self,
        transaction_id: Uuid,
        key: &str,
    ) -> Result<Transaction, ReconcileError> {
        let mut attempt = 0;
        loop {
            match self.store.attach_correlation(transaction_id, key).await {
                Err(e) if e.is_transient() && attempt + 1 < self.retry.max_attempts => {
                    attempt += 1;
                    let delay = self.retry.delay(attempt);
                    tracing::warn!(
                        transaction_id = %transaction_id,
                        correlation_key = %key,
                        error = %e,
                        "Could not record correlation key, retrying (attempt {}/{}) in {:?}",
                        attempt + 1,
                        self.retry.max_attempts,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other.map_err(Into::into),
            }
        }
    }

    /// Fail a pending transaction by id (refunding withdrawals). Used when
    /// initiation fails and by the stale-pending reaper.
    pub async fn fail_transaction(
        &self,
        transaction_id: Uuid,
        reason: impl Into<String>,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let outcome = GatewayOutcome::Failure {
            reason: reason.into(),
        };
        self.settle_with_retry(Target::Id(transaction_id), &outcome)
            .await
    }

    async fn settle_with_retry(
        &self,
        target: Target<'_>,
        outcome: &GatewayOutcome,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let mut attempt = 0;
        loop {
            match self.try_settle(target, outcome).await {
                Err(e) if e.is_conflict() => {
                    attempt += 1;
                    if attempt >= self.retry.max_attempts {
                        tracing::error!(
                            target_ref = %target,
                            attempts = attempt,
                            "Write conflicts persisted, giving up"
                        );
                        return Err(ReconcileError::MaxRetriesExceeded(target.to_string()));
                    }
                    let delay = self.retry.delay(attempt);
                    tracing::warn!(
                        target_ref = %target,
                        "Write conflict, retrying (attempt {}/{}) in {:?}",
                        attempt + 1,
                        self.retry.max_attempts,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    /// One read-decide-commit pass
    async fn try_settle(
        &self,
        target: Target<'_>,
        outcome: &GatewayOutcome,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let found = match target {
            Target::Correlation {
                kind,
                key,
                originator,
            } => match self.store.find_by_correlation(kind, key).await? {
                Some(tx) => Some(tx),
                None => self.find_by_originator(kind, key, originator).await?,
            },
            Target::Id(id) => self.store.get_transaction(id).await?,
        };

        let tx = match (found, target) {
            (Some(tx), _) => tx,
            (None, Target::Correlation { kind, key, .. }) => {
                tracing::warn!(
                    transaction_kind = %kind,
                    correlation_key = %key,
                    "No transaction matches callback, discarding"
                );
                return Ok(ReconcileOutcome::Unmatched);
            }
            (None, Target::Id(id)) => return Err(ReconcileError::TransactionNotFound(id)),
        };

        if tx.status.is_terminal() {
            tracing::info!(
                transaction_id = %tx.id,
                status = %tx.status,
                "Transaction already settled, ignoring duplicate outcome"
            );
            return Ok(ReconcileOutcome::AlreadyTerminal {
                transaction_id: tx.id,
                status: tx.status,
            });
        }

        let account = if needs_account(&tx, outcome) {
            self.store.get_account(tx.user_id).await?
        } else {
            None
        };

        let mut settlement = plan_settlement(&tx, account.as_ref(), outcome, Utc::now())?;
        if let Target::Correlation { key, .. } = target {
            // Matched through the originator id: keep the gateway's key too
            settlement
                .transaction
                .gateway_request_id
                .get_or_insert_with(|| key.to_string());
        }
        self.store.commit_settlement(&settlement).await?;

        let settled = &settlement.transaction;
        tracing::info!(
            transaction_id = %settled.id,
            user_id = %settled.user_id,
            transaction_kind = %settled.kind,
            amount = %settled.amount,
            status = %settled.status,
            balance = ?settlement.account.as_ref().map(|w| w.account.balance.value()),
            "Transaction settled"
        );

        Ok(ReconcileOutcome::Settled {
            transaction_id: settled.id,
            status: settled.status,
        })
    }
}

impl ReconciliationEngine {
    /// Fallback for a callback whose key was never recorded: the
    /// originator id names the transaction directly
    async fn find_by_originator(
        &self,
        kind: TransactionKind,
        key: &str,
        originator: Option<&str>,
    ) -> Result<Option<Transaction>, ReconcileError> {
        let Some(id) = originator.and_then(|o| Uuid::parse_str(o).ok()) else {
            return Ok(None);
        };
        let Some(tx) = self.store.get_transaction(id).await? else {
            return Ok(None);
        };

        let keyed_elsewhere = tx.gateway_request_id.as_deref().is_some_and(|k| k != key);
        if tx.kind != kind || keyed_elsewhere {
            tracing::warn!(
                transaction_id = %tx.id,
                correlation_key = %key,
                stored_key = ?tx.gateway_request_id,
                "Originator id names a transaction that does not fit the callback"
            );
            return Ok(None);
        }

        tracing::info!(
            transaction_id = %tx.id,
            correlation_key = %key,
            "Matched callback by originator id"
        );
        Ok(Some(tx))
    }
}

/// Only a failed deposit leaves the account untouched
fn needs_account(tx: &Transaction, outcome: &GatewayOutcome) -> bool {
    !(tx.kind == TransactionKind::Deposit && !outcome.is_success())
}

/// Decide the terminal state and balance effect of `outcome` on a pending
/// transaction.
///
/// | kind       | outcome | balance            | counters           |
/// |------------|---------|--------------------|--------------------|
/// | deposit    | success | + amount           | total_deposited += |
/// | deposit    | failure | unchanged          | unchanged          |
/// | withdrawal | success | unchanged (debited at initiation) | total_withdrawn += |
/// | withdrawal | failure | + amount (refund)  | unchanged          |
pub fn plan_settlement(
    tx: &Transaction,
    account: Option<&UserAccount>,
    outcome: &GatewayOutcome,
    now: DateTime<Utc>,
) -> Result<Settlement, ReconcileError> {
    if let Some(account) = account {
        if account.id != tx.user_id {
            return Err(DomainError::OwnerMismatch {
                transaction_id: tx.id,
                user_id: account.id,
            }
            .into());
        }
    }

    let require_account = || {
        account.ok_or(ReconcileError::AccountMissing {
            transaction_id: tx.id,
            user_id: tx.user_id,
        })
    };

    let (transaction, next) = match (tx.kind, outcome) {
        (TransactionKind::Deposit, GatewayOutcome::Failure { reason }) => {
            return Ok(Settlement {
                transaction: tx.fail(reason.clone(), now)?,
                account: None,
            });
        }
        (
            TransactionKind::Deposit,
            GatewayOutcome::Success {
                receipt_ref,
                reported_amount,
            },
        ) => {
            if let Some(reported) = reported_amount {
                if *reported != tx.amount.value() {
                    tracing::warn!(
                        transaction_id = %tx.id,
                        expected = %tx.amount,
                        reported = %reported,
                        "Gateway reported a different deposit amount; crediting the requested amount"
                    );
                }
            }
            let next = require_account()?.credit_deposit(&tx.amount)?;
            let done = tx.complete(receipt_ref.clone(), Some(next.balance), now)?;
            (done, next)
        }
        (TransactionKind::Withdrawal, GatewayOutcome::Success { receipt_ref, .. }) => {
            let next = require_account()?.confirm_withdrawal(&tx.amount);
            let done = tx.complete(receipt_ref.clone(), None, now)?;
            (done, next)
        }
        (TransactionKind::Withdrawal, GatewayOutcome::Failure { reason }) => {
            let next = require_account()?.refund_withdrawal(&tx.amount)?;
            let done = tx.fail(reason.clone(), now)?;
            (done, next)
        }
    };

    Ok(Settlement {
        transaction,
        account: Some(AccountWrite {
            expected_version: require_account()?.version,
            account: next,
        }),
    })
}
