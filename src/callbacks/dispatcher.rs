//! Callback Dispatcher
//!
//! Persists each callback to the inbox, then routes it to the
//! reconciliation engine and records how processing ended.

use std::sync::Arc;
use uuid::Uuid;

use crate::inbox::{InboxEntry, InboxStatus, NewInboxEntry};
use crate::reconciliation::{ReconcileOutcome, ReconciliationEngine};
use crate::store::{LedgerStore, StoreError};

use super::{CallbackEvent, CallbackKind};

/// What happened to one delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub entry_id: Uuid,
    pub status: InboxStatus,
    /// Byte-identical body was already in the inbox
    pub duplicate: bool,
}

#[derive(Clone)]
pub struct CallbackDispatcher {
    store: Arc<dyn LedgerStore>,
    engine: ReconciliationEngine,
}

impl CallbackDispatcher {
    pub fn new(store: Arc<dyn LedgerStore>, engine: ReconciliationEngine) -> Self {
        Self { store, engine }
    }

    /// Persist a delivery, then process it.
    ///
    /// Only a failure to persist is returned as an error: the caller must
    /// then refuse the delivery so the gateway sends it again. Everything
    /// after persistence is recorded on the inbox entry instead.
    pub async fn accept(
        &self,
        kind: CallbackKind,
        body: serde_json::Value,
    ) -> Result<DispatchReport, StoreError> {
        let (entry, inserted) = self
            .store
            .record_callback(NewInboxEntry::new(kind, body))
            .await?;

        if !inserted && !entry.status.is_replayable() {
            tracing::info!(
                entry_id = %entry.id,
                callback_kind = %kind,
                status = %entry.status,
                "Duplicate callback delivery, already handled"
            );
            return Ok(DispatchReport {
                entry_id: entry.id,
                status: entry.status,
                duplicate: true,
            });
        }

        let status = self.process(&entry).await;
        Ok(DispatchReport {
            entry_id: entry.id,
            status,
            duplicate: !inserted,
        })
    }

    /// Parse and reconcile a stored entry, recording the resulting status
    pub async fn process(&self, entry: &InboxEntry) -> InboxStatus {
        let (status, last_error) = match CallbackEvent::parse(entry.kind, &entry.payload) {
            Err(e) => {
                tracing::warn!(entry_id = %entry.id, error = %e, "Rejecting callback payload");
                (InboxStatus::Rejected, Some(e.to_string()))
            }
            Ok(event) => {
                tracing::info!(
                    entry_id = %entry.id,
                    callback_kind = %event.kind,
                    correlation_key = %event.correlation_key,
                    success = event.outcome.is_success(),
                    "Processing callback"
                );
                match self.engine.reconcile(&event).await {
                    Ok(ReconcileOutcome::Settled { .. })
                    | Ok(ReconcileOutcome::AlreadyTerminal { .. }) => (InboxStatus::Processed, None),
                    Ok(ReconcileOutcome::Unmatched) => (
                        InboxStatus::Unmatched,
                        Some(format!("no {} matches {}", event.kind.transaction_kind(), event.correlation_key)),
                    ),
                    Err(e) => {
                        tracing::error!(
                            entry_id = %entry.id,
                            correlation_key = %event.correlation_key,
                            error = %e,
                            "Reconciliation failed, entry kept for replay"
                        );
                        (InboxStatus::Failed, Some(e.to_string()))
                    }
                }
            }
        };

        if let Err(e) = self.store.update_callback(entry.id, status, last_error).await {
            // The ledger write (if any) is committed; a replay would be a no-op
            tracing::error!(entry_id = %entry.id, error = %e, "Failed to record inbox status");
        }

        status
    }
}
