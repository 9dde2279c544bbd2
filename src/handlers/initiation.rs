//! Shared gateway-outcome handling for the initiation handlers

use crate::domain::Transaction;
use crate::error::AppError;
use crate::gateway::GatewayError;
use crate::reconciliation::ReconciliationEngine;
use crate::store::LedgerStore;

/// Act on a gateway call that returned no acknowledgement.
///
/// A definite refusal fails the transaction (refunding a withdrawal). When
/// the request may still have been carried out, the transaction stays
/// pending and is flagged so the reaper leaves it to its callback or an
/// operator.
pub(super) async fn settle_gateway_error(
    store: &dyn LedgerStore,
    engine: &ReconciliationEngine,
    pending: &Transaction,
    error: GatewayError,
) -> AppError {
    if error.outcome_unknown() {
        tracing::warn!(
            transaction_id = %pending.id,
            transaction_kind = %pending.kind,
            error = %error,
            "Gateway outcome unknown, holding transaction for review"
        );
        hold_for_review(
            store,
            pending,
            &format!("Gateway did not confirm {} request: {}", pending.kind, error),
        )
        .await;
        return AppError::GatewayOutcomeUnknown {
            transaction_id: pending.id,
            source: error,
        };
    }

    tracing::warn!(
        transaction_id = %pending.id,
        transaction_kind = %pending.kind,
        error = %error,
        "Gateway refused request, failing transaction"
    );
    let reason = format!("{} request failed: {}", request_label(pending), error);
    if let Err(fail_err) = engine.fail_transaction(pending.id, reason).await {
        tracing::error!(
            transaction_id = %pending.id,
            error = %fail_err,
            "Could not fail refused transaction, left for the stale-pending reaper"
        );
    }
    AppError::Gateway(error)
}

/// Record the key the gateway acknowledged with. If that cannot be done the
/// gateway is still processing the request, so the transaction is flagged
/// rather than left for the reaper.
pub(super) async fn record_correlation(
    store: &dyn LedgerStore,
    engine: &ReconciliationEngine,
    pending: &Transaction,
    key: &str,
) -> Result<Transaction, AppError> {
    match engine.attach_correlation(pending.id, key).await {
        Ok(tx) => Ok(tx),
        Err(e) => {
            tracing::error!(
                transaction_id = %pending.id,
                correlation_key = %key,
                error = %e,
                "Gateway accepted request but correlation key not recorded"
            );
            hold_for_review(
                store,
                pending,
                &format!("Gateway accepted with key {} but it was not recorded", key),
            )
            .await;
            Err(e.into())
        }
    }
}

async fn hold_for_review(store: &dyn LedgerStore, pending: &Transaction, reason: &str) {
    if let Err(e) = store.flag_for_review(pending.id, reason).await {
        tracing::error!(
            transaction_id = %pending.id,
            error = %e,
            "Could not flag transaction for review"
        );
    }
}

fn request_label(tx: &Transaction) -> &'static str {
    match tx.kind {
        crate::domain::TransactionKind::Deposit => "Collection",
        crate::domain::TransactionKind::Withdrawal => "Disbursement",
    }
}
