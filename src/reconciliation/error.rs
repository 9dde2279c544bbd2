//! Reconciliation Errors

use uuid::Uuid;

use crate::domain::DomainError;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    /// A pending transaction points at an account that does not exist
    #[error("Account {user_id} for transaction {transaction_id} not found")]
    AccountMissing { transaction_id: Uuid, user_id: Uuid },

    #[error("Transaction not found: {0}")]
    TransactionNotFound(Uuid),

    /// Write conflicts persisted through every retry
    #[error("Maximum retries exceeded settling {0}")]
    MaxRetriesExceeded(String),
}

impl ReconcileError {
    /// Check if this error is a write conflict that a retry may resolve
    pub fn is_conflict(&self) -> bool {
        matches!(self, ReconcileError::Store(e) if e.is_conflict())
    }
}
