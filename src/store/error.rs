//! Store Errors

use uuid::Uuid;

use crate::domain::DomainError;

/// Errors that can occur in the transaction store
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Optimistic concurrency check failed; nothing was written
    #[error("Write conflict on {entity} {id}")]
    Conflict { entity: &'static str, id: Uuid },

    #[error("Account not found: {0}")]
    AccountNotFound(Uuid),

    #[error("Account already exists: {0}")]
    AccountExists(Uuid),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(Uuid),

    /// Another transaction of the same kind already holds this key
    #[error("Correlation key already in use: {0}")]
    DuplicateCorrelation(String),

    /// Business rule rejected the write (e.g. insufficient balance)
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),
}

impl StoreError {
    pub fn conflict(entity: &'static str, id: Uuid) -> Self {
        Self::Conflict { entity, id }
    }

    /// Check if this error is a concurrency conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }

    /// Check if the same write could succeed once the store is back
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        // 40001 serialization_failure, 40P01 deadlock_detected
        if let sqlx::Error::Database(ref db_err) = err {
            if let Some(code) = db_err.code() {
                if code == "40001" || code == "40P01" {
                    return StoreError::Conflict {
                        entity: "row",
                        id: Uuid::nil(),
                    };
                }
            }
        }
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Unavailable(err.to_string())
            }
            other => StoreError::Database(other),
        }
    }
}
