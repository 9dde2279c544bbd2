//! Domain Error Types
//!
//! Pure domain errors that don't depend on infrastructure.

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use super::TransactionStatus;

/// Business rule violations and domain invariant failures.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DomainError {
    /// Insufficient balance for a withdrawal debit
    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: Decimal, available: Decimal },

    /// Invalid amount (zero, negative, too precise or too large)
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Transaction already left the pending state
    #[error("Transaction {id} is already {status}")]
    AlreadyTerminal { id: Uuid, status: TransactionStatus },

    /// Transaction and account do not belong together
    #[error("Transaction {transaction_id} does not belong to user {user_id}")]
    OwnerMismatch { transaction_id: Uuid, user_id: Uuid },
}

impl DomainError {
    /// Create an insufficient balance error
    pub fn insufficient_balance(required: Decimal, available: Decimal) -> Self {
        Self::InsufficientBalance {
            required,
            available,
        }
    }

    /// Check if this is a client error (caller's fault)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InsufficientBalance { .. } | Self::InvalidAmount(_)
        )
    }
}

impl From<super::AmountError> for DomainError {
    fn from(err: super::AmountError) -> Self {
        Self::InvalidAmount(err.to_string())
    }
}
