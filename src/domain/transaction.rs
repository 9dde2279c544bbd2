//! Transaction record
//!
//! A deposit or withdrawal initiated through the payment gateway. Created
//! `pending`, moved exactly once to `completed` or `failed`, never deleted.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::{Amount, Balance, DomainError};

/// Direction of money movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Collection: subscriber pays into the application
    Deposit,
    /// Disbursement: application pays out to the subscriber
    Withdrawal,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Deposit => "deposit",
            TransactionKind::Withdrawal => "withdrawal",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deposit" => Ok(TransactionKind::Deposit),
            "withdrawal" => Ok(TransactionKind::Withdrawal),
            other => Err(format!("unknown transaction kind: {}", other)),
        }
    }
}

/// Transaction lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
        }
    }

    /// Terminal states admit no further transition
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "completed" => Ok(TransactionStatus::Completed),
            "failed" => Ok(TransactionStatus::Failed),
            other => Err(format!("unknown transaction status: {}", other)),
        }
    }
}

/// A deposit or withdrawal record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: TransactionKind,
    pub amount: Amount,
    pub status: TransactionStatus,
    /// Normalized subscriber number the gateway was asked to charge or pay
    pub phone: String,
    /// Per-transaction reference sent to the gateway
    pub account_reference: String,
    /// Correlation key assigned by the gateway (CheckoutRequestID for
    /// deposits, ConversationID for withdrawals)
    pub gateway_request_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Account balance right after a completed deposit
    pub balance_after: Option<Decimal>,
    pub receipt_ref: Option<String>,
    pub failure_reason: Option<String>,
    /// Set when the gateway's answer to initiation is unknown; the
    /// transaction then waits for a callback or an operator, never the reaper
    pub review_reason: Option<String>,
}

impl Transaction {
    /// Create a new pending transaction
    pub fn pending(
        user_id: Uuid,
        kind: TransactionKind,
        amount: Amount,
        phone: String,
        account_reference: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            kind,
            amount,
            status: TransactionStatus::Pending,
            phone,
            account_reference,
            gateway_request_id: None,
            created_at: Utc::now(),
            completed_at: None,
            balance_after: None,
            receipt_ref: None,
            failure_reason: None,
            review_reason: None,
        }
    }

    /// Replace the gateway-facing reference, usually derived from `id`
    pub fn with_account_reference(mut self, account_reference: impl Into<String>) -> Self {
        self.account_reference = account_reference.into();
        self
    }

    pub fn is_pending(&self) -> bool {
        self.status == TransactionStatus::Pending
    }

    pub fn needs_review(&self) -> bool {
        self.review_reason.is_some()
    }

    fn ensure_pending(&self) -> Result<(), DomainError> {
        if self.status.is_terminal() {
            return Err(DomainError::AlreadyTerminal {
                id: self.id,
                status: self.status,
            });
        }
        Ok(())
    }

    /// Terminal success state. `balance_after` is only recorded for deposits.
    pub fn complete(
        &self,
        receipt_ref: Option<String>,
        balance_after: Option<Balance>,
        at: DateTime<Utc>,
    ) -> Result<Transaction, DomainError> {
        self.ensure_pending()?;

        let balance_after = match self.kind {
            TransactionKind::Deposit => balance_after.map(|b| b.value()),
            TransactionKind::Withdrawal => None,
        };

        Ok(Transaction {
            status: TransactionStatus::Completed,
            completed_at: Some(at),
            receipt_ref,
            balance_after,
            failure_reason: None,
            ..self.clone()
        })
    }

    /// Terminal failure state
    pub fn fail(&self, reason: impl Into<String>, at: DateTime<Utc>) -> Result<Transaction, DomainError> {
        self.ensure_pending()?;

        Ok(Transaction {
            status: TransactionStatus::Failed,
            completed_at: Some(at),
            failure_reason: Some(reason.into()),
            receipt_ref: None,
            balance_after: None,
            ..self.clone()
        })
    }
}
