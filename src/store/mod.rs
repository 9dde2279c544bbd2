//! Transaction Store
//!
//! Persistence for accounts, transactions and the callback inbox. The store
//! is the single source of truth: nothing above it caches balances or
//! transaction state.
//!
//! `commit_settlement` is the only way a transaction reaches a terminal
//! state. It is conditional on the transaction still being `pending` and the
//! account still being at the version the caller read; when either check
//! fails nothing is written and `StoreError::Conflict` is returned so the
//! caller can re-read and decide again.

mod error;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{Transaction, TransactionKind, UserAccount};
use crate::inbox::{InboxEntry, InboxStatus, NewInboxEntry};

pub use error::StoreError;
pub use memory::InMemoryLedgerStore;
pub use postgres::PgLedgerStore;

/// Account write carried by a settlement
#[derive(Debug, Clone, PartialEq)]
pub struct AccountWrite {
    /// Version the account had when it was read
    pub expected_version: i64,
    /// Full new account state (its `version` is already bumped)
    pub account: UserAccount,
}

/// One terminal transition plus the balance mutation that goes with it
#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    /// Transaction in its new terminal state
    pub transaction: Transaction,
    /// Account update, absent for a failed deposit
    pub account: Option<AccountWrite>,
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Create an account with zero balance
    async fn create_account(&self, user_id: Uuid) -> Result<UserAccount, StoreError>;

    async fn get_account(&self, user_id: Uuid) -> Result<Option<UserAccount>, StoreError>;

    /// Insert a pending transaction. Withdrawals debit the owner's balance in
    /// the same atomic unit and fail with `InsufficientBalance` when the
    /// balance does not cover the amount.
    async fn open_transaction(&self, transaction: Transaction) -> Result<Transaction, StoreError>;

    /// Record the gateway's correlation key on a pending transaction that
    /// has none yet. A terminal or already keyed transaction gives `Conflict`.
    async fn attach_correlation(
        &self,
        transaction_id: Uuid,
        gateway_request_id: &str,
    ) -> Result<Transaction, StoreError>;

    /// Mark a pending transaction as awaiting manual or status-query
    /// reconciliation. Flagged transactions are never reaped.
    async fn flag_for_review(
        &self,
        transaction_id: Uuid,
        reason: &str,
    ) -> Result<Transaction, StoreError>;

    async fn get_transaction(&self, id: Uuid) -> Result<Option<Transaction>, StoreError>;

    /// Most recent first
    async fn list_transactions(&self, user_id: Uuid, limit: i64) -> Result<Vec<Transaction>, StoreError>;

    /// Exact lookup by correlation key, whatever the status
    async fn find_by_correlation(
        &self,
        kind: TransactionKind,
        gateway_request_id: &str,
    ) -> Result<Option<Transaction>, StoreError>;

    /// Atomically apply a settlement (see module docs). A correlation key on
    /// the settled transaction is recorded if the stored row has none.
    async fn commit_settlement(&self, settlement: &Settlement) -> Result<(), StoreError>;

    /// Pending transactions that never got a correlation key and are not
    /// flagged for review, created before `older_than`
    async fn list_stale_pending(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Transaction>, StoreError>;

    /// Persist a callback body. Returns the stored entry and whether it was
    /// newly inserted (false for a byte-identical redelivery).
    async fn record_callback(&self, entry: NewInboxEntry) -> Result<(InboxEntry, bool), StoreError>;

    /// Set an inbox entry's status and count one processing attempt
    async fn update_callback(
        &self,
        id: Uuid,
        status: InboxStatus,
        last_error: Option<String>,
    ) -> Result<(), StoreError>;

    async fn get_callback(&self, id: Uuid) -> Result<Option<InboxEntry>, StoreError>;

    /// Entries still worth another attempt, last touched before `older_than`
    async fn list_replayable(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<InboxEntry>, StoreError>;
}
