//! Postgres store
//!
//! sqlx-backed `LedgerStore`. Conditional writes rely on row locks taken by
//! `UPDATE ... WHERE status = 'pending'` / `WHERE version = $n`: a second
//! writer blocks, re-evaluates its predicate after the first commits, and
//! sees zero affected rows.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction as DbTransaction};
use uuid::Uuid;

use crate::callbacks::CallbackKind;
use crate::domain::{
    Amount, Balance, DomainError, Transaction, TransactionKind, TransactionStatus, UserAccount,
};
use crate::inbox::{InboxEntry, InboxStatus, NewInboxEntry};

use super::{LedgerStore, Settlement, StoreError};

const TRANSACTION_COLUMNS: &str = r#"
    id, user_id, type, amount, status, phone, account_reference, gateway_request_id,
    created_at, completed_at, balance_after, receipt_ref, failure_reason, review_reason
"#;

const ACCOUNT_COLUMNS: &str =
    "id, balance, total_deposited, total_withdrawn, version, created_at, updated_at";

const INBOX_COLUMNS: &str =
    "id, kind, payload, payload_hash, status, attempts, last_error, received_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct AccountRow {
    id: Uuid,
    balance: Decimal,
    total_deposited: Decimal,
    total_withdrawn: Decimal,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AccountRow> for UserAccount {
    type Error = StoreError;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        let balance = Balance::new(row.balance)
            .map_err(|e| StoreError::Corrupt(format!("account {}: {}", row.id, e)))?;
        Ok(UserAccount {
            id: row.id,
            balance,
            total_deposited: row.total_deposited,
            total_withdrawn: row.total_withdrawn,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    user_id: Uuid,
    #[sqlx(rename = "type")]
    kind: String,
    amount: Decimal,
    status: String,
    phone: String,
    account_reference: String,
    gateway_request_id: Option<String>,
    created_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    balance_after: Option<Decimal>,
    receipt_ref: Option<String>,
    failure_reason: Option<String>,
    review_reason: Option<String>,
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = StoreError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        let id = row.id;
        let corrupt = |msg: String| StoreError::Corrupt(format!("transaction {}: {}", id, msg));
        Ok(Transaction {
            id: row.id,
            user_id: row.user_id,
            kind: row.kind.parse().map_err(corrupt)?,
            amount: Amount::new(row.amount).map_err(|e| corrupt(e.to_string()))?,
            status: row.status.parse().map_err(corrupt)?,
            phone: row.phone,
            account_reference: row.account_reference,
            gateway_request_id: row.gateway_request_id,
            created_at: row.created_at,
            completed_at: row.completed_at,
            balance_after: row.balance_after,
            receipt_ref: row.receipt_ref,
            failure_reason: row.failure_reason,
            review_reason: row.review_reason,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct InboxRow {
    id: Uuid,
    kind: String,
    payload: serde_json::Value,
    payload_hash: String,
    status: String,
    attempts: i32,
    last_error: Option<String>,
    received_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<InboxRow> for InboxEntry {
    type Error = StoreError;

    fn try_from(row: InboxRow) -> Result<Self, Self::Error> {
        let kind: CallbackKind = row
            .kind
            .parse()
            .map_err(|e: String| StoreError::Corrupt(format!("inbox {}: {}", row.id, e)))?;
        Ok(InboxEntry {
            id: row.id,
            kind,
            payload: row.payload,
            payload_hash: row.payload_hash,
            status: InboxStatus::from(row.status),
            attempts: row.attempts,
            last_error: row.last_error,
            received_at: row.received_at,
            updated_at: row.updated_at,
        })
    }
}

/// Postgres-backed store
#[derive(Debug, Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch_account(
        tx: &mut DbTransaction<'_, Postgres>,
        user_id: Uuid,
    ) -> Result<Option<UserAccount>, StoreError> {
        let row: Option<AccountRow> =
            sqlx::query_as(&format!("SELECT {} FROM users WHERE id = $1", ACCOUNT_COLUMNS))
                .bind(user_id)
                .fetch_optional(&mut **tx)
                .await?;
        row.map(UserAccount::try_from).transpose()
    }
}

/// Map a unique-violation on the correlation index to a domain-level error
fn correlation_violation(err: sqlx::Error, key: &str) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = err {
        if db_err.is_unique_violation() {
            return StoreError::DuplicateCorrelation(key.to_string());
        }
    }
    StoreError::from(err)
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn create_account(&self, user_id: Uuid) -> Result<UserAccount, StoreError> {
        let row: Option<AccountRow> = sqlx::query_as(&format!(
            r#"
            INSERT INTO users (id) VALUES ($1)
            ON CONFLICT (id) DO NOTHING
            RETURNING {}
            "#,
            ACCOUNT_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row.try_into(),
            None => Err(StoreError::AccountExists(user_id)),
        }
    }

    async fn get_account(&self, user_id: Uuid) -> Result<Option<UserAccount>, StoreError> {
        let row: Option<AccountRow> =
            sqlx::query_as(&format!("SELECT {} FROM users WHERE id = $1", ACCOUNT_COLUMNS))
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(UserAccount::try_from).transpose()
    }

    async fn open_transaction(&self, transaction: Transaction) -> Result<Transaction, StoreError> {
        let mut tx = self.pool.begin().await?;

        match transaction.kind {
            TransactionKind::Withdrawal => {
                let debited = sqlx::query(
                    r#"
                    UPDATE users
                    SET balance = balance - $2, version = version + 1, updated_at = NOW()
                    WHERE id = $1 AND balance >= $2
                    "#,
                )
                .bind(transaction.user_id)
                .bind(transaction.amount.value())
                .execute(&mut *tx)
                .await?
                .rows_affected();

                if debited == 0 {
                    let account = Self::fetch_account(&mut tx, transaction.user_id)
                        .await?
                        .ok_or(StoreError::AccountNotFound(transaction.user_id))?;
                    return Err(DomainError::insufficient_balance(
                        transaction.amount.value(),
                        account.balance.value(),
                    )
                    .into());
                }
            }
            TransactionKind::Deposit => {
                // Lock the owner row so a concurrent account delete cannot interleave
                let exists: Option<Uuid> =
                    sqlx::query_scalar("SELECT id FROM users WHERE id = $1 FOR SHARE")
                        .bind(transaction.user_id)
                        .fetch_optional(&mut *tx)
                        .await?;
                if exists.is_none() {
                    return Err(StoreError::AccountNotFound(transaction.user_id));
                }
            }
        }

        sqlx::query(
            r#"
            INSERT INTO transactions (
                id, user_id, type, amount, status, phone, account_reference,
                gateway_request_id, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(transaction.id)
        .bind(transaction.user_id)
        .bind(transaction.kind.as_str())
        .bind(transaction.amount.value())
        .bind(transaction.status.as_str())
        .bind(&transaction.phone)
        .bind(&transaction.account_reference)
        .bind(&transaction.gateway_request_id)
        .bind(transaction.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            correlation_violation(e, transaction.gateway_request_id.as_deref().unwrap_or_default())
        })?;

        tx.commit().await?;
        Ok(transaction)
    }

    async fn attach_correlation(
        &self,
        transaction_id: Uuid,
        gateway_request_id: &str,
    ) -> Result<Transaction, StoreError> {
        let row: Option<TransactionRow> = sqlx::query_as(&format!(
            r#"
            UPDATE transactions
            SET gateway_request_id = $2
            WHERE id = $1 AND gateway_request_id IS NULL AND status = 'pending'
            RETURNING {}
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(transaction_id)
        .bind(gateway_request_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| correlation_violation(e, gateway_request_id))?;

        match row {
            Some(row) => row.try_into(),
            None => match self.get_transaction(transaction_id).await? {
                Some(_) => Err(StoreError::conflict("transaction", transaction_id)),
                None => Err(StoreError::TransactionNotFound(transaction_id)),
            },
        }
    }

    async fn flag_for_review(
        &self,
        transaction_id: Uuid,
        reason: &str,
    ) -> Result<Transaction, StoreError> {
        let row: Option<TransactionRow> = sqlx::query_as(&format!(
            r#"
            UPDATE transactions
            SET review_reason = $2
            WHERE id = $1 AND status = 'pending'
            RETURNING {}
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(transaction_id)
        .bind(reason)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row.try_into(),
            None => match self.get_transaction(transaction_id).await? {
                Some(_) => Err(StoreError::conflict("transaction", transaction_id)),
                None => Err(StoreError::TransactionNotFound(transaction_id)),
            },
        }
    }

    async fn get_transaction(&self, id: Uuid) -> Result<Option<Transaction>, StoreError> {
        let row: Option<TransactionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM transactions WHERE id = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Transaction::try_from).transpose()
    }

    async fn list_transactions(&self, user_id: Uuid, limit: i64) -> Result<Vec<Transaction>, StoreError> {
        let rows: Vec<TransactionRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM transactions
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Transaction::try_from).collect()
    }

    async fn find_by_correlation(
        &self,
        kind: TransactionKind,
        gateway_request_id: &str,
    ) -> Result<Option<Transaction>, StoreError> {
        let row: Option<TransactionRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM transactions
            WHERE type = $1 AND gateway_request_id = $2
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(kind.as_str())
        .bind(gateway_request_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Transaction::try_from).transpose()
    }

    async fn commit_settlement(&self, settlement: &Settlement) -> Result<(), StoreError> {
        let target = &settlement.transaction;
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE transactions
            SET status = $2, completed_at = $3, balance_after = $4,
                receipt_ref = $5, failure_reason = $6,
                gateway_request_id = COALESCE(gateway_request_id, $7)
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(target.id)
        .bind(target.status.as_str())
        .bind(target.completed_at)
        .bind(target.balance_after)
        .bind(&target.receipt_ref)
        .bind(&target.failure_reason)
        .bind(&target.gateway_request_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            correlation_violation(e, target.gateway_request_id.as_deref().unwrap_or_default())
        })?
        .rows_affected();

        if updated == 0 {
            // Dropping `tx` rolls back
            return Err(StoreError::conflict("transaction", target.id));
        }

        if let Some(write) = &settlement.account {
            let account = &write.account;
            let updated = sqlx::query(
                r#"
                UPDATE users
                SET balance = $2, total_deposited = $3, total_withdrawn = $4,
                    version = $5, updated_at = $6
                WHERE id = $1 AND version = $7
                "#,
            )
            .bind(account.id)
            .bind(account.balance.value())
            .bind(account.total_deposited)
            .bind(account.total_withdrawn)
            .bind(account.version)
            .bind(account.updated_at)
            .bind(write.expected_version)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            if updated == 0 {
                return Err(StoreError::conflict("account", account.id));
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_stale_pending(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Transaction>, StoreError> {
        let rows: Vec<TransactionRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM transactions
            WHERE status = $1 AND gateway_request_id IS NULL AND review_reason IS NULL
              AND created_at < $2
            ORDER BY created_at ASC
            LIMIT $3
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(TransactionStatus::Pending.as_str())
        .bind(older_than)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Transaction::try_from).collect()
    }

    async fn record_callback(&self, entry: NewInboxEntry) -> Result<(InboxEntry, bool), StoreError> {
        let inserted: Option<InboxRow> = sqlx::query_as(&format!(
            r#"
            INSERT INTO callback_inbox (id, kind, payload, payload_hash, status)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (kind, payload_hash) DO NOTHING
            RETURNING {}
            "#,
            INBOX_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(entry.kind.as_str())
        .bind(&entry.payload)
        .bind(&entry.payload_hash)
        .bind(InboxStatus::Received.as_str())
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            return Ok((row.try_into()?, true));
        }

        let existing: InboxRow = sqlx::query_as(&format!(
            "SELECT {} FROM callback_inbox WHERE kind = $1 AND payload_hash = $2",
            INBOX_COLUMNS
        ))
        .bind(entry.kind.as_str())
        .bind(&entry.payload_hash)
        .fetch_one(&self.pool)
        .await?;
        Ok((existing.try_into()?, false))
    }

    async fn update_callback(
        &self,
        id: Uuid,
        status: InboxStatus,
        last_error: Option<String>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE callback_inbox
            SET status = $2, last_error = $3, attempts = attempts + 1, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(last_error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_callback(&self, id: Uuid) -> Result<Option<InboxEntry>, StoreError> {
        let row: Option<InboxRow> = sqlx::query_as(&format!(
            "SELECT {} FROM callback_inbox WHERE id = $1",
            INBOX_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(InboxEntry::try_from).transpose()
    }

    async fn list_replayable(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<InboxEntry>, StoreError> {
        let rows: Vec<InboxRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM callback_inbox
            WHERE status IN ('received', 'unmatched', 'failed') AND updated_at < $1
            ORDER BY received_at ASC
            LIMIT $2
            "#,
            INBOX_COLUMNS
        ))
        .bind(older_than)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(InboxEntry::try_from).collect()
    }
}
