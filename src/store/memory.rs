//! In-memory store
//!
//! Holds all records behind one `RwLock`, which makes every operation
//! atomic. Honours the same conditional-write contract as Postgres and can
//! inject conflicts and outages for tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::{Transaction, TransactionKind, TransactionStatus, UserAccount};
use crate::inbox::{InboxEntry, InboxStatus, NewInboxEntry};

use super::{LedgerStore, Settlement, StoreError};

#[derive(Debug, Default)]
struct State {
    accounts: HashMap<Uuid, UserAccount>,
    transactions: HashMap<Uuid, Transaction>,
    /// (kind, gateway_request_id) -> transaction id
    correlation: HashMap<(TransactionKind, String), Uuid>,
    inbox: HashMap<Uuid, InboxEntry>,
}

/// Thread-safe in-memory `LedgerStore`
#[derive(Debug, Default, Clone)]
pub struct InMemoryLedgerStore {
    state: Arc<RwLock<State>>,
    injected_conflicts: Arc<AtomicUsize>,
    injected_outages: Arc<AtomicUsize>,
    injected_inbox_outages: Arc<AtomicUsize>,
    injected_attach_outages: Arc<AtomicUsize>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` settlement commits fail with a write conflict
    pub fn inject_conflicts(&self, n: usize) {
        self.injected_conflicts.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` settlement commits fail as if the store went away
    /// before commit
    pub fn inject_outages(&self, n: usize) {
        self.injected_outages.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` inbox writes fail as if the store went away
    pub fn inject_inbox_outages(&self, n: usize) {
        self.injected_inbox_outages.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` correlation-key writes fail as if the store went away
    pub fn inject_attach_outages(&self, n: usize) {
        self.injected_attach_outages.store(n, Ordering::SeqCst);
    }

    /// Overwrite an account wholesale (test seeding)
    pub async fn put_account(&self, account: UserAccount) {
        let mut state = self.state.write().await;
        state.accounts.insert(account.id, account);
    }

    /// Number of stored transactions
    pub async fn transaction_count(&self) -> usize {
        self.state.read().await.transactions.len()
    }

    /// Age an inbox entry so replay picks it up (test helper)
    pub async fn backdate_callback(&self, id: Uuid, to: DateTime<Utc>) {
        let mut state = self.state.write().await;
        if let Some(entry) = state.inbox.get_mut(&id) {
            entry.updated_at = to;
        }
    }

    /// Age a transaction so the stale-pending reaper sees it (test helper)
    pub async fn backdate_transaction(&self, id: Uuid, to: DateTime<Utc>) {
        let mut state = self.state.write().await;
        if let Some(tx) = state.transactions.get_mut(&id) {
            tx.created_at = to;
        }
    }

    fn take_injected(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn create_account(&self, user_id: Uuid) -> Result<UserAccount, StoreError> {
        let mut state = self.state.write().await;
        if state.accounts.contains_key(&user_id) {
            return Err(StoreError::AccountExists(user_id));
        }
        let account = UserAccount::new(user_id);
        state.accounts.insert(user_id, account.clone());
        Ok(account)
    }

    async fn get_account(&self, user_id: Uuid) -> Result<Option<UserAccount>, StoreError> {
        Ok(self.state.read().await.accounts.get(&user_id).cloned())
    }

    async fn open_transaction(&self, transaction: Transaction) -> Result<Transaction, StoreError> {
        let mut state = self.state.write().await;

        let account = state
            .accounts
            .get(&transaction.user_id)
            .ok_or(StoreError::AccountNotFound(transaction.user_id))?;

        let correlation = transaction
            .gateway_request_id
            .as_ref()
            .map(|key| (transaction.kind, key.clone()));
        if let Some(key) = &correlation {
            if state.correlation.contains_key(key) {
                return Err(StoreError::DuplicateCorrelation(key.1.clone()));
            }
        }

        if transaction.kind == TransactionKind::Withdrawal {
            let debited = account.debit_withdrawal(&transaction.amount)?;
            state.accounts.insert(debited.id, debited);
        }

        if let Some(key) = correlation {
            state.correlation.insert(key, transaction.id);
        }
        state.transactions.insert(transaction.id, transaction.clone());
        Ok(transaction)
    }

    async fn attach_correlation(
        &self,
        transaction_id: Uuid,
        gateway_request_id: &str,
    ) -> Result<Transaction, StoreError> {
        if Self::take_injected(&self.injected_attach_outages) {
            return Err(StoreError::Unavailable("injected outage".to_string()));
        }

        let mut state = self.state.write().await;

        let tx = state
            .transactions
            .get(&transaction_id)
            .cloned()
            .ok_or(StoreError::TransactionNotFound(transaction_id))?;

        let key = (tx.kind, gateway_request_id.to_string());
        if let Some(owner) = state.correlation.get(&key) {
            if *owner != transaction_id {
                return Err(StoreError::DuplicateCorrelation(gateway_request_id.to_string()));
            }
        }
        if tx.gateway_request_id.is_some() || !tx.is_pending() {
            return Err(StoreError::conflict("transaction", transaction_id));
        }

        let updated = Transaction {
            gateway_request_id: Some(gateway_request_id.to_string()),
            ..tx
        };
        state.correlation.insert(key, transaction_id);
        state.transactions.insert(transaction_id, updated.clone());
        Ok(updated)
    }

    async fn flag_for_review(
        &self,
        transaction_id: Uuid,
        reason: &str,
    ) -> Result<Transaction, StoreError> {
        let mut state = self.state.write().await;
        let tx = state
            .transactions
            .get_mut(&transaction_id)
            .ok_or(StoreError::TransactionNotFound(transaction_id))?;
        if !tx.is_pending() {
            return Err(StoreError::conflict("transaction", transaction_id));
        }
        tx.review_reason = Some(reason.to_string());
        Ok(tx.clone())
    }

    async fn get_transaction(&self, id: Uuid) -> Result<Option<Transaction>, StoreError> {
        Ok(self.state.read().await.transactions.get(&id).cloned())
    }

    async fn list_transactions(&self, user_id: Uuid, limit: i64) -> Result<Vec<Transaction>, StoreError> {
        let state = self.state.read().await;
        let mut txs: Vec<Transaction> = state
            .transactions
            .values()
            .filter(|tx| tx.user_id == user_id)
            .cloned()
            .collect();
        txs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        txs.truncate(limit.max(0) as usize);
        Ok(txs)
    }

    async fn find_by_correlation(
        &self,
        kind: TransactionKind,
        gateway_request_id: &str,
    ) -> Result<Option<Transaction>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .correlation
            .get(&(kind, gateway_request_id.to_string()))
            .and_then(|id| state.transactions.get(id))
            .cloned())
    }

    async fn commit_settlement(&self, settlement: &Settlement) -> Result<(), StoreError> {
        if Self::take_injected(&self.injected_outages) {
            return Err(StoreError::Unavailable("injected outage".to_string()));
        }

        let mut state = self.state.write().await;

        let target = &settlement.transaction;
        let current = state
            .transactions
            .get(&target.id)
            .ok_or(StoreError::TransactionNotFound(target.id))?;
        if current.status != TransactionStatus::Pending {
            return Err(StoreError::conflict("transaction", target.id));
        }

        if let Some(write) = &settlement.account {
            let account = state
                .accounts
                .get(&write.account.id)
                .ok_or(StoreError::AccountNotFound(write.account.id))?;
            if account.version != write.expected_version {
                return Err(StoreError::conflict("account", write.account.id));
            }
        }

        // A key is only ever added, never replaced
        let mut target = target.clone();
        let new_key = match (&current.gateway_request_id, &target.gateway_request_id) {
            (Some(existing), _) => {
                target.gateway_request_id = Some(existing.clone());
                None
            }
            (None, Some(key)) => Some((target.kind, key.clone())),
            (None, None) => None,
        };
        if let Some(key) = &new_key {
            if state.correlation.contains_key(key) {
                return Err(StoreError::DuplicateCorrelation(key.1.clone()));
            }
        }

        if Self::take_injected(&self.injected_conflicts) {
            return Err(StoreError::conflict("transaction", target.id));
        }

        // All checks passed: both writes land together
        if let Some(write) = &settlement.account {
            state.accounts.insert(write.account.id, write.account.clone());
        }
        if let Some(key) = new_key {
            state.correlation.insert(key, target.id);
        }
        state.transactions.insert(target.id, target);
        Ok(())
    }

    async fn list_stale_pending(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Transaction>, StoreError> {
        let state = self.state.read().await;
        let mut stale: Vec<Transaction> = state
            .transactions
            .values()
            .filter(|tx| {
                tx.is_pending()
                    && tx.gateway_request_id.is_none()
                    && !tx.needs_review()
                    && tx.created_at < older_than
            })
            .cloned()
            .collect();
        stale.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        stale.truncate(limit.max(0) as usize);
        Ok(stale)
    }

    async fn record_callback(&self, entry: NewInboxEntry) -> Result<(InboxEntry, bool), StoreError> {
        if Self::take_injected(&self.injected_inbox_outages) {
            return Err(StoreError::Unavailable("injected outage".to_string()));
        }

        let mut state = self.state.write().await;

        if let Some(existing) = state
            .inbox
            .values()
            .find(|e| e.kind == entry.kind && e.payload_hash == entry.payload_hash)
        {
            return Ok((existing.clone(), false));
        }

        let stored = InboxEntry::from_new(entry);
        state.inbox.insert(stored.id, stored.clone());
        Ok((stored, true))
    }

    async fn update_callback(
        &self,
        id: Uuid,
        status: InboxStatus,
        last_error: Option<String>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let entry = state
            .inbox
            .get_mut(&id)
            .ok_or_else(|| StoreError::Corrupt(format!("inbox entry {} missing", id)))?;
        entry.status = status;
        entry.last_error = last_error;
        entry.attempts += 1;
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn get_callback(&self, id: Uuid) -> Result<Option<InboxEntry>, StoreError> {
        Ok(self.state.read().await.inbox.get(&id).cloned())
    }

    async fn list_replayable(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<InboxEntry>, StoreError> {
        let state = self.state.read().await;
        let mut entries: Vec<InboxEntry> = state
            .inbox
            .values()
            .filter(|e| e.status.is_replayable() && e.updated_at < older_than)
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.received_at.cmp(&b.received_at));
        entries.truncate(limit.max(0) as usize);
        Ok(entries)
    }
}
