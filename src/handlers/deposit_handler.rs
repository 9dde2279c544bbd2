//! Deposit Handler
//!
//! Opens a pending deposit and asks the gateway to collect it from the
//! subscriber. The balance is only credited later, by the collection
//! result callback.

use chrono::Utc;
use std::sync::Arc;

use crate::domain::{Transaction, TransactionKind};
use crate::error::AppError;
use crate::gateway::{account_reference, build_collection_request, PaymentGateway};
use crate::reconciliation::ReconciliationEngine;
use crate::store::LedgerStore;

use super::commands::validate_initiation;
use super::initiation::{record_correlation, settle_gateway_error};
use super::{DepositCommand, InitiationResult, InitiationSettings};

// =========================================================================
// DepositHandler
// =========================================================================

/// Handler for deposit initiation
pub struct DepositHandler {
    store: Arc<dyn LedgerStore>,
    gateway: Arc<dyn PaymentGateway>,
    engine: ReconciliationEngine,
    settings: Arc<InitiationSettings>,
}

impl DepositHandler {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        gateway: Arc<dyn PaymentGateway>,
        engine: ReconciliationEngine,
        settings: Arc<InitiationSettings>,
    ) -> Self {
        Self {
            store,
            gateway,
            engine,
            settings,
        }
    }

    /// Execute the deposit command
    pub async fn execute(&self, command: DepositCommand) -> Result<InitiationResult, AppError> {
        let (phone, amount) =
            validate_initiation(&command.phone, &command.amount, &self.settings.country_code)?;

        let pending = Transaction::pending(
            command.user_id,
            TransactionKind::Deposit,
            amount,
            phone,
            String::new(),
        );
        let reference = account_reference(&self.settings.account_reference_prefix, pending.id);
        let pending = self
            .store
            .open_transaction(pending.with_account_reference(reference))
            .await?;

        let request = build_collection_request(
            &self.settings.collection,
            &pending.amount,
            &pending.phone,
            &pending.account_reference,
            Utc::now(),
        );

        let ack = match self.gateway.request_collection(&request).await {
            Ok(ack) => ack,
            Err(e) => {
                return Err(
                    settle_gateway_error(self.store.as_ref(), &self.engine, &pending, e).await,
                );
            }
        };

        let transaction =
            record_correlation(self.store.as_ref(), &self.engine, &pending, &ack.checkout_request_id).await?;

        tracing::info!(
            transaction_id = %transaction.id,
            user_id = %transaction.user_id,
            amount = %transaction.amount,
            checkout_request_id = %ack.checkout_request_id,
            "Deposit initiated"
        );

        Ok(InitiationResult {
            transaction,
            message: ack.customer_message,
        })
    }
}
