//! Withdrawal Handler
//!
//! Debits the balance while opening the pending withdrawal, then asks the
//! gateway to pay out. A refused payout request refunds immediately; a later
//! failure or timeout callback refunds through reconciliation. When the
//! gateway's answer is lost the debit stands until the callback arrives.

use std::sync::Arc;

use crate::domain::{Transaction, TransactionKind};
use crate::error::AppError;
use crate::gateway::{account_reference, build_disbursement_request, PaymentGateway};
use crate::reconciliation::ReconciliationEngine;
use crate::store::LedgerStore;

use super::commands::validate_initiation;
use super::initiation::{record_correlation, settle_gateway_error};
use super::{InitiationResult, InitiationSettings, WithdrawCommand};

/// Handler for withdrawal initiation
pub struct WithdrawalHandler {
    store: Arc<dyn LedgerStore>,
    gateway: Arc<dyn PaymentGateway>,
    engine: ReconciliationEngine,
    settings: Arc<InitiationSettings>,
}

impl WithdrawalHandler {
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

    /// Execute the withdrawal command
    pub async fn execute(&self, command: WithdrawCommand) -> Result<InitiationResult, AppError> {
        let (phone, amount) =
            validate_initiation(&command.phone, &command.amount, &self.settings.country_code)?;

        let pending = Transaction::pending(
            command.user_id,
            TransactionKind::Withdrawal,
            amount,
            phone,
            String::new(),
        );
        let reference = account_reference(&self.settings.account_reference_prefix, pending.id);

        // Debit happens here, atomically with the insert
        let pending = self
            .store
            .open_transaction(pending.with_account_reference(reference))
            .await?;

        let request = build_disbursement_request(
            &self.settings.disbursement,
            &pending.amount,
            &pending.phone,
            &pending.id.to_string(),
        );

        let ack = match self.gateway.request_disbursement(&request).await {
            Ok(ack) => ack,
            Err(e) => {
                return Err(
                    settle_gateway_error(self.store.as_ref(), &self.engine, &pending, e).await,
                );
            }
        };

        let transaction =
            record_correlation(self.store.as_ref(), &self.engine, &pending, &ack.conversation_id).await?;

        tracing::info!(
            transaction_id = %transaction.id,
            user_id = %transaction.user_id,
            amount = %transaction.amount,
            conversation_id = %ack.conversation_id,
            "Withdrawal initiated"
        );

        Ok(InitiationResult {
            transaction,
            message: ack.response_description,
        })
    }
}
