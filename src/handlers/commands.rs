//! Command definitions
//!
//! Commands represent client intentions to move money through the gateway.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{normalize_phone, Amount, Transaction};
use crate::error::AppError;

// =========================================================================
// DepositCommand
// =========================================================================

/// Command to collect money from a subscriber into the user's balance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositCommand {
    pub user_id: Uuid,
    /// Phone number as entered by the user
    pub phone: String,
    /// Amount (as string for precise decimal)
    pub amount: String,
}

impl DepositCommand {
    pub fn new(user_id: Uuid, phone: impl Into<String>, amount: impl Into<String>) -> Self {
        Self {
            user_id,
            phone: phone.into(),
            amount: amount.into(),
        }
    }
}

// =========================================================================
// WithdrawCommand
// =========================================================================

/// Command to pay out part of the user's balance to a subscriber
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawCommand {
    pub user_id: Uuid,
    pub phone: String,
    pub amount: String,
}

impl WithdrawCommand {
    pub fn new(user_id: Uuid, phone: impl Into<String>, amount: impl Into<String>) -> Self {
        Self {
            user_id,
            phone: phone.into(),
            amount: amount.into(),
        }
    }
}

// =========================================================================
// InitiationResult
// =========================================================================

/// Result of a successful initiation: the pending transaction, now carrying
/// its correlation key, and the gateway's message for the customer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiationResult {
    pub transaction: Transaction,
    pub message: String,
}

/// Normalize the phone and parse the amount, rejecting blanks. The gateway
/// moves whole currency units only, so fractional amounts are refused here.
pub(crate) fn validate_initiation(
    phone: &str,
    amount: &str,
    country_code: &str,
) -> Result<(String, Amount), AppError> {
    if phone.trim().is_empty() {
        return Err(AppError::InvalidRequest("phone is required".to_string()));
    }
    if amount.trim().is_empty() {
        return Err(AppError::InvalidRequest("amount is required".to_string()));
    }

    let phone = normalize_phone(phone.trim(), country_code);
    if phone.is_empty() {
        return Err(AppError::InvalidRequest(
            "phone must contain digits".to_string(),
        ));
    }

    let amount: Amount = amount
        .parse()
        .map_err(|e| AppError::InvalidRequest(format!("Invalid amount: {}", e)))?;
    if !amount.value().fract().is_zero() {
        return Err(AppError::InvalidRequest(format!(
            "Invalid amount: {} is not a whole number",
            amount
        )));
    }

    Ok((phone, amount))
}
