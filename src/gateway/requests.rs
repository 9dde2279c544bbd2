//! Gateway request builders
//!
//! Pure functions of (credentials, amount, phone, timestamp) producing the
//! outbound collection (STK push) and disbursement (B2C) payloads.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Serialize, Serializer};
use uuid::Uuid;

use crate::domain::Amount;

/// Transaction type for a paybill collection
pub const STK_TRANSACTION_TYPE: &str = "CustomerPayBillOnline";

/// Longest account reference the collection endpoint accepts
pub const ACCOUNT_REFERENCE_MAX_LEN: usize = 12;

const REFERENCE_ID_LEN: usize = 8;

// =========================================================================
// Credentials
// =========================================================================

/// Merchant credentials for collection requests
#[derive(Debug, Clone)]
pub struct CollectionCredentials {
    pub shortcode: String,
    pub passkey: String,
    /// URL the collection result is posted to
    pub callback_url: String,
    /// Application label used in descriptions
    pub label: String,
}

/// Initiator credentials for disbursement requests
#[derive(Debug, Clone)]
pub struct DisbursementCredentials {
    pub initiator_name: String,
    pub security_credential: String,
    pub shortcode: String,
    pub command_id: String,
    pub result_url: String,
    pub timeout_url: String,
    pub label: String,
}

// =========================================================================
// Payloads
// =========================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct StkPushRequest {
    pub business_short_code: String,
    pub password: String,
    pub timestamp: String,
    pub transaction_type: String,
    #[serde(serialize_with = "amount_as_number")]
    pub amount: Decimal,
    pub party_a: String,
    pub party_b: String,
    pub phone_number: String,
    #[serde(rename = "CallBackURL")]
    pub callback_url: String,
    pub account_reference: String,
    pub transaction_desc: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct B2cPaymentRequest {
    /// Our own id for the payout, echoed in its result and timeout callbacks
    #[serde(rename = "OriginatorConversationID")]
    pub originator_conversation_id: String,
    pub initiator_name: String,
    pub security_credential: String,
    #[serde(rename = "CommandID")]
    pub command_id: String,
    #[serde(serialize_with = "amount_as_number")]
    pub amount: Decimal,
    pub party_a: String,
    pub party_b: String,
    pub remarks: String,
    #[serde(rename = "QueueTimeOutURL")]
    pub queue_timeout_url: String,
    #[serde(rename = "ResultURL")]
    pub result_url: String,
    pub occasion: String,
}

/// The gateway expects a JSON number, not a decimal string
fn amount_as_number<S: Serializer>(value: &Decimal, serializer: S) -> Result<S::Ok, S::Error> {
    let value = value.normalize();
    if value.scale() == 0 {
        if let Some(whole) = value.to_u64() {
            return serializer.serialize_u64(whole);
        }
    }
    match value.to_f64() {
        Some(f) => serializer.serialize_f64(f),
        None => Err(serde::ser::Error::custom(format!("amount {} out of range", value))),
    }
}

// =========================================================================
// Builders
// =========================================================================

/// `YYYYMMDDHHMMSS`, to the second
pub fn gateway_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d%H%M%S").to_string()
}

/// Base64 of shortcode + passkey + timestamp
pub fn stk_password(shortcode: &str, passkey: &str, timestamp: &str) -> String {
    STANDARD.encode(format!("{}{}{}", shortcode, passkey, timestamp))
}

/// Unique per-transaction reference: a prefix cut to fit, then the first
/// eight hex digits of the transaction id.
///
/// ```
/// use safepull_ledger::gateway::account_reference;
/// use uuid::Uuid;
///
/// let id = Uuid::parse_str("3f2a9c10-0000-4000-8000-000000000000").unwrap();
/// assert_eq!(account_reference("SafePull", id), "Safe3f2a9c10");
/// ```
pub fn account_reference(prefix: &str, transaction_id: Uuid) -> String {
    let keep = ACCOUNT_REFERENCE_MAX_LEN - REFERENCE_ID_LEN;
    let head: String = prefix.chars().filter(|c| c.is_ascii_alphanumeric()).take(keep).collect();
    let tail: String = transaction_id.simple().to_string().chars().take(REFERENCE_ID_LEN).collect();
    format!("{}{}", head, tail)
}

pub fn build_collection_request(
    credentials: &CollectionCredentials,
    amount: &Amount,
    phone: &str,
    account_reference: &str,
    at: DateTime<Utc>,
) -> StkPushRequest {
    let timestamp = gateway_timestamp(at);
    StkPushRequest {
        business_short_code: credentials.shortcode.clone(),
        password: stk_password(&credentials.shortcode, &credentials.passkey, &timestamp),
        timestamp,
        transaction_type: STK_TRANSACTION_TYPE.to_string(),
        amount: amount.value(),
        party_a: phone.to_string(),
        party_b: credentials.shortcode.clone(),
        phone_number: phone.to_string(),
        callback_url: credentials.callback_url.clone(),
        account_reference: account_reference.to_string(),
        transaction_desc: format!("{} Payment", credentials.label),
    }
}

/// `originator_conversation_id` is minted by us before the call, so a
/// callback can be matched even when the gateway's acknowledgement is lost.
pub fn build_disbursement_request(
    credentials: &DisbursementCredentials,
    amount: &Amount,
    phone: &str,
    originator_conversation_id: &str,
) -> B2cPaymentRequest {
    B2cPaymentRequest {
        originator_conversation_id: originator_conversation_id.to_string(),
        initiator_name: credentials.initiator_name.clone(),
        security_credential: credentials.security_credential.clone(),
        command_id: credentials.command_id.clone(),
        amount: amount.value(),
        party_a: credentials.shortcode.clone(),
        party_b: phone.to_string(),
        remarks: format!("{} Withdrawal", credentials.label),
        queue_timeout_url: credentials.timeout_url.clone(),
        result_url: credentials.result_url.clone(),
        occasion: credentials.label.clone(),
    }
}
