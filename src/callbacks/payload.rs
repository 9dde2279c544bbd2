//! Callback payloads
//!
//! Wire shapes of the three asynchronous gateway callbacks and their
//! reduction to a single `CallbackEvent`.

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::TransactionKind;

/// Result code the gateway uses for success
pub const RESULT_CODE_SUCCESS: i64 = 0;

/// Failure reason recorded for a disbursement timeout
pub const TIMEOUT_REASON: &str = "Transaction timeout";

/// Which callback endpoint a payload arrived on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackKind {
    CollectionResult,
    DisbursementResult,
    DisbursementTimeout,
}

impl CallbackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallbackKind::CollectionResult => "collection_result",
            CallbackKind::DisbursementResult => "disbursement_result",
            CallbackKind::DisbursementTimeout => "disbursement_timeout",
        }
    }

    /// Kind of transaction this callback settles
    pub fn transaction_kind(&self) -> TransactionKind {
        match self {
            CallbackKind::CollectionResult => TransactionKind::Deposit,
            CallbackKind::DisbursementResult | CallbackKind::DisbursementTimeout => {
                TransactionKind::Withdrawal
            }
        }
    }
}

impl fmt::Display for CallbackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CallbackKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "collection_result" => Ok(CallbackKind::CollectionResult),
            "disbursement_result" => Ok(CallbackKind::DisbursementResult),
            "disbursement_timeout" => Ok(CallbackKind::DisbursementTimeout),
            other => Err(format!("unknown callback kind: {}", other)),
        }
    }
}

/// Gateways have been seen sending result codes both as numbers and strings
fn result_code<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Code {
        Int(i64),
        Text(String),
    }

    match Option::<Code>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Code::Int(code)) => Ok(Some(code)),
        Some(Code::Text(text)) => text
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid result code: {}", text))),
    }
}

// =========================================================================
// Collection result (deposit)
// =========================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionCallback {
    #[serde(rename = "Body")]
    pub body: CollectionBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionBody {
    #[serde(rename = "stkCallback")]
    pub stk_callback: StkCallback,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StkCallback {
    #[serde(rename = "MerchantRequestID", default)]
    pub merchant_request_id: Option<String>,
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "ResultCode", default, deserialize_with = "result_code")]
    pub result_code: Option<i64>,
    #[serde(rename = "ResultDesc", default)]
    pub result_desc: Option<String>,
    #[serde(rename = "CallbackMetadata", default)]
    pub callback_metadata: Option<CallbackMetadata>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackMetadata {
    #[serde(rename = "CallbackMetadataItem", alias = "Item", default)]
    pub items: Vec<MetadataItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataItem {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Value", default)]
    pub value: Option<serde_json::Value>,
}

impl CallbackMetadata {
    fn get(&self, name: &str) -> Option<&serde_json::Value> {
        self.items
            .iter()
            .find(|item| item.name == name)
            .and_then(|item| item.value.as_ref())
    }

    /// Value rendered as text; numbers keep their exact digits
    fn text(&self, name: &str) -> Option<String> {
        match self.get(name)? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn amount(&self) -> Option<Decimal> {
        self.text("Amount").and_then(|s| Decimal::from_str(&s).ok())
    }

    pub fn receipt_number(&self) -> Option<String> {
        self.text("MpesaReceiptNumber")
    }

    pub fn phone_number(&self) -> Option<String> {
        self.text("PhoneNumber")
    }
}

// =========================================================================
// Disbursement result / timeout (withdrawal)
// =========================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisbursementCallback {
    #[serde(rename = "Result")]
    pub result: DisbursementResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisbursementResult {
    #[serde(rename = "ResultCode", default, deserialize_with = "result_code")]
    pub result_code: Option<i64>,
    #[serde(rename = "ResultDesc", default)]
    pub result_desc: Option<String>,
    #[serde(rename = "TransactionID", default)]
    pub transaction_id: Option<String>,
    #[serde(rename = "ConversationID")]
    pub conversation_id: String,
    #[serde(rename = "OriginatorConversationID", default)]
    pub originator_conversation_id: Option<String>,
}

// =========================================================================
// Normalized event
// =========================================================================

/// What the gateway says happened
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayOutcome {
    Success {
        receipt_ref: Option<String>,
        /// Amount the gateway reports having moved, when it says so
        reported_amount: Option<Decimal>,
    },
    Failure {
        reason: String,
    },
}

impl GatewayOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, GatewayOutcome::Success { .. })
    }
}

/// A callback reduced to what reconciliation needs
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackEvent {
    pub kind: CallbackKind,
    pub correlation_key: String,
    /// Reference we minted and sent with a disbursement, echoed back as
    /// `OriginatorConversationID`
    pub originator_key: Option<String>,
    pub outcome: GatewayOutcome,
}

#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("Malformed {kind} payload: {source}")]
    Malformed {
        kind: CallbackKind,
        #[source]
        source: serde_json::Error,
    },

    #[error("Empty correlation key in {0} payload")]
    MissingCorrelationKey(CallbackKind),
}

impl CallbackEvent {
    /// Parse a raw body received on the endpoint for `kind`
    pub fn parse(kind: CallbackKind, body: &serde_json::Value) -> Result<Self, PayloadError> {
        let malformed = |source| PayloadError::Malformed { kind, source };

        let event = match kind {
            CallbackKind::CollectionResult => {
                let payload: CollectionCallback =
                    serde_json::from_value(body.clone()).map_err(malformed)?;
                let cb = payload.body.stk_callback;
                let outcome = if cb.result_code == Some(RESULT_CODE_SUCCESS) {
                    let metadata = cb.callback_metadata.as_ref();
                    GatewayOutcome::Success {
                        receipt_ref: metadata.and_then(|m| m.receipt_number()),
                        reported_amount: metadata.and_then(|m| m.amount()),
                    }
                } else {
                    GatewayOutcome::Failure {
                        reason: failure_reason(cb.result_code, cb.result_desc),
                    }
                };
                CallbackEvent {
                    kind,
                    correlation_key: cb.checkout_request_id,
                    originator_key: None,
                    outcome,
                }
            }
            CallbackKind::DisbursementResult => {
                let payload: DisbursementCallback =
                    serde_json::from_value(body.clone()).map_err(malformed)?;
                let result = payload.result;
                let outcome = if result.result_code == Some(RESULT_CODE_SUCCESS) {
                    GatewayOutcome::Success {
                        receipt_ref: result.transaction_id,
                        reported_amount: None,
                    }
                } else {
                    GatewayOutcome::Failure {
                        reason: failure_reason(result.result_code, result.result_desc),
                    }
                };
                CallbackEvent {
                    kind,
                    correlation_key: result.conversation_id,
                    originator_key: non_blank(result.originator_conversation_id),
                    outcome,
                }
            }
            CallbackKind::DisbursementTimeout => {
                // Result code is ignored: a timeout is always a failure
                let payload: DisbursementCallback =
                    serde_json::from_value(body.clone()).map_err(malformed)?;
                CallbackEvent {
                    kind,
                    correlation_key: payload.result.conversation_id,
                    originator_key: non_blank(payload.result.originator_conversation_id),
                    outcome: GatewayOutcome::Failure {
                        reason: TIMEOUT_REASON.to_string(),
                    },
                }
            }
        };

        if event.correlation_key.trim().is_empty() {
            return Err(PayloadError::MissingCorrelationKey(kind));
        }
        Ok(event)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn failure_reason(code: Option<i64>, desc: Option<String>) -> String {
    match (desc, code) {
        (Some(desc), _) if !desc.trim().is_empty() => desc,
        (_, Some(code)) => format!("Gateway result code {}", code),
        _ => "Gateway reported failure".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn stk_success() -> serde_json::Value {
        json!({
            "Body": {
                "stkCallback": {
                    "MerchantRequestID": "29115-34620561-1",
                    "CheckoutRequestID": "ws_CO_191220191020363925",
                    "ResultCode": 0,
                    "ResultDesc": "The service request is processed successfully.",
                    "CallbackMetadata": {
                        "CallbackMetadataItem": [
                            {"Name": "Amount", "Value": 500.00},
                            {"Name": "MpesaReceiptNumber", "Value": "NLJ7RT61SV"},
                            {"Name": "Balance"},
                            {"Name": "TransactionDate", "Value": 20191219102115u64},
                            {"Name": "PhoneNumber", "Value": 254708374149u64}
                        ]
                    }
                }
            }
        })
    }

    #[test]
    fn test_collection_success() {
        let event = CallbackEvent::parse(CallbackKind::CollectionResult, &stk_success()).unwrap();

        assert_eq!(event.correlation_key, "ws_CO_191220191020363925");
        assert_eq!(
            event.outcome,
            GatewayOutcome::Success {
                receipt_ref: Some("NLJ7RT61SV".to_string()),
                reported_amount: Some(dec!(500)),
            }
        );
    }

    #[test]
    fn test_collection_metadata_phone_is_exact() {
        let payload: CollectionCallback = serde_json::from_value(stk_success()).unwrap();
        let metadata = payload.body.stk_callback.callback_metadata.unwrap();
        assert_eq!(metadata.phone_number().as_deref(), Some("254708374149"));
    }

    #[test]
    fn test_collection_failure() {
        let body = json!({
            "Body": {
                "stkCallback": {
                    "MerchantRequestID": "1",
                    "CheckoutRequestID": "ws_CO_1",
                    "ResultCode": 1032,
                    "ResultDesc": "Request cancelled by user"
                }
            }
        });
        let event = CallbackEvent::parse(CallbackKind::CollectionResult, &body).unwrap();
        assert_eq!(
            event.outcome,
            GatewayOutcome::Failure {
                reason: "Request cancelled by user".to_string()
            }
        );
    }

    #[test]
    fn test_success_without_metadata_is_still_success() {
        let body = json!({
            "Body": {"stkCallback": {"CheckoutRequestID": "ws_CO_2", "ResultCode": 0}}
        });
        let event = CallbackEvent::parse(CallbackKind::CollectionResult, &body).unwrap();
        assert_eq!(
            event.outcome,
            GatewayOutcome::Success {
                receipt_ref: None,
                reported_amount: None
            }
        );
    }

    #[test]
    fn test_string_result_code_accepted() {
        let body = json!({
            "Result": {"ResultCode": "0", "ConversationID": "AG_1", "TransactionID": "LGR0000000"}
        });
        let event = CallbackEvent::parse(CallbackKind::DisbursementResult, &body).unwrap();
        assert!(event.outcome.is_success());
    }

    #[test]
    fn test_nonzero_code_is_failure_not_truthiness() {
        let body = json!({
            "Result": {"ResultCode": 2001, "ResultDesc": "", "ConversationID": "AG_1"}
        });
        let event = CallbackEvent::parse(CallbackKind::DisbursementResult, &body).unwrap();
        assert_eq!(
            event.outcome,
            GatewayOutcome::Failure {
                reason: "Gateway result code 2001".to_string()
            }
        );
    }

    #[test]
    fn test_timeout_is_failure_even_with_zero_code() {
        let body = json!({"Result": {"ResultCode": 0, "ConversationID": "AG_9"}});
        let event = CallbackEvent::parse(CallbackKind::DisbursementTimeout, &body).unwrap();
        assert_eq!(event.correlation_key, "AG_9");
        assert_eq!(
            event.outcome,
            GatewayOutcome::Failure {
                reason: TIMEOUT_REASON.to_string()
            }
        );
    }

    #[test]
    fn test_disbursement_carries_originator_key() {
        let body = json!({
            "Result": {
                "ResultCode": 0,
                "ConversationID": "AG_5",
                "OriginatorConversationID": "Safe3f2a9c10"
            }
        });
        let event = CallbackEvent::parse(CallbackKind::DisbursementResult, &body).unwrap();
        assert_eq!(event.originator_key.as_deref(), Some("Safe3f2a9c10"));

        let body = json!({"Result": {"ConversationID": "AG_5", "OriginatorConversationID": ""}});
        let event = CallbackEvent::parse(CallbackKind::DisbursementTimeout, &body).unwrap();
        assert!(event.originator_key.is_none());
    }

    #[test]
    fn test_missing_result_code_is_failure() {
        let body = json!({"Result": {"ConversationID": "AG_3"}});
        let event = CallbackEvent::parse(CallbackKind::DisbursementResult, &body).unwrap();
        assert!(!event.outcome.is_success());
    }

    #[test]
    fn test_malformed_payload() {
        let err = CallbackEvent::parse(CallbackKind::CollectionResult, &json!({"foo": 1})).unwrap_err();
        assert!(matches!(err, PayloadError::Malformed { .. }));

        let err = CallbackEvent::parse(
            CallbackKind::DisbursementResult,
            &json!({"Result": {"ResultCode": 0, "ConversationID": "  "}}),
        )
        .unwrap_err();
        assert!(matches!(err, PayloadError::MissingCorrelationKey(_)));
    }

    #[test]
    fn test_kind_maps_to_transaction_kind() {
        assert_eq!(
            CallbackKind::CollectionResult.transaction_kind(),
            TransactionKind::Deposit
        );
        assert_eq!(
            CallbackKind::DisbursementTimeout.transaction_kind(),
            TransactionKind::Withdrawal
        );
        assert_eq!(
            "disbursement_timeout".parse::<CallbackKind>().unwrap(),
            CallbackKind::DisbursementTimeout
        );
    }
}
