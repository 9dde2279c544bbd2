//! Callback inbox
//!
//! Every gateway callback is written here before it is acknowledged, so a
//! crash or store outage during reconciliation never loses a financial
//! event. Entries are deduplicated on (kind, SHA-256 of the body).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

use crate::callbacks::CallbackKind;

/// Processing state of an inbox entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InboxStatus {
    /// Persisted, not processed yet
    Received,
    /// Reconciled, or a no-op against an already terminal transaction
    Processed,
    /// No transaction carries the correlation key (yet)
    Unmatched,
    /// Reconciliation raised an error; eligible for replay
    Failed,
    /// Body could not be understood; never replayed
    Rejected,
    /// Gave up after too many attempts
    Dead,
}

impl InboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InboxStatus::Received => "received",
            InboxStatus::Processed => "processed",
            InboxStatus::Unmatched => "unmatched",
            InboxStatus::Failed => "failed",
            InboxStatus::Rejected => "rejected",
            InboxStatus::Dead => "dead",
        }
    }

    /// Whether the replay job should pick the entry up again
    pub fn is_replayable(&self) -> bool {
        matches!(
            self,
            InboxStatus::Received | InboxStatus::Unmatched | InboxStatus::Failed
        )
    }
}

impl From<String> for InboxStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "processed" => InboxStatus::Processed,
            "unmatched" => InboxStatus::Unmatched,
            "failed" => InboxStatus::Failed,
            "rejected" => InboxStatus::Rejected,
            "dead" => InboxStatus::Dead,
            _ => InboxStatus::Received,
        }
    }
}

impl fmt::Display for InboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A callback about to be persisted
#[derive(Debug, Clone)]
pub struct NewInboxEntry {
    pub kind: CallbackKind,
    pub payload: serde_json::Value,
    pub payload_hash: String,
}

impl NewInboxEntry {
    pub fn new(kind: CallbackKind, payload: serde_json::Value) -> Self {
        let payload_hash = payload_hash(&payload);
        Self {
            kind,
            payload,
            payload_hash,
        }
    }
}

/// A persisted callback
#[derive(Debug, Clone, PartialEq)]
pub struct InboxEntry {
    pub id: Uuid,
    pub kind: CallbackKind,
    pub payload: serde_json::Value,
    pub payload_hash: String,
    pub status: InboxStatus,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub received_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InboxEntry {
    pub fn from_new(entry: NewInboxEntry) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            kind: entry.kind,
            payload: entry.payload,
            payload_hash: entry.payload_hash,
            status: InboxStatus::Received,
            attempts: 0,
            last_error: None,
            received_at: now,
            updated_at: now,
        }
    }
}

/// Hex SHA-256 of the canonical JSON encoding
pub fn payload_hash(payload: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_hash_is_stable_and_content_sensitive() {
        let a = json!({"Result": {"ResultCode": 0, "ConversationID": "AG_1"}});
        let b = json!({"Result": {"ResultCode": 0, "ConversationID": "AG_1"}});
        let c = json!({"Result": {"ResultCode": 1, "ConversationID": "AG_1"}});

        assert_eq!(payload_hash(&a), payload_hash(&b));
        assert_ne!(payload_hash(&a), payload_hash(&c));
        assert_eq!(payload_hash(&a).len(), 64);
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            InboxStatus::Received,
            InboxStatus::Processed,
            InboxStatus::Unmatched,
            InboxStatus::Failed,
            InboxStatus::Rejected,
            InboxStatus::Dead,
        ] {
            assert_eq!(InboxStatus::from(status.as_str().to_string()), status);
        }
    }

    #[test]
    fn test_replayable_statuses() {
        assert!(InboxStatus::Unmatched.is_replayable());
        assert!(InboxStatus::Failed.is_replayable());
        assert!(!InboxStatus::Processed.is_replayable());
        assert!(!InboxStatus::Rejected.is_replayable());
        assert!(!InboxStatus::Dead.is_replayable());
    }
}
