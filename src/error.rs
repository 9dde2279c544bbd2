//! Error handling module
//!
//! Centralized error types and HTTP response conversion.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::domain::DomainError;
use crate::gateway::GatewayError;
use crate::reconciliation::ReconcileError;
use crate::store::StoreError;

/// Application-wide Result type
pub type AppResult<T> = Result<T, AppError>;

/// Application error types
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Client errors (4xx)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("User already exists: {0}")]
    UserExists(String),

    // Domain errors
    #[error(transparent)]
    Domain(#[from] DomainError),

    // Upstream errors (502)
    #[error("Payment gateway error: {0}")]
    Gateway(#[from] GatewayError),

    // Upstream outcome unknown (504); the transaction stays pending for review
    #[error("Payment gateway did not confirm transaction {transaction_id}: {source}")]
    GatewayOutcomeUnknown {
        transaction_id: uuid::Uuid,
        #[source]
        source: GatewayError,
    },

    // Server errors (5xx)
    #[error("Store error: {0}")]
    Store(StoreError),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AccountNotFound(id) => AppError::UserNotFound(id.to_string()),
            StoreError::AccountExists(id) => AppError::UserExists(id.to_string()),
            StoreError::TransactionNotFound(id) => AppError::TransactionNotFound(id.to_string()),
            StoreError::Domain(e) => AppError::Domain(e),
            other => AppError::Store(other),
        }
    }
}

impl From<ReconcileError> for AppError {
    fn from(err: ReconcileError) -> Self {
        match err {
            ReconcileError::Store(e) => e.into(),
            ReconcileError::Domain(e) => AppError::Domain(e),
            ReconcileError::TransactionNotFound(id) => {
                AppError::TransactionNotFound(id.to_string())
            }
            other => AppError::Internal(other.to_string()),
        }
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, details) = match &self {
            // 400 Bad Request
            AppError::InvalidRequest(msg) => {
                (StatusCode::BAD_REQUEST, "invalid_request", Some(msg.clone()))
            }

            // 404 Not Found
            AppError::UserNotFound(id) => {
                (StatusCode::NOT_FOUND, "user_not_found", Some(id.clone()))
            }
            AppError::TransactionNotFound(id) => {
                (StatusCode::NOT_FOUND, "transaction_not_found", Some(id.clone()))
            }

            // 409 Conflict
            AppError::UserExists(id) => {
                (StatusCode::CONFLICT, "user_exists", Some(id.clone()))
            }

            // Domain errors - map to appropriate HTTP status
            AppError::Domain(ref domain_err) => match domain_err {
                DomainError::InsufficientBalance { .. } => {
                    (StatusCode::BAD_REQUEST, "insufficient_balance", Some(domain_err.to_string()))
                }
                DomainError::InvalidAmount(msg) => {
                    (StatusCode::BAD_REQUEST, "invalid_amount", Some(msg.clone()))
                }
                DomainError::AlreadyTerminal { .. } => {
                    (StatusCode::CONFLICT, "transaction_terminal", Some(domain_err.to_string()))
                }
                DomainError::OwnerMismatch { .. } => {
                    tracing::error!("Ledger inconsistency: {}", domain_err);
                    (StatusCode::INTERNAL_SERVER_ERROR, "owner_mismatch", None)
                }
            },

            // 502 Bad Gateway
            AppError::Gateway(e) => {
                tracing::warn!("Gateway error: {}", e);
                (StatusCode::BAD_GATEWAY, "gateway_error", Some(e.to_string()))
            }

            // 504 Gateway Timeout
            AppError::GatewayOutcomeUnknown { transaction_id, source } => {
                tracing::warn!(transaction_id = %transaction_id, "Gateway outcome unknown: {}", source);
                (
                    StatusCode::GATEWAY_TIMEOUT,
                    "gateway_outcome_unknown",
                    Some(transaction_id.to_string()),
                )
            }

            // 500 Internal Server Error
            AppError::Store(e) => {
                tracing::error!("Store error: {:?}", e);
                let status = match e {
                    StoreError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, "store_error", None)
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
            AppError::Config(e) => {
                tracing::error!("Config error: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "config_error", None)
            }
        };

        let body = ErrorResponse {
            error: self.to_string(),
            error_code: error_code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn status_of(err: AppError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_taxonomy_mapping() {
        assert_eq!(
            status_of(AppError::InvalidRequest("phone is required".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(StoreError::AccountNotFound(Uuid::new_v4()).into()),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(DomainError::insufficient_balance(dec!(10), dec!(5)).into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(
                GatewayError::Status {
                    status: 500,
                    body: String::new()
                }
                .into()
            ),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_of(StoreError::Corrupt("bad row".into()).into()),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_unknown_gateway_outcome_is_gateway_timeout() {
        let id = Uuid::new_v4();
        let response = AppError::GatewayOutcomeUnknown {
            transaction_id: id,
            source: GatewayError::InvalidResponse("truncated".into()),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn test_store_domain_error_unwraps() {
        let err: AppError = StoreError::Domain(DomainError::insufficient_balance(dec!(10), dec!(5))).into();
        assert!(matches!(err, AppError::Domain(DomainError::InsufficientBalance { .. })));
    }
}
