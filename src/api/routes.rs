//! API Routes
//!
//! Client-facing endpoint definitions.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::{Transaction, UserAccount};
use crate::error::AppError;
use crate::handlers::{
    DepositCommand, DepositHandler, InitiationResult, WithdrawCommand, WithdrawalHandler,
};

use super::AppState;

const DEFAULT_HISTORY_LIMIT: i64 = 50;
const MAX_HISTORY_LIMIT: i64 = 500;

// =========================================================================
// Request/Response types
// =========================================================================

/// Body of `/initiateMpesa` and `/withdrawMpesa`. Amount may be sent as a
/// JSON number or a string.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateRequest {
    pub user_id: Uuid,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub amount: Option<Value>,
}

impl InitiateRequest {
    fn into_parts(self) -> Result<(Uuid, String, String), AppError> {
        let phone = self
            .phone
            .ok_or_else(|| AppError::InvalidRequest("phone is required".to_string()))?;
        let amount = match self.amount {
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::String(s)) => s,
            Some(Value::Null) | None => {
                return Err(AppError::InvalidRequest("amount is required".to_string()))
            }
            Some(other) => {
                return Err(AppError::InvalidRequest(format!("Invalid amount: {}", other)))
            }
        };
        Ok((self.user_id, phone, amount))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    #[serde(default)]
    pub user_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountResponse {
    pub user_id: Uuid,
    pub balance: Decimal,
    pub total_deposited: Decimal,
    pub total_withdrawn: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<UserAccount> for AccountResponse {
    fn from(account: UserAccount) -> Self {
        Self {
            user_id: account.id,
            balance: account.balance.value(),
            total_deposited: account.total_deposited,
            total_withdrawn: account.total_withdrawn,
            created_at: account.created_at,
            updated_at: account.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    DEFAULT_HISTORY_LIMIT
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    pub user_id: Uuid,
    pub transactions: Vec<Transaction>,
}

// =========================================================================
// API Router
// =========================================================================

/// Create the client API router
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/initiateMpesa", post(initiate_deposit))
        .route("/withdrawMpesa", post(initiate_withdrawal))
        .route("/users", post(create_user))
        .route("/users/:user_id", get(get_user))
        .route("/users/:user_id/transactions", get(get_user_transactions))
        .route("/transactions/:transaction_id", get(get_transaction))
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

fn parse_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    body.map(|Json(inner)| inner)
        .map_err(|rejection| AppError::InvalidRequest(rejection.body_text()))
}

// =========================================================================
// POST /initiateMpesa
// =========================================================================

async fn initiate_deposit(
    State(state): State<AppState>,
    body: Result<Json<InitiateRequest>, JsonRejection>,
) -> Result<Json<InitiationResult>, AppError> {
    let (user_id, phone, amount) = parse_body(body)?.into_parts()?;

    let handler = DepositHandler::new(
        state.store.clone(),
        state.gateway.clone(),
        state.engine.clone(),
        state.settings.clone(),
    );
    let result = handler
        .execute(DepositCommand::new(user_id, phone, amount))
        .await?;

    Ok(Json(result))
}

// =========================================================================
// POST /withdrawMpesa
// =========================================================================

async fn initiate_withdrawal(
    State(state): State<AppState>,
    body: Result<Json<InitiateRequest>, JsonRejection>,
) -> Result<Json<InitiationResult>, AppError> {
    let (user_id, phone, amount) = parse_body(body)?.into_parts()?;

    let handler = WithdrawalHandler::new(
        state.store.clone(),
        state.gateway.clone(),
        state.engine.clone(),
        state.settings.clone(),
    );
    let result = handler
        .execute(WithdrawCommand::new(user_id, phone, amount))
        .await?;

    Ok(Json(result))
}

// =========================================================================
// Accounts
// =========================================================================

/// Create an account with zero balance; the id is generated unless given
async fn create_user(
    State(state): State<AppState>,
    body: Option<Json<CreateUserRequest>>,
) -> Result<(StatusCode, Json<AccountResponse>), AppError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let user_id = request.user_id.unwrap_or_else(Uuid::new_v4);

    let account = state.store.create_account(user_id).await?;
    tracing::info!(user_id = %account.id, "Account created");

    Ok((StatusCode::CREATED, Json(account.into())))
}

async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<AccountResponse>, AppError> {
    let account = state
        .store
        .get_account(user_id)
        .await?
        .ok_or_else(|| AppError::UserNotFound(user_id.to_string()))?;
    Ok(Json(account.into()))
}

/// Transaction history, most recent first
async fn get_user_transactions(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, AppError> {
    if state.store.get_account(user_id).await?.is_none() {
        return Err(AppError::UserNotFound(user_id.to_string()));
    }

    let limit = query.limit.clamp(1, MAX_HISTORY_LIMIT);
    let transactions = state.store.list_transactions(user_id, limit).await?;

    Ok(Json(HistoryResponse {
        user_id,
        transactions,
    }))
}

async fn get_transaction(
    State(state): State<AppState>,
    Path(transaction_id): Path<Uuid>,
) -> Result<Json<Transaction>, AppError> {
    let transaction = state
        .store
        .get_transaction(transaction_id)
        .await?
        .ok_or_else(|| AppError::TransactionNotFound(transaction_id.to_string()))?;
    Ok(Json(transaction))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(body: Value) -> InitiateRequest {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn test_amount_accepts_number_or_string() {
        let user = Uuid::new_v4();
        let (_, _, amount) = request(json!({"userId": user, "phone": "0712", "amount": 500}))
            .into_parts()
            .unwrap();
        assert_eq!(amount, "500");

        let (_, _, amount) = request(json!({"userId": user, "phone": "0712", "amount": "12.50"}))
            .into_parts()
            .unwrap();
        assert_eq!(amount, "12.50");
    }

    #[test]
    fn test_missing_fields_rejected() {
        let user = Uuid::new_v4();
        assert!(request(json!({"userId": user, "amount": 5})).into_parts().is_err());
        assert!(request(json!({"userId": user, "phone": "0712"})).into_parts().is_err());
        assert!(request(json!({"userId": user, "phone": "0712", "amount": true}))
            .into_parts()
            .is_err());
    }
}
