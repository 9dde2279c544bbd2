//! Gateway callback endpoints
//!
//! The body is persisted to the inbox before anything else happens. The
//! gateway gets `200` once that write succeeds, whatever the business
//! outcome, and `500` when it fails so that it delivers again.

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};

use crate::callbacks::CallbackKind;

use super::AppState;

pub fn create_callback_router() -> Router<AppState> {
    Router::new()
        .route("/mpesaCallback", post(collection_result))
        .route("/b2cResult", post(disbursement_result))
        .route("/timeout", post(disbursement_timeout))
}

async fn collection_result(State(state): State<AppState>, body: Bytes) -> Response {
    receive(&state, CallbackKind::CollectionResult, &body).await
}

async fn disbursement_result(State(state): State<AppState>, body: Bytes) -> Response {
    receive(&state, CallbackKind::DisbursementResult, &body).await
}

async fn disbursement_timeout(State(state): State<AppState>, body: Bytes) -> Response {
    receive(&state, CallbackKind::DisbursementTimeout, &body).await
}

/// Bodies that are not JSON are kept verbatim so they can be inspected
fn decode_body(body: &[u8]) -> Value {
    serde_json::from_slice(body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
}

async fn receive(state: &AppState, kind: CallbackKind, body: &[u8]) -> Response {
    match state.dispatcher.accept(kind, decode_body(body)).await {
        Ok(report) => {
            tracing::debug!(
                callback_kind = %kind,
                entry_id = %report.entry_id,
                status = %report.status,
                duplicate = report.duplicate,
                "Callback acknowledged"
            );
            (
                StatusCode::OK,
                Json(json!({ "ResultCode": 0, "ResultDesc": "Accepted" })),
            )
                .into_response()
        }
        Err(e) => {
            tracing::error!(
                callback_kind = %kind,
                error = %e,
                "Could not persist callback, asking gateway to redeliver"
            );
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "ResultCode": 1, "ResultDesc": "Temporarily unavailable" })),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_body_keeps_garbage() {
        assert_eq!(decode_body(br#"{"a":1}"#), json!({"a": 1}));
        assert_eq!(decode_body(b"not json"), Value::String("not json".into()));
    }
}
