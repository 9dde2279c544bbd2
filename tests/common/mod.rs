//! Common test utilities
#![allow(dead_code)]

use async_trait::async_trait;
use axum::{body::Body, http::Request, response::Response, Router};
use http_body_util::BodyExt;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tower::util::ServiceExt;
use uuid::Uuid;

use safepull_ledger::api::{self, AppState};
use safepull_ledger::domain::{Balance, UserAccount};
use safepull_ledger::gateway::{
    B2cPaymentRequest, CollectionAck, CollectionCredentials, DisbursementAck,
    DisbursementCredentials, GatewayError, PaymentGateway, StkPushRequest,
};
use safepull_ledger::handlers::InitiationSettings;
use safepull_ledger::reconciliation::{ReconciliationEngine, RetryPolicy};
use safepull_ledger::store::{InMemoryLedgerStore, LedgerStore, PgLedgerStore};

// =========================================================================
// Fake gateway
// =========================================================================

/// Accepts requests with sequential correlation keys (`ws_CO_<n>` for
/// collections, `AG_<n>` for disbursements) unless set to refuse or to go
/// silent after receiving the request
#[derive(Default)]
pub struct FakeGateway {
    refuse: AtomicBool,
    silent: AtomicBool,
    counter: AtomicUsize,
    pub collections: Mutex<Vec<StkPushRequest>>,
    pub disbursements: Mutex<Vec<B2cPaymentRequest>>,
}

impl FakeGateway {
    pub fn refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Take requests but lose every acknowledgement
    pub fn silent(&self, silent: bool) {
        self.silent.store(silent, Ordering::SeqCst);
    }

    fn next(&self) -> Result<usize, GatewayError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(GatewayError::Rejected {
                code: "400.002.02".to_string(),
                description: "Bad Request - Invalid PhoneNumber".to_string(),
            });
        }
        Ok(self.counter.fetch_add(1, Ordering::SeqCst))
    }

    fn acknowledge(&self) -> Result<(), GatewayError> {
        if self.silent.load(Ordering::SeqCst) {
            return Err(GatewayError::Status {
                status: 504,
                body: "Gateway Timeout".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn request_collection(
        &self,
        request: &StkPushRequest,
    ) -> Result<CollectionAck, GatewayError> {
        let n = self.next()?;
        self.collections.lock().unwrap().push(request.clone());
        self.acknowledge()?;
        Ok(CollectionAck {
            merchant_request_id: format!("MR_{}", n),
            checkout_request_id: format!("ws_CO_{}", n),
            response_code: "0".to_string(),
            response_description: "Success. Request accepted for processing".to_string(),
            customer_message: "Success. Request accepted for processing".to_string(),
        })
    }

    async fn request_disbursement(
        &self,
        request: &B2cPaymentRequest,
    ) -> Result<DisbursementAck, GatewayError> {
        let n = self.next()?;
        self.disbursements.lock().unwrap().push(request.clone());
        self.acknowledge()?;
        Ok(DisbursementAck {
            conversation_id: format!("AG_{}", n),
            originator_conversation_id: format!("OC_{}", n),
            response_code: "0".to_string(),
            response_description: "Accept the service request successfully.".to_string(),
        })
    }
}

// =========================================================================
// App setup
// =========================================================================

pub fn test_settings() -> InitiationSettings {
    InitiationSettings {
        collection: CollectionCredentials {
            shortcode: "174379".to_string(),
            passkey: "test-passkey".to_string(),
            callback_url: "https://example.test/mpesaCallback".to_string(),
            label: "SafePull".to_string(),
        },
        disbursement: DisbursementCredentials {
            initiator_name: "testapi".to_string(),
            security_credential: "test-credential".to_string(),
            shortcode: "600000".to_string(),
            command_id: "BusinessPayment".to_string(),
            result_url: "https://example.test/b2cResult".to_string(),
            timeout_url: "https://example.test/timeout".to_string(),
            label: "SafePull".to_string(),
        },
        country_code: "254".to_string(),
        account_reference_prefix: "SafePull".to_string(),
    }
}

pub struct TestApp {
    pub store: InMemoryLedgerStore,
    pub gateway: Arc<FakeGateway>,
    pub state: AppState,
    pub router: Router,
}

impl TestApp {
    pub fn new() -> Self {
        let store = InMemoryLedgerStore::new();
        let shared: Arc<dyn LedgerStore> = Arc::new(store.clone());
        let gateway = Arc::new(FakeGateway::default());
        let engine = ReconciliationEngine::with_retry_policy(
            shared.clone(),
            RetryPolicy::new(20, std::time::Duration::from_millis(1)),
        );
        let state = AppState::new(shared, gateway.clone(), engine, test_settings());
        let router = api::app(state.clone());
        Self {
            store,
            gateway,
            state,
            router,
        }
    }

    pub async fn post(&self, uri: &str, body: Value) -> Response {
        self.send_raw("POST", uri, body.to_string()).await
    }

    pub async fn send_raw(&self, method: &str, uri: &str, body: String) -> Response {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap();
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str) -> Response {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn balance(&self, user_id: Uuid) -> Decimal {
        self.store
            .get_account(user_id)
            .await
            .unwrap()
            .unwrap()
            .balance
            .value()
    }
}

/// Seed an account holding `balance`
pub async fn funded_user(store: &InMemoryLedgerStore, balance: Decimal) -> Uuid {
    let user_id = Uuid::new_v4();
    let mut account = UserAccount::new(user_id);
    account.balance = Balance::new(balance).unwrap();
    store.put_account(account).await;
    user_id
}

pub async fn body_json(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Postgres store when `DATABASE_URL` is set, with the schema applied
pub async fn pg_store() -> Option<PgLedgerStore> {
    dotenvy::dotenv().ok();
    let database_url = std::env::var("DATABASE_URL").ok()?;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DB");

    // Parallel tests race on IF NOT EXISTS; the loser's error is harmless
    let _ = sqlx::Executor::execute(&pool, include_str!("../../migrations/0001_init.sql")).await;

    Some(PgLedgerStore::new(pool))
}

// =========================================================================
// Callback payloads
// =========================================================================

pub fn collection_success(checkout_request_id: &str, amount: u64, receipt: &str) -> Value {
    json!({
        "Body": {
            "stkCallback": {
                "MerchantRequestID": "29115-34620561-1",
                "CheckoutRequestID": checkout_request_id,
                "ResultCode": 0,
                "ResultDesc": "The service request is processed successfully.",
                "CallbackMetadata": {
                    "Item": [
                        { "Name": "Amount", "Value": amount },
                        { "Name": "MpesaReceiptNumber", "Value": receipt },
                        { "Name": "TransactionDate", "Value": 20191219102115u64 },
                        { "Name": "PhoneNumber", "Value": 254708374149u64 }
                    ]
                }
            }
        }
    })
}

pub fn collection_failure(checkout_request_id: &str, code: i64, desc: &str) -> Value {
    json!({
        "Body": {
            "stkCallback": {
                "MerchantRequestID": "29115-34620561-1",
                "CheckoutRequestID": checkout_request_id,
                "ResultCode": code,
                "ResultDesc": desc
            }
        }
    })
}

pub fn disbursement_success(conversation_id: &str, transaction_id: &str) -> Value {
    json!({
        "Result": {
            "ResultType": 0,
            "ResultCode": 0,
            "ResultDesc": "The service request is processed successfully.",
            "OriginatorConversationID": "10571-7910404-1",
            "ConversationID": conversation_id,
            "TransactionID": transaction_id
        }
    })
}

pub fn disbursement_failure(conversation_id: &str, code: i64, desc: &str) -> Value {
    json!({
        "Result": {
            "ResultType": 0,
            "ResultCode": code,
            "ResultDesc": desc,
            "OriginatorConversationID": "10571-7910404-1",
            "ConversationID": conversation_id,
            "TransactionID": "OAK0000000"
        }
    })
}

/// Result callback echoing the originator id we sent with the payout
pub fn disbursement_success_for(conversation_id: &str, originator: &str, transaction_id: &str) -> Value {
    json!({
        "Result": {
            "ResultType": 0,
            "ResultCode": 0,
            "ResultDesc": "The service request is processed successfully.",
            "OriginatorConversationID": originator,
            "ConversationID": conversation_id,
            "TransactionID": transaction_id
        }
    })
}

pub fn disbursement_timeout(conversation_id: &str) -> Value {
    json!({
        "Result": {
            "ResultType": 0,
            "ResultCode": 1,
            "ResultDesc": "The request timed out.",
            "ConversationID": conversation_id
        }
    })
}
