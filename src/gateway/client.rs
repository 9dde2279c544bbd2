//! M-Pesa HTTP client
//!
//! Exchanges consumer credentials for a bearer token, then posts collection
//! and disbursement requests. Tokens are cached until shortly before expiry.

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use super::{
    B2cPaymentRequest, CollectionAck, DisbursementAck, GatewayError, PaymentGateway,
    StkPushRequest, RESPONSE_CODE_ACCEPTED,
};

pub const TOKEN_PATH: &str = "/oauth/v1/generate?grant_type=client_credentials";
pub const STK_PUSH_PATH: &str = "/mpesa/stkpush/v1/processrequest";
pub const B2C_PAYMENT_PATH: &str = "/mpesa/b2c/v1/paymentrequest";

/// Refresh this long before the gateway's stated expiry
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    /// Seconds, sent as a string
    #[serde(default)]
    expires_in: Option<serde_json::Value>,
}

/// Error body for refused requests
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(rename = "errorCode")]
    error_code: String,
    #[serde(rename = "errorMessage", default)]
    error_message: String,
}

#[derive(Debug)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

#[derive(Clone)]
pub struct MpesaClient {
    http: Client,
    base_url: String,
    consumer_key: String,
    consumer_secret: String,
    token: Arc<Mutex<Option<CachedToken>>>,
}

impl MpesaClient {
    pub fn new(
        base_url: impl Into<String>,
        consumer_key: impl Into<String>,
        consumer_secret: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let http = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            consumer_key: consumer_key.into(),
            consumer_secret: consumer_secret.into(),
            token: Arc::new(Mutex::new(None)),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Get a bearer token, reusing the cached one while it is fresh
    async fn access_token(&self) -> Result<String, GatewayError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        let response = self
            .http
            .get(self.url(TOKEN_PATH))
            .basic_auth(&self.consumer_key, Some(&self.consumer_secret))
            .send()
            .await?;
        let token: TokenResponse = read_json(response).await?;

        let lifetime = token
            .expires_in
            .as_ref()
            .and_then(|v| match v {
                serde_json::Value::String(s) => s.parse::<u64>().ok(),
                other => other.as_u64(),
            })
            .map(Duration::from_secs)
            .unwrap_or(Duration::ZERO);

        tracing::debug!(lifetime_secs = lifetime.as_secs(), "Obtained gateway access token");

        let value = token.access_token;
        *cached = Some(CachedToken {
            value: value.clone(),
            expires_at: Instant::now() + lifetime.saturating_sub(TOKEN_EXPIRY_MARGIN),
        });
        Ok(value)
    }

    async fn post<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp, GatewayError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let token = self
            .access_token()
            .await
            .map_err(|e| GatewayError::Token(Box::new(e)))?;
        let response = self
            .http
            .post(self.url(path))
            .bearer_auth(token)
            .json(body)
            .send()
            .await?;
        read_json(response).await
    }
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, GatewayError> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        if let Ok(refused) = serde_json::from_str::<ErrorBody>(&body) {
            return Err(GatewayError::Rejected {
                code: refused.error_code,
                description: refused.error_message,
            });
        }
        return Err(GatewayError::Status {
            status: status.as_u16(),
            body,
        });
    }

    serde_json::from_str(&body).map_err(|e| GatewayError::InvalidResponse(e.to_string()))
}

fn ensure_accepted(code: &str, description: &str) -> Result<(), GatewayError> {
    if code == RESPONSE_CODE_ACCEPTED {
        Ok(())
    } else {
        Err(GatewayError::Rejected {
            code: code.to_string(),
            description: description.to_string(),
        })
    }
}

#[async_trait]
impl PaymentGateway for MpesaClient {
    async fn request_collection(
        &self,
        request: &StkPushRequest,
    ) -> Result<CollectionAck, GatewayError> {
        let ack: CollectionAck = self.post(STK_PUSH_PATH, request).await?;
        ensure_accepted(&ack.response_code, &ack.response_description)?;

        tracing::info!(
            checkout_request_id = %ack.checkout_request_id,
            merchant_request_id = %ack.merchant_request_id,
            "Collection request accepted"
        );
        Ok(ack)
    }

    async fn request_disbursement(
        &self,
        request: &B2cPaymentRequest,
    ) -> Result<DisbursementAck, GatewayError> {
        let ack: DisbursementAck = self.post(B2C_PAYMENT_PATH, request).await?;
        ensure_accepted(&ack.response_code, &ack.response_description)?;

        tracing::info!(
            conversation_id = %ack.conversation_id,
            originator_conversation_id = %ack.originator_conversation_id,
            "Disbursement request accepted"
        );
        Ok(ack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_trims_base_url() {
        let client = MpesaClient::new(
            "https://sandbox.safaricom.co.ke/",
            "key",
            "secret",
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(
            client.url(STK_PUSH_PATH),
            "https://sandbox.safaricom.co.ke/mpesa/stkpush/v1/processrequest"
        );
    }

    #[test]
    fn test_response_code_check() {
        assert!(ensure_accepted("0", "Accepted").is_ok());
        assert!(matches!(
            ensure_accepted("1", "Insufficient"),
            Err(GatewayError::Rejected { .. })
        ));
    }
}
