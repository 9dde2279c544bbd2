//! Payment gateway module
//!
//! Outbound calls to the mobile-money gateway. Initiation handlers depend
//! on the `PaymentGateway` trait; `MpesaClient` is the HTTP implementation.

mod client;
mod error;
pub mod requests;

use async_trait::async_trait;
use serde::Deserialize;

pub use client::MpesaClient;
pub use error::GatewayError;
pub use requests::{
    account_reference, build_collection_request, build_disbursement_request, gateway_timestamp,
    stk_password, B2cPaymentRequest, CollectionCredentials, DisbursementCredentials,
    StkPushRequest,
};

/// `ResponseCode` the gateway uses for an accepted request
pub const RESPONSE_CODE_ACCEPTED: &str = "0";

/// Acknowledgement of a collection (STK push) request
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CollectionAck {
    #[serde(rename = "MerchantRequestID")]
    pub merchant_request_id: String,
    /// Correlation key echoed in the collection result callback
    #[serde(rename = "CheckoutRequestID")]
    pub checkout_request_id: String,
    #[serde(rename = "ResponseCode")]
    pub response_code: String,
    #[serde(rename = "ResponseDescription", default)]
    pub response_description: String,
    #[serde(rename = "CustomerMessage", default)]
    pub customer_message: String,
}

/// Acknowledgement of a disbursement (B2C) request
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DisbursementAck {
    /// Correlation key echoed in the disbursement result and timeout callbacks
    #[serde(rename = "ConversationID")]
    pub conversation_id: String,
    #[serde(rename = "OriginatorConversationID")]
    pub originator_conversation_id: String,
    #[serde(rename = "ResponseCode")]
    pub response_code: String,
    #[serde(rename = "ResponseDescription", default)]
    pub response_description: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn request_collection(&self, request: &StkPushRequest)
        -> Result<CollectionAck, GatewayError>;

    async fn request_disbursement(
        &self,
        request: &B2cPaymentRequest,
    ) -> Result<DisbursementAck, GatewayError>;
}
