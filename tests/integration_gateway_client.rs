//! M-Pesa client against a mock HTTP server

use chrono::{TimeZone, Utc};
use mockito::{Matcher, Mock, Server, ServerGuard};
use rust_decimal_macros::dec;
use serde_json::json;
use std::io::Write;
use std::time::Duration;

use safepull_ledger::domain::Amount;
use safepull_ledger::gateway::{
    build_collection_request, build_disbursement_request, GatewayError, MpesaClient,
    PaymentGateway, StkPushRequest,
};

mod common;

use common::test_settings;

async fn token_mock(server: &mut ServerGuard, hits: usize) -> Mock {
    server
        .mock("GET", "/oauth/v1/generate")
        .match_query(Matcher::UrlEncoded(
            "grant_type".into(),
            "client_credentials".into(),
        ))
        .match_header("authorization", Matcher::Regex("^Basic ".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"test-token","expires_in":"3599"}"#)
        .expect(hits)
        .create_async()
        .await
}

fn client(server: &ServerGuard) -> MpesaClient {
    MpesaClient::new(server.url(), "key", "secret", Duration::from_secs(5)).unwrap()
}

fn collection_request() -> StkPushRequest {
    let settings = test_settings();
    build_collection_request(
        &settings.collection,
        &Amount::new(dec!(500)).unwrap(),
        "254708374149",
        "SafeA1B2C3D4",
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap(),
    )
}

const STK_ACCEPTED: &str = r#"{
    "MerchantRequestID": "29115-34620561-1",
    "CheckoutRequestID": "ws_CO_191220191020363925",
    "ResponseCode": "0",
    "ResponseDescription": "Success. Request accepted for processing",
    "CustomerMessage": "Success. Request accepted for processing"
}"#;

#[tokio::test]
async fn test_collection_request_accepted() {
    let mut server = Server::new_async().await;
    let token = token_mock(&mut server, 1).await;
    let stk = server
        .mock("POST", "/mpesa/stkpush/v1/processrequest")
        .match_header("authorization", "Bearer test-token")
        .match_body(Matcher::PartialJson(json!({
            "BusinessShortCode": "174379",
            "Timestamp": "20240301093000",
            "TransactionType": "CustomerPayBillOnline",
            "Amount": 500,
            "PhoneNumber": "254708374149",
            "CallBackURL": "https://example.test/mpesaCallback",
            "AccountReference": "SafeA1B2C3D4"
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(STK_ACCEPTED)
        .create_async()
        .await;

    let ack = client(&server)
        .request_collection(&collection_request())
        .await
        .unwrap();

    assert_eq!(ack.checkout_request_id, "ws_CO_191220191020363925");
    token.assert_async().await;
    stk.assert_async().await;
}

#[tokio::test]
async fn test_token_is_reused() {
    let mut server = Server::new_async().await;
    let token = token_mock(&mut server, 1).await;
    let stk = server
        .mock("POST", "/mpesa/stkpush/v1/processrequest")
        .with_status(200)
        .with_body(STK_ACCEPTED)
        .expect(2)
        .create_async()
        .await;

    let client = client(&server);
    client.request_collection(&collection_request()).await.unwrap();
    client.request_collection(&collection_request()).await.unwrap();

    token.assert_async().await;
    stk.assert_async().await;
}

#[tokio::test]
async fn test_nonzero_response_code_is_rejected() {
    let mut server = Server::new_async().await;
    let _token = token_mock(&mut server, 1).await;
    let _stk = server
        .mock("POST", "/mpesa/stkpush/v1/processrequest")
        .with_status(200)
        .with_body(
            r#"{"MerchantRequestID":"m","CheckoutRequestID":"c","ResponseCode":"1","ResponseDescription":"Rejected"}"#,
        )
        .create_async()
        .await;

    let err = client(&server)
        .request_collection(&collection_request())
        .await
        .unwrap_err();

    match err {
        GatewayError::Rejected { code, description } => {
            assert_eq!(code, "1");
            assert_eq!(description, "Rejected");
        }
        other => panic!("expected rejection, got {:?}", other),
    }
}

#[tokio::test]
async fn test_error_body_is_rejected() {
    let mut server = Server::new_async().await;
    let _token = token_mock(&mut server, 1).await;
    let _stk = server
        .mock("POST", "/mpesa/stkpush/v1/processrequest")
        .with_status(400)
        .with_body(
            r#"{"requestId":"1","errorCode":"400.002.02","errorMessage":"Bad Request - Invalid PhoneNumber"}"#,
        )
        .create_async()
        .await;

    let err = client(&server)
        .request_collection(&collection_request())
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::Rejected { ref code, .. } if code == "400.002.02"));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_server_error_keeps_status() {
    let mut server = Server::new_async().await;
    let _token = token_mock(&mut server, 1).await;
    let _stk = server
        .mock("POST", "/mpesa/stkpush/v1/processrequest")
        .with_status(503)
        .with_body("upstream unavailable")
        .create_async()
        .await;

    let err = client(&server)
        .request_collection(&collection_request())
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::Status { status: 503, .. }));
    assert!(err.is_transient());
    assert!(err.outcome_unknown());
}

#[tokio::test]
async fn test_token_failure_stops_request() {
    let mut server = Server::new_async().await;
    let _token = server
        .mock("GET", "/oauth/v1/generate")
        .match_query(Matcher::Any)
        .with_status(401)
        .with_body("unauthorized")
        .create_async()
        .await;
    let stk = server
        .mock("POST", "/mpesa/stkpush/v1/processrequest")
        .expect(0)
        .create_async()
        .await;

    let err = client(&server)
        .request_collection(&collection_request())
        .await
        .unwrap_err();

    match &err {
        GatewayError::Token(inner) => {
            assert!(matches!(**inner, GatewayError::Status { status: 401, .. }))
        }
        other => panic!("expected token failure, got {:?}", other),
    }
    // Nothing was sent, so nothing can have happened
    assert!(!err.outcome_unknown());
    stk.assert_async().await;
}

#[tokio::test]
async fn test_disbursement_request_accepted() {
    let mut server = Server::new_async().await;
    let _token = token_mock(&mut server, 1).await;
    let b2c = server
        .mock("POST", "/mpesa/b2c/v1/paymentrequest")
        .match_header("authorization", "Bearer test-token")
        .match_body(Matcher::PartialJson(json!({
            "InitiatorName": "testapi",
            "CommandID": "BusinessPayment",
            "OriginatorConversationID": "6f1c1f9e-2b1d-4a57-9a3e-1d2f3c4b5a69",
            "Amount": 250,
            "PartyA": "600000",
            "PartyB": "254708374149",
            "QueueTimeOutURL": "https://example.test/timeout",
            "ResultURL": "https://example.test/b2cResult"
        })))
        .with_status(200)
        .with_body(
            r#"{"ConversationID":"AG_20191219_00005797af5d7d75f652","OriginatorConversationID":"16740-34861180-1","ResponseCode":"0","ResponseDescription":"Accept the service request successfully."}"#,
        )
        .create_async()
        .await;

    let settings = test_settings();
    let request = build_disbursement_request(
        &settings.disbursement,
        &Amount::new(dec!(250)).unwrap(),
        "254708374149",
        "6f1c1f9e-2b1d-4a57-9a3e-1d2f3c4b5a69",
    );
    let ack = client(&server).request_disbursement(&request).await.unwrap();

    assert_eq!(ack.conversation_id, "AG_20191219_00005797af5d7d75f652");
    b2c.assert_async().await;
}

#[tokio::test]
async fn test_lost_acknowledgement_is_an_unknown_outcome() {
    let mut server = Server::new_async().await;
    let _token = token_mock(&mut server, 1).await;
    let b2c = server
        .mock("POST", "/mpesa/b2c/v1/paymentrequest")
        .with_status(200)
        .with_chunked_body(|w| {
            std::thread::sleep(Duration::from_millis(800));
            w.write_all(br#"{"ConversationID":"AG_late","OriginatorConversationID":"x","ResponseCode":"0"}"#)
        })
        .expect(1)
        .create_async()
        .await;

    let client = MpesaClient::new(server.url(), "key", "secret", Duration::from_millis(200)).unwrap();
    let settings = test_settings();
    let request = build_disbursement_request(
        &settings.disbursement,
        &Amount::new(dec!(200)).unwrap(),
        "254708374149",
        "0b7e4c52-3f4e-4f0e-8d8c-0c9a6a1b2c3d",
    );
    let err = client.request_disbursement(&request).await.unwrap_err();

    assert!(matches!(err, GatewayError::Transport(_)), "got {:?}", err);
    assert!(err.outcome_unknown());
    // The request did reach the gateway
    b2c.assert_async().await;
}
