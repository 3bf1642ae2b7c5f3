use std::time::Duration;

use course_billing::billing::{GatewayError, HttpGateway, PaymentGateway};
use httpmock::prelude::*;
use serde_json::json;

fn gateway(server: &MockServer, api_key: Option<&str>) -> HttpGateway {
    HttpGateway::new(
        server.url("/api"),
        api_key.map(str::to_string),
        Duration::from_secs(5),
    )
    .unwrap()
}

// key: billing-gateway-tests -> token exchange + amount sync
#[tokio::test]
async fn amount_update_exchanges_token_once_and_sends_bearer() {
    let server = MockServer::start_async().await;

    let token_mock = server.mock(|when, then| {
        when.method(POST)
            .path("/api/auth/tokens")
            .json_body(json!({ "api_key": "static-key" }));
        then.status(201).json_body(json!({ "token": "bearer-1" }));
    });
    let update_mock = server.mock(|when, then| {
        when.method(PUT)
            .path("/api/subscriptions/42")
            .header("authorization", "Bearer bearer-1")
            .json_body(json!({ "amount_cents": 50_100 }));
        then.status(200).json_body(json!({ "id": 42, "amount_cents": 50_100 }));
    });

    let client = gateway(&server, Some("static-key"));
    client.update_amount(42, 50_100).await.unwrap();
    client.update_amount(42, 50_100).await.unwrap();

    token_mock.assert_hits(1);
    update_mock.assert_hits(2);
}

#[tokio::test]
async fn rejected_token_is_dropped_and_refreshed() {
    let server = MockServer::start_async().await;

    let token_mock = server.mock(|when, then| {
        when.method(POST).path("/api/auth/tokens");
        then.status(201).json_body(json!({ "token": "stale" }));
    });
    let update_mock = server.mock(|when, then| {
        when.method(PUT).path("/api/subscriptions/7");
        then.status(401).body("token expired");
    });

    let client = gateway(&server, Some("static-key"));
    let err = client.update_amount(7, 1_000).await.unwrap_err();
    assert!(matches!(err, GatewayError::Rejected { status: 401, .. }));

    let _ = client.update_amount(7, 1_000).await;
    token_mock.assert_hits(2);
    update_mock.assert_hits(2);
}

#[tokio::test]
async fn missing_api_key_fails_without_calling_the_gateway() {
    let server = MockServer::start_async().await;
    let token_mock = server.mock(|when, then| {
        when.method(POST).path("/api/auth/tokens");
        then.status(201).json_body(json!({ "token": "unused" }));
    });

    let client = gateway(&server, None);
    let err = client.update_amount(1, 1).await.unwrap_err();
    assert!(matches!(err, GatewayError::MissingCredentials));
    token_mock.assert_hits(0);
}

#[tokio::test]
async fn transactions_are_normalised_with_card_on_file() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(POST).path("/api/auth/tokens");
        then.status(201).json_body(json!({ "token": "bearer-2" }));
    });
    let listing_mock = server.mock(|when, then| {
        when.method(GET)
            .path("/api/subscriptions/42/transactions")
            .header("authorization", "Bearer bearer-2");
        then.status(200).json_body(json!({
            "count": 2,
            "results": [
                {
                    "id": 1001,
                    "amount_cents": 50_000,
                    "success": true,
                    "pending": false,
                    "created_at": "2025-02-01T00:00:05.123456",
                    "currency": "EGP",
                    "error_occured": false,
                },
                {
                    "id": 1002,
                    "amount_cents": 50_100,
                    "success": false,
                    "pending": false,
                    "created_at": "2025-03-01T00:00:05Z",
                    "currency": "EGP",
                    "error_occured": true,
                    "is_voided": true,
                    "source_data": { "pan": "2346", "sub_type": "MasterCard", "type": "card" },
                },
            ]
        }));
    });

    let client = gateway(&server, Some("static-key"));
    let history = client.list_transactions(42).await.unwrap();
    listing_mock.assert();

    assert_eq!(history.transactions.len(), 2);
    let first = &history.transactions[0];
    assert_eq!(first.id, 1001);
    assert!(first.success);
    assert!(first.created_at.is_some());
    assert!(first.card_pan.is_none());

    let second = &history.transactions[1];
    assert!(second.error_occurred);
    assert!(second.is_voided);
    assert!(!second.is_refunded);

    let card = history.card.expect("card on file");
    assert_eq!(card.brand.as_deref(), Some("MasterCard"));
    assert_eq!(card.masked_pan.as_deref(), Some("2346"));
}

#[tokio::test]
async fn bare_transaction_arrays_are_accepted() {
    let server = MockServer::start_async().await;
    server.mock(|when, then| {
        when.method(POST).path("/api/auth/tokens");
        then.status(201).json_body(json!({ "token": "bearer-3" }));
    });
    server.mock(|when, then| {
        when.method(GET).path("/api/subscriptions/9/transactions");
        then.status(200)
            .json_body(json!([{ "id": 1, "amount_cents": 50_000, "success": true }]));
    });

    let client = gateway(&server, Some("static-key"));
    let history = client.list_transactions(9).await.unwrap();
    assert_eq!(history.transactions.len(), 1);
    assert!(history.card.is_none());
}
