//! In-chat payment confirmation integration tests.

mod common;

use common::TestHarness;
use serde_json::json;

async fn create_session(harness: &TestHarness, account_id: i64, amount: &str) -> String {
    let response = harness
        .server
        .post("/v1/payments/session")
        .add_header("authorization", harness.auth_header())
        .json(&json!({ "account_id": account_id, "amount": amount }))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    body["payload"].as_str().unwrap().to_string()
}

// ============================================================================
// Pre-confirmation
// ============================================================================

#[tokio::test]
async fn precheckout_accepts_a_live_session() {
    let harness = TestHarness::new();
    let payload = create_session(&harness, 7, "10.00").await;

    let response = harness
        .server
        .post("/v1/payments/precheckout")
        .add_header("authorization", harness.auth_header())
        .json(&json!({ "payload": payload, "account_id": 7 }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["ok"], true);
}

#[tokio::test]
async fn precheckout_rejects_unknown_session() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/v1/payments/precheckout")
        .add_header("authorization", harness.auth_header())
        .json(&json!({ "payload": "topup:nonexistent", "account_id": 7 }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["ok"], false);
    assert_eq!(body["reason"], "session_expired");
}

#[tokio::test]
async fn precheckout_rejects_account_mismatch() {
    let harness = TestHarness::new();
    let payload = create_session(&harness, 7, "10.00").await;

    let response = harness
        .server
        .post("/v1/payments/precheckout")
        .add_header("authorization", harness.auth_header())
        .json(&json!({ "payload": payload, "account_id": 8 }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["ok"], false);
    assert_eq!(body["reason"], "account_mismatch");
}

// ============================================================================
// Confirmation
// ============================================================================

#[tokio::test]
async fn confirmation_credits_the_session_amount() {
    let harness = TestHarness::new();
    let payload = create_session(&harness, 7, "10.00").await;

    let response = harness
        .server
        .post("/v1/payments/confirm")
        .add_header("authorization", harness.auth_header())
        .json(&json!({
            "payload": payload,
            "charge_id": "charge_1",
            "account_id": 7,
        }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["new_balance"], "10.000000");
    assert_eq!(body["replayed"], false);

    assert_eq!(harness.balance(7).await, "10.000000");
}

#[tokio::test]
async fn redelivered_confirmation_credits_once() {
    let harness = TestHarness::new();
    let payload = create_session(&harness, 7, "10.00").await;

    let confirm = json!({
        "payload": payload,
        "charge_id": "charge_1",
        "account_id": 7,
        "amount": "10.00",
    });

    let first = harness
        .server
        .post("/v1/payments/confirm")
        .add_header("authorization", harness.auth_header())
        .json(&confirm)
        .await;
    first.assert_status_ok();

    // The provider redelivers the confirmation; the charge id anchors
    // idempotency even though the session is gone.
    let second = harness
        .server
        .post("/v1/payments/confirm")
        .add_header("authorization", harness.auth_header())
        .json(&confirm)
        .await;
    second.assert_status_ok();
    let body: serde_json::Value = second.json();
    assert_eq!(body["replayed"], true);
    assert_eq!(body["new_balance"], "10.000000");

    assert_eq!(harness.balance(7).await, "10.000000");
}

#[tokio::test]
async fn expired_session_confirmation_uses_the_request_amount() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/v1/payments/confirm")
        .add_header("authorization", harness.auth_header())
        .json(&json!({
            "payload": "topup:expired",
            "charge_id": "charge_2",
            "account_id": 7,
            "amount": "5.00",
        }))
        .await;

    response.assert_status_ok();
    assert_eq!(harness.balance(7).await, "5.000000");
}

#[tokio::test]
async fn expired_session_confirmation_without_amount_is_rejected() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/v1/payments/confirm")
        .add_header("authorization", harness.auth_header())
        .json(&json!({
            "payload": "topup:expired",
            "charge_id": "charge_3",
            "account_id": 7,
        }))
        .await;

    response.assert_status_bad_request();
    assert_eq!(harness.balance(7).await, "0.000000");
}

#[tokio::test]
async fn session_creation_rejects_non_positive_amounts() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/v1/payments/session")
        .add_header("authorization", harness.auth_header())
        .json(&json!({ "account_id": 7, "amount": "-5.00" }))
        .await;

    response.assert_status_bad_request();
}

#[tokio::test]
async fn session_creation_is_rate_limited_per_account() {
    let harness = TestHarness::with_config(|config| {
        config.payment_rate_limit = 2;
    });

    for _ in 0..2 {
        create_session(&harness, 7, "10.00").await;
    }

    let response = harness
        .server
        .post("/v1/payments/session")
        .add_header("authorization", harness.auth_header())
        .json(&json!({ "account_id": 7, "amount": "10.00" }))
        .await;
    response.assert_status(axum::http::StatusCode::TOO_MANY_REQUESTS);

    // A different account is unaffected.
    create_session(&harness, 8, "10.00").await;
}
