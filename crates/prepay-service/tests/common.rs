//! Common test utilities for prepay-service integration tests.

#![allow(dead_code)] // Some utilities are used by different test files

use std::sync::Arc;

use axum::Router;
use axum_test::TestServer;
use chrono::Utc;
use serde_json::json;
use tempfile::TempDir;

use prepay_engine::{AuditSink, WebhookVerifier};
use prepay_service::{create_router, AppState, ServiceConfig};
use prepay_store::RocksStore;

/// Test harness containing everything needed for integration tests.
pub struct TestHarness {
    /// The test server for making HTTP requests.
    pub server: TestServer,
    /// Temporary directory for the database (kept alive for test duration).
    pub _temp_dir: TempDir,
    /// The service API key for authenticated requests.
    pub service_api_key: String,
    /// The webhook signing secret.
    pub webhook_secret: String,
}

impl TestHarness {
    /// Create a new test harness with a fresh database.
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    /// Create a harness with customized configuration.
    pub fn with_config(customize: impl FnOnce(&mut ServiceConfig)) -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let store = Arc::new(RocksStore::open(temp_dir.path()).expect("failed to open store"));

        let service_api_key = "test-service-key".to_string();
        let webhook_secret = "test_webhook_secret".to_string();

        let mut config = ServiceConfig {
            listen_addr: "127.0.0.1:0".into(),
            data_dir: temp_dir.path().to_string_lossy().to_string(),
            service_api_key: Some(service_api_key.clone()),
            webhook_secret: Some(webhook_secret.clone()),
            webhook_rate_limit: 1000,
            payment_rate_limit: 1000,
            ..ServiceConfig::default()
        };
        customize(&mut config);

        let state = AppState::new(store, config, AuditSink::log_only());
        let router: Router = create_router(state);
        let server = TestServer::new(router).expect("failed to create test server");

        Self {
            server,
            _temp_dir: temp_dir,
            service_api_key,
            webhook_secret,
        }
    }

    /// Authorization header value for service requests.
    pub fn auth_header(&self) -> String {
        format!("Bearer {}", self.service_api_key)
    }

    /// Sign a webhook body with the configured secret at the current time.
    pub fn sign(&self, body: &str) -> String {
        self.sign_at(body, Utc::now().timestamp())
    }

    /// Sign a webhook body with an explicit timestamp.
    pub fn sign_at(&self, body: &str, timestamp: i64) -> String {
        WebhookVerifier::new(self.webhook_secret.clone(), std::time::Duration::from_secs(300))
            .sign(body, timestamp)
    }

    /// A signed top-up webhook body for an account.
    pub fn topup_webhook_body(event_id: &str, txn_id: &str, account_id: i64, amount: &str) -> String {
        json!({
            "event_type": "transaction.completed",
            "event_id": event_id,
            "data": {
                "id": txn_id,
                "amount": amount,
                "metadata": { "account_id": account_id },
            },
        })
        .to_string()
    }

    /// Credit an account through the ledger apply surface.
    pub async fn topup(&self, account_id: i64, amount: &str, key: &str) {
        self.server
            .post("/v1/ledger/apply")
            .add_header("authorization", self.auth_header())
            .json(&json!({
                "account_id": account_id,
                "amount": amount,
                "kind": "topup",
                "idempotency_key": key,
            }))
            .await
            .assert_status_ok();
    }

    /// Fetch an account's balance string.
    pub async fn balance(&self, account_id: i64) -> String {
        let response = self
            .server
            .get(&format!("/v1/ledger/accounts/{account_id}/balance"))
            .add_header("authorization", self.auth_header())
            .await;
        response.assert_status_ok();
        let body: serde_json::Value = response.json();
        body["balance"].as_str().unwrap().to_string()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
