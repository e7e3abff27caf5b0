//! Provider transaction feed client.
//!
//! Lists the payment provider's settled transactions for the
//! reconciliation job. Rate-limit responses honor `Retry-After`; server
//! errors back off exponentially up to a retry cap.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use prepay_core::{AccountId, Amount};
use prepay_engine::{ProviderFeed, ProviderFeedError, ProviderTransaction};

/// Maximum request attempts per listing call.
const MAX_ATTEMPTS: u32 = 3;

/// Initial backoff for retried requests (doubles with each attempt).
const INITIAL_BACKOFF_MS: u64 = 250;

/// Provider API client for the reconciliation feed.
#[derive(Debug, Clone)]
pub struct PaddleFeedClient {
    client: Client,
    base_url: String,
    api_key: String,
}

/// One transaction in the provider's list response.
#[derive(Debug, Deserialize)]
struct TransactionDto {
    id: String,
    status: String,
    amount: Amount,
    account_id: AccountId,
    created_at: DateTime<Utc>,
}

/// The provider's list response envelope.
#[derive(Debug, Deserialize)]
struct ListResponse {
    data: Vec<TransactionDto>,
}

impl PaddleFeedClient {
    /// Create a feed client.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client cannot be built; this only happens when
    /// the TLS backend is unavailable at startup.
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build HTTP client");

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    async fn fetch_window(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<ListResponse, ProviderFeedError> {
        let url = format!("{}/transactions", self.base_url);
        let mut attempt = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            attempt += 1;
            let response = self
                .client
                .get(&url)
                .bearer_auth(&self.api_key)
                .query(&[
                    ("from", from.to_rfc3339()),
                    ("to", to.to_rfc3339()),
                ])
                .send()
                .await
                .map_err(|e| ProviderFeedError::Request(e.to_string()))?;

            match response.status() {
                StatusCode::TOO_MANY_REQUESTS if attempt < MAX_ATTEMPTS => {
                    let wait = retry_after_ms(&response).unwrap_or(backoff_ms);
                    tracing::debug!(attempt = %attempt, wait_ms = %wait, "provider rate limited, retrying");
                    tokio::time::sleep(Duration::from_millis(wait)).await;
                    backoff_ms *= 2;
                }
                status if status.is_server_error() && attempt < MAX_ATTEMPTS => {
                    tracing::debug!(attempt = %attempt, status = %status, "provider error, retrying");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2;
                }
                status if status.is_success() => {
                    return response
                        .json::<ListResponse>()
                        .await
                        .map_err(|e| ProviderFeedError::Malformed(e.to_string()));
                }
                status => {
                    return Err(ProviderFeedError::Request(format!(
                        "provider returned {status} after {attempt} attempts"
                    )));
                }
            }
        }
    }
}

fn retry_after_ms(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(|secs| secs * 1000)
}

#[async_trait]
impl ProviderFeed for PaddleFeedClient {
    fn provider_name(&self) -> &str {
        "paddle"
    }

    async fn list_transactions(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ProviderTransaction>, ProviderFeedError> {
        let response = self.fetch_window(from, to).await?;

        Ok(response
            .data
            .into_iter()
            .filter(|dto| dto.status == "completed")
            .map(|dto| ProviderTransaction {
                txn_id: dto.id,
                account_id: dto.account_id,
                amount: dto.amount,
                occurred_at: dto.created_at,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn txn_json(id: &str, status: &str) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "status": status,
            "amount": "10.000000",
            "account_id": 7,
            "created_at": Utc::now().to_rfc3339(),
        })
    }

    #[tokio::test]
    async fn lists_completed_transactions() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/transactions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [txn_json("txn_1", "completed"), txn_json("txn_2", "pending")],
            })))
            .mount(&server)
            .await;

        let client = PaddleFeedClient::new(server.uri(), "test_key");
        let txns = client
            .list_transactions(Utc::now() - Duration::from_secs(3600), Utc::now())
            .await
            .unwrap();

        assert_eq!(txns.len(), 1);
        assert_eq!(txns[0].txn_id, "txn_1");
        assert_eq!(txns[0].account_id, AccountId::new(7));
    }

    #[tokio::test]
    async fn retries_rate_limit_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/transactions"))
            .respond_with(
                ResponseTemplate::new(429).insert_header("retry-after", "0"),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/transactions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [txn_json("txn_1", "completed")],
            })))
            .mount(&server)
            .await;

        let client = PaddleFeedClient::new(server.uri(), "test_key");
        let txns = client
            .list_transactions(Utc::now() - Duration::from_secs(3600), Utc::now())
            .await
            .unwrap();

        assert_eq!(txns.len(), 1);
    }

    #[tokio::test]
    async fn server_errors_exhaust_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/transactions"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = PaddleFeedClient::new(server.uri(), "test_key");
        let result = client
            .list_transactions(Utc::now() - Duration::from_secs(3600), Utc::now())
            .await;

        assert!(matches!(result, Err(ProviderFeedError::Request(_))));
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/transactions"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = PaddleFeedClient::new(server.uri(), "test_key");
        let result = client
            .list_transactions(Utc::now() - Duration::from_secs(3600), Utc::now())
            .await;

        assert!(matches!(result, Err(ProviderFeedError::Request(_))));
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }
}
