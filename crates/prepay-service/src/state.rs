//! Application state.

use std::sync::Arc;

use prepay_engine::{AuditSink, BalanceMutator, RateLimiter, WebhookVerifier};
use prepay_store::RocksStore;

use crate::config::ServiceConfig;

/// Application state shared across handlers.
pub struct AppState {
    /// The storage backend.
    pub store: Arc<RocksStore>,

    /// The balance mutator; the only write path to balances.
    pub mutator: Arc<BalanceMutator<RocksStore>>,

    /// Sliding-window admission control.
    pub limiter: RateLimiter<RocksStore>,

    /// Webhook signature verifier, when a secret is configured.
    pub verifier: Option<WebhookVerifier>,

    /// Service configuration.
    pub config: ServiceConfig,
}

impl AppState {
    /// Create application state over an opened store.
    #[must_use]
    pub fn new(store: Arc<RocksStore>, config: ServiceConfig, audit: AuditSink) -> Self {
        let engine_config = config.engine_config();

        let verifier = config.webhook_secret.as_ref().map(|secret| {
            WebhookVerifier::new(secret.clone(), engine_config.max_webhook_skew)
        });
        if verifier.is_none() {
            tracing::warn!("webhook secret not configured - webhook ingestion disabled");
        }
        if config.service_api_key.is_none() {
            tracing::warn!("service API key not configured - /v1 routes will reject all requests");
        }

        let mutator = Arc::new(BalanceMutator::new(
            Arc::clone(&store),
            engine_config,
            audit,
        ));
        let limiter = RateLimiter::new(Arc::clone(&store));

        Self {
            store,
            mutator,
            limiter,
            verifier,
            config,
        }
    }
}
