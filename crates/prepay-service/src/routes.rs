//! Router configuration.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{health, ledger, payments, webhooks};
use crate::state::AppState;

/// Maximum concurrent requests for the `/v1` API surface.
const API_MAX_CONCURRENT_REQUESTS: usize = 100;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
///
/// ## Ledger (service API key auth)
/// - `GET /v1/ledger/accounts/:account_id/balance`
/// - `GET /v1/ledger/accounts/:account_id/transactions`
/// - `POST /v1/ledger/apply`
///
/// ## Payments (service API key auth, rate-limited per account)
/// - `POST /v1/payments/session`
/// - `POST /v1/payments/precheckout`
/// - `POST /v1/payments/confirm`
///
/// ## Webhooks (signature verification, rate-limited per provider)
/// - `POST /webhooks/paddle`
pub fn create_router(state: AppState) -> Router {
    let cors_origins = state.config.cors_origins.clone();
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    let cors = build_cors_layer(&cors_origins);
    let state = Arc::new(state);

    let api_routes = Router::new()
        // Ledger surface
        .route(
            "/ledger/accounts/:account_id/balance",
            get(ledger::get_balance),
        )
        .route(
            "/ledger/accounts/:account_id/transactions",
            get(ledger::list_transactions),
        )
        .route("/ledger/apply", post(ledger::apply_change))
        // In-chat payments
        .route("/payments/session", post(payments::create_session))
        .route("/payments/precheckout", post(payments::precheckout))
        .route("/payments/confirm", post(payments::confirm))
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS));

    Router::new()
        // Health (public)
        .route("/health", get(health::health))
        // API v1 routes
        .nest("/v1", api_routes)
        // Webhooks (admission-controlled in the handler, not here)
        .route("/webhooks/paddle", post(webhooks::paddle_webhook))
        // Global middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
