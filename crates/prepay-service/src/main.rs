//! Prepay ledger service entry point.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use prepay_engine::{AuditSink, ReconciliationJob};
use prepay_service::{
    create_router, spawn_notification_worker, AppState, LogNotifier, PaddleFeedClient,
    ServiceConfig,
};
use prepay_store::RocksStore;

/// Capacity of the audit-to-notification queue.
const AUDIT_QUEUE_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,prepay=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting prepay ledger service");

    let config = ServiceConfig::from_env();

    tracing::info!(
        listen_addr = %config.listen_addr,
        data_dir = %config.data_dir,
        webhook_verification = %config.webhook_secret.is_some(),
        provider_feed = %config.provider_api_url.is_some(),
        "service configuration loaded"
    );

    tracing::info!(path = %config.data_dir, "opening RocksDB store");
    let store = Arc::new(RocksStore::open(&config.data_dir)?);

    let (audit, audit_rx) = AuditSink::channel(AUDIT_QUEUE_CAPACITY);
    spawn_notification_worker(audit_rx, Arc::new(LogNotifier));

    let state = AppState::new(Arc::clone(&store), config.clone(), audit);

    // Reconciliation runs against the provider feed when one is
    // configured.
    match (&config.provider_api_url, &config.provider_api_key) {
        (Some(url), Some(key)) => {
            let feed = Arc::new(PaddleFeedClient::new(url.clone(), key.clone()));
            let job = ReconciliationJob::new(
                Arc::clone(&state.mutator),
                Arc::clone(&store),
                feed,
            );
            let interval = config.recon_interval;
            let lookback = config.recon_lookback;
            tracing::info!(
                interval_secs = %interval.as_secs(),
                lookback_secs = %lookback.as_secs(),
                "reconciliation job scheduled"
            );
            tokio::spawn(async move {
                job.run_every(interval, lookback).await;
            });
        }
        _ => {
            tracing::warn!("provider feed not configured - reconciliation disabled");
        }
    }

    let app = create_router(state);
    tracing::info!("router configured with all API endpoints");

    tracing::info!(listen_addr = %config.listen_addr, "starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
