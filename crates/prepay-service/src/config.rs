//! Service configuration.

use std::time::Duration;

use prepay_engine::{EngineConfig, RefundOverdraftPolicy};

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// Path to the `RocksDB` data directory (default: "/data/prepay").
    pub data_dir: String,

    /// Service API key for service-to-service auth. `/v1` routes reject
    /// everything when unset.
    pub service_api_key: Option<String>,

    /// Shared secret for webhook signature verification. Webhook
    /// ingestion refuses deliveries when unset.
    pub webhook_secret: Option<String>,

    /// Provider API base URL for the reconciliation feed (optional).
    pub provider_api_url: Option<String>,

    /// Provider API key (optional).
    pub provider_api_key: Option<String>,

    /// How often the reconciliation job runs.
    pub recon_interval: Duration,

    /// How far back each reconciliation window reaches.
    pub recon_lookback: Duration,

    /// Webhook admissions per provider per window.
    pub webhook_rate_limit: u32,

    /// Payment-session admissions per account per window.
    pub payment_rate_limit: u32,

    /// Window for the rate limits above.
    pub rate_window: Duration,

    /// What to do when a refund drives a balance negative.
    pub refund_overdraft_policy: RefundOverdraftPolicy,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,
}

impl ServiceConfig {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            data_dir: std::env::var("DATA_DIR").unwrap_or_else(|_| "/data/prepay".into()),
            service_api_key: std::env::var("SERVICE_API_KEY").ok(),
            webhook_secret: std::env::var("WEBHOOK_SECRET").ok(),
            provider_api_url: std::env::var("PROVIDER_API_URL").ok(),
            provider_api_key: std::env::var("PROVIDER_API_KEY").ok(),
            recon_interval: Duration::from_secs(
                env_u64("RECON_INTERVAL_SECONDS", 24 * 3600),
            ),
            recon_lookback: Duration::from_secs(
                env_u64("RECON_LOOKBACK_SECONDS", 3 * 24 * 3600),
            ),
            webhook_rate_limit: env_u32("WEBHOOK_RATE_LIMIT", 300),
            payment_rate_limit: env_u32("PAYMENT_RATE_LIMIT", 10),
            rate_window: Duration::from_secs(env_u64("RATE_WINDOW_SECONDS", 60)),
            refund_overdraft_policy: std::env::var("REFUND_OVERDRAFT_POLICY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
            cors_origins: std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "*".into())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            max_body_bytes: usize::try_from(env_u64("MAX_BODY_BYTES", 1024 * 1024))
                .unwrap_or(1024 * 1024),
            request_timeout_seconds: env_u64("REQUEST_TIMEOUT_SECONDS", 30),
        }
    }

    /// Engine configuration derived from the service-level policy knobs.
    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            refund_overdraft_policy: self.refund_overdraft_policy,
            ..EngineConfig::default()
        }
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_u32(name: &str, default: u32) -> u32 {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            data_dir: "/data/prepay".into(),
            service_api_key: None,
            webhook_secret: None,
            provider_api_url: None,
            provider_api_key: None,
            recon_interval: Duration::from_secs(24 * 3600),
            recon_lookback: Duration::from_secs(3 * 24 * 3600),
            webhook_rate_limit: 300,
            payment_rate_limit: 10,
            rate_window: Duration::from_secs(60),
            refund_overdraft_policy: RefundOverdraftPolicy::FlagForReview,
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024,
            request_timeout_seconds: 30,
        }
    }
}
