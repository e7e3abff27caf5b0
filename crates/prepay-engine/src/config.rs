//! Engine policy configuration.

use std::str::FromStr;
use std::time::Duration;

use crate::retry::RetryConfig;

/// Policy knobs for the transactional core.
///
/// Retention must outlive the provider's maximum plausible redelivery
/// window; the defaults match a seven-day redelivery horizon.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// TTL on the per-account advisory lock. Auto-expiry prevents
    /// deadlock if a holder crashes mid-mutation.
    pub lock_ttl: Duration,

    /// How long a caller waits for the account lock before surfacing a
    /// retryable busy error. Zero means a single attempt.
    pub lock_wait_timeout: Duration,

    /// Poll interval while waiting for the account lock.
    pub lock_retry_interval: Duration,

    /// In-flight idempotency reservations older than this are considered
    /// abandoned and may be reclaimed.
    pub reservation_liveness: Duration,

    /// How long resolved idempotency records are retained.
    pub idempotency_retention: Duration,

    /// How long webhook receipts are retained.
    pub receipt_retention: Duration,

    /// Maximum allowed distance between a webhook timestamp and now.
    pub max_webhook_skew: Duration,

    /// How long a pending in-chat payment session stays confirmable.
    pub pending_payment_ttl: Duration,

    /// What to do when a refund drives a balance negative.
    pub refund_overdraft_policy: RefundOverdraftPolicy,

    /// Backoff policy for transient failures.
    pub retry: RetryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::from_secs(10),
            lock_wait_timeout: Duration::from_secs(5),
            lock_retry_interval: Duration::from_millis(50),
            reservation_liveness: Duration::from_secs(60),
            idempotency_retention: Duration::from_secs(7 * 24 * 3600),
            receipt_retention: Duration::from_secs(7 * 24 * 3600),
            max_webhook_skew: Duration::from_secs(300),
            pending_payment_ttl: Duration::from_secs(15 * 60),
            refund_overdraft_policy: RefundOverdraftPolicy::FlagForReview,
            retry: RetryConfig::default(),
        }
    }
}

/// What happens when a refund clawback leaves a balance negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefundOverdraftPolicy {
    /// Emit an audit event flagging the account for manual review.
    #[default]
    FlagForReview,

    /// Soft-suspend the account in the same atomic commit.
    SuspendAccount,
}

impl FromStr for RefundOverdraftPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "flag" => Ok(Self::FlagForReview),
            "suspend" => Ok(Self::SuspendAccount),
            other => Err(format!("unknown refund overdraft policy: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_redelivery_window() {
        let config = EngineConfig::default();
        assert!(config.idempotency_retention >= Duration::from_secs(7 * 24 * 3600));
        assert_eq!(config.max_webhook_skew, Duration::from_secs(300));
        assert_eq!(config.reservation_liveness, Duration::from_secs(60));
    }

    #[test]
    fn overdraft_policy_parses() {
        assert_eq!(
            "flag".parse::<RefundOverdraftPolicy>().unwrap(),
            RefundOverdraftPolicy::FlagForReview
        );
        assert_eq!(
            "suspend".parse::<RefundOverdraftPolicy>().unwrap(),
            RefundOverdraftPolicy::SuspendAccount
        );
        assert!("auto-revert".parse::<RefundOverdraftPolicy>().is_err());
    }
}
