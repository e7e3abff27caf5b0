//! Sliding-window admission control.
//!
//! Admission decisions happen before any ledger call; being over the
//! limit is not a ledger error, it is a front-door decision with its own
//! retry-after. The count-and-increment is a single atomic store
//! operation, so two concurrent requests can never both slip under the
//! limit.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use prepay_core::{AccountId, LedgerError};
use prepay_store::{RateDecision, RateStore};

/// Sliding-window rate limiter over the shared store.
pub struct RateLimiter<S> {
    store: Arc<S>,
}

impl<S: RateStore> RateLimiter<S> {
    /// Create a rate limiter over a rate store.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Check whether a request in `scope` is admitted, counting it if so.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::StoreUnavailable`] if the store fails.
    pub fn check(
        &self,
        scope: &str,
        limit: u32,
        window: Duration,
    ) -> Result<RateDecision, LedgerError> {
        let decision = self.store.check_and_incr(scope, limit, window, Utc::now())?;
        if !decision.allowed {
            tracing::debug!(
                scope = %scope,
                limit = %limit,
                retry_after_secs = %decision.retry_after_secs,
                "request rate limited"
            );
        }
        Ok(decision)
    }
}

/// Scope key for webhook ingestion from one provider.
#[must_use]
pub fn webhook_scope(provider: &str) -> String {
    format!("webhook:{provider}")
}

/// Scope key for payment operations of one account.
#[must_use]
pub fn payment_scope(account_id: AccountId) -> String {
    format!("payments:{account_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use prepay_store::RocksStore;
    use tempfile::TempDir;

    #[test]
    fn admits_up_to_limit_then_rejects() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        let limiter = RateLimiter::new(store);
        let window = Duration::from_secs(60);

        assert!(limiter.check("webhook:paddle", 2, window).unwrap().allowed);
        assert!(limiter.check("webhook:paddle", 2, window).unwrap().allowed);

        let decision = limiter.check("webhook:paddle", 2, window).unwrap();
        assert!(!decision.allowed);
        assert!(decision.retry_after_secs >= 1);
    }

    #[test]
    fn scope_keys_are_distinct() {
        assert_ne!(webhook_scope("paddle"), webhook_scope("stars"));
        assert_ne!(
            payment_scope(AccountId::new(1)),
            payment_scope(AccountId::new(2))
        );
    }
}
