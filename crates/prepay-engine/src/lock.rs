//! Per-account advisory locks.
//!
//! Locks are scoped to a single account so unrelated accounts' mutations
//! stay fully parallel. Acquisition is a set-if-absent with expiry;
//! release verifies the fencing token, so a holder whose TTL lapsed can
//! never release a lock a newer acquisition owns.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use prepay_core::{AccountId, LedgerError};
use prepay_store::{LockStore, ReleaseOutcome};

/// Acquires and releases per-account advisory locks.
pub struct AccountLockManager<S> {
    store: Arc<S>,
    ttl: Duration,
    wait_timeout: Duration,
    retry_interval: Duration,
}

impl<S: LockStore> AccountLockManager<S> {
    /// Create a lock manager over a lock store.
    pub fn new(
        store: Arc<S>,
        ttl: Duration,
        wait_timeout: Duration,
        retry_interval: Duration,
    ) -> Self {
        Self {
            store,
            ttl,
            wait_timeout,
            retry_interval,
        }
    }

    /// Acquire the lock for an account, waiting up to the configured
    /// timeout.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::LockBusy`] when the lock is held and no wait
    ///   budget was configured.
    /// - [`LedgerError::LockTimeout`] when the lock could not be taken
    ///   within the wait timeout. Timing out leaves no partial state.
    pub async fn acquire(&self, account_id: AccountId) -> Result<LockGuard<S>, LedgerError> {
        let resource = lock_resource(account_id);
        let token = Uuid::new_v4();
        let deadline = tokio::time::Instant::now() + self.wait_timeout;

        loop {
            if self.store.try_acquire(&resource, token, self.ttl, Utc::now())? {
                return Ok(LockGuard {
                    store: Arc::clone(&self.store),
                    resource,
                    token,
                    released: false,
                });
            }

            if self.wait_timeout.is_zero() {
                return Err(LedgerError::LockBusy { resource });
            }
            if tokio::time::Instant::now() + self.retry_interval >= deadline {
                return Err(LedgerError::LockTimeout { resource });
            }
            tokio::time::sleep(self.retry_interval).await;
        }
    }
}

/// Name of the lock resource for an account.
#[must_use]
pub fn lock_resource(account_id: AccountId) -> String {
    format!("account:{account_id}")
}

/// Proof of lock ownership. Releases the lock on [`LockGuard::release`]
/// or, best effort, on drop; if the process dies the TTL reclaims it.
pub struct LockGuard<S: LockStore> {
    store: Arc<S>,
    resource: String,
    token: Uuid,
    released: bool,
}

impl<S: LockStore> LockGuard<S> {
    /// Release the lock, verifying this guard still owns it.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        match self.store.release(&self.resource, self.token) {
            Ok(ReleaseOutcome::Released) => {}
            Ok(ReleaseOutcome::NotOwner) => {
                // The TTL lapsed mid-mutation and someone else took the
                // lock; deleting it now would break their critical section.
                tracing::warn!(
                    resource = %self.resource,
                    "lock expired before release; a newer holder owns it"
                );
            }
            Err(e) => {
                tracing::warn!(
                    resource = %self.resource,
                    error = %e,
                    "failed to release lock; TTL will reclaim it"
                );
            }
        }
    }
}

impl<S: LockStore> Drop for LockGuard<S> {
    fn drop(&mut self) {
        self.release_inner();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prepay_store::RocksStore;
    use tempfile::TempDir;

    fn manager(wait: Duration) -> (AccountLockManager<RocksStore>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        (
            AccountLockManager::new(
                store,
                Duration::from_secs(10),
                wait,
                Duration::from_millis(10),
            ),
            dir,
        )
    }

    #[tokio::test]
    async fn acquire_and_release() {
        let (manager, _dir) = manager(Duration::from_millis(200));
        let account = AccountId::new(7);

        let guard = manager.acquire(account).await.unwrap();
        guard.release();

        // Released lock can be re-acquired immediately.
        let guard = manager.acquire(account).await.unwrap();
        guard.release();
    }

    #[tokio::test]
    async fn contended_lock_times_out() {
        let (manager, _dir) = manager(Duration::from_millis(100));
        let account = AccountId::new(7);

        let held = manager.acquire(account).await.unwrap();
        let result = manager.acquire(account).await;
        assert!(matches!(result, Err(LedgerError::LockTimeout { .. })));
        held.release();
    }

    #[tokio::test]
    async fn zero_wait_surfaces_busy() {
        let (manager, _dir) = manager(Duration::ZERO);
        let account = AccountId::new(7);

        let held = manager.acquire(account).await.unwrap();
        let result = manager.acquire(account).await;
        assert!(matches!(result, Err(LedgerError::LockBusy { .. })));
        held.release();
    }

    #[tokio::test]
    async fn unrelated_accounts_do_not_contend() {
        let (manager, _dir) = manager(Duration::from_millis(100));

        let first = manager.acquire(AccountId::new(1)).await.unwrap();
        let second = manager.acquire(AccountId::new(2)).await.unwrap();
        first.release();
        second.release();
    }

    #[tokio::test]
    async fn dropped_guard_releases_the_lock() {
        let (manager, _dir) = manager(Duration::from_millis(200));
        let account = AccountId::new(7);

        {
            let _guard = manager.acquire(account).await.unwrap();
        }

        let guard = manager.acquire(account).await.unwrap();
        guard.release();
    }
}
