//! The balance mutator: exactly-once, per-account-serialized ledger
//! mutations.
//!
//! [`BalanceMutator::apply_change`] is the only write path to balances.
//! Each call runs under an idempotency reservation and the account's
//! advisory lock, and commits the balance write, history append, and
//! idempotency resolution in one atomic store batch. Duplicate keys
//! replay the stored result so every caller sharing a key observes the
//! identical outcome.

use std::sync::Arc;

use chrono::Utc;

use prepay_core::{
    Account, AccountId, Amount, ExternalRef, LedgerError, LedgerTransaction, TransactionId,
    TransactionKind,
};
use prepay_store::{
    EngineStore, IdempotencyRecord, IdempotencyState, Reservation, StoredResult,
};

use crate::audit::{AuditEvent, AuditSink};
use crate::config::{EngineConfig, RefundOverdraftPolicy};
use crate::lock::AccountLockManager;

/// Metadata describing one balance change.
#[derive(Debug, Clone)]
pub struct ChangeRequest {
    /// Kind of change.
    pub kind: TransactionKind,

    /// Human-readable description for the ledger entry.
    pub description: String,

    /// Originating provider transaction, if any.
    pub external: Option<ExternalRef>,
}

impl ChangeRequest {
    /// A change of the given kind with no metadata attached.
    #[must_use]
    pub fn new(kind: TransactionKind) -> Self {
        Self {
            kind,
            description: String::new(),
            external: None,
        }
    }

    /// Attach a description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Attach the originating provider transaction.
    #[must_use]
    pub fn with_external(mut self, external: ExternalRef) -> Self {
        self.external = Some(external);
        self
    }
}

/// Result of a successful `apply_change`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Balance after the change.
    pub new_balance: Amount,

    /// The ledger transaction recording the change.
    pub transaction_id: TransactionId,

    /// Whether this call replayed a previously stored result instead of
    /// mutating. Duplicate deliveries are successes, not errors.
    pub replayed: bool,
}

/// Applies signed balance changes exactly once.
pub struct BalanceMutator<S> {
    store: Arc<S>,
    locks: AccountLockManager<S>,
    config: EngineConfig,
    audit: AuditSink,
}

impl<S: EngineStore> BalanceMutator<S> {
    /// Create a mutator over a store.
    pub fn new(store: Arc<S>, config: EngineConfig, audit: AuditSink) -> Self {
        let locks = AccountLockManager::new(
            Arc::clone(&store),
            config.lock_ttl,
            config.lock_wait_timeout,
            config.lock_retry_interval,
        );
        Self {
            store,
            locks,
            config,
            audit,
        }
    }

    /// The engine configuration this mutator runs with.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Apply a signed change to an account, at most once per idempotency
    /// key.
    ///
    /// The account is created on first interaction. Mutations on the same
    /// account are totally ordered by the account lock; unrelated
    /// accounts proceed in parallel.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InsufficientBalance`] when a charge that may not
    ///   overdraw would drive the balance negative. The denial is stored
    ///   and replayed to later callers of the same key.
    /// - [`LedgerError::AccountSuspended`] for usage charges against a
    ///   suspended account.
    /// - [`LedgerError::KeyConflict`] while another caller holds the
    ///   key's reservation (transient).
    /// - [`LedgerError::LockBusy`] / [`LedgerError::LockTimeout`] when
    ///   the account lock cannot be taken (transient, clean no-op).
    /// - [`LedgerError::StoreUnavailable`] on infrastructure failure
    ///   (transient).
    pub async fn apply_change(
        &self,
        account_id: AccountId,
        amount: Amount,
        request: ChangeRequest,
        idempotency_key: &str,
    ) -> Result<ApplyOutcome, LedgerError> {
        let now = Utc::now();
        match self.store.reserve(
            idempotency_key,
            now,
            self.config.reservation_liveness,
            self.config.idempotency_retention,
        )? {
            Reservation::Resolved(result) => {
                tracing::debug!(
                    account_id = %account_id,
                    key = %idempotency_key,
                    "idempotency key already resolved, replaying stored result"
                );
                return replay(result);
            }
            Reservation::InFlight => {
                return Err(LedgerError::KeyConflict {
                    key: idempotency_key.to_string(),
                });
            }
            Reservation::New => {}
        }

        let guard = match self.locks.acquire(account_id).await {
            Ok(guard) => guard,
            Err(e) => {
                // Nothing was applied; free the key instead of making the
                // retry wait out the liveness window.
                self.abandon_quietly(idempotency_key);
                return Err(e);
            }
        };

        let applied = self.apply_locked(account_id, amount, &request, idempotency_key);
        guard.release();

        match applied {
            Ok((outcome, Some(event))) => {
                self.audit.emit(event);
                Ok(outcome)
            }
            Ok((outcome, None)) => Ok(outcome),
            Err(e) => {
                // Insufficient balance was resolved as a stored denial;
                // every other failure releases the reservation.
                if !matches!(e, LedgerError::InsufficientBalance { .. }) {
                    self.abandon_quietly(idempotency_key);
                }
                Err(e)
            }
        }
    }

    /// Current balance of an account; zero for unknown identities.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::StoreUnavailable`] if the store fails.
    pub fn get_balance(&self, account_id: AccountId) -> Result<Amount, LedgerError> {
        Ok(self
            .store
            .get_account(&account_id)?
            .map_or(Amount::ZERO, |account| account.balance))
    }

    /// Fetch an account record.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::StoreUnavailable`] if the store fails.
    pub fn get_account(&self, account_id: AccountId) -> Result<Option<Account>, LedgerError> {
        Ok(self.store.get_account(&account_id)?)
    }

    /// List an account's transactions, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::StoreUnavailable`] if the store fails.
    pub fn list_transactions(
        &self,
        account_id: AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerTransaction>, LedgerError> {
        Ok(self.store.list_transactions(&account_id, limit, offset)?)
    }

    /// The critical section: runs with the account lock held.
    ///
    /// Returns the outcome plus the audit event to emit after the lock is
    /// released; replays carry no event.
    fn apply_locked(
        &self,
        account_id: AccountId,
        amount: Amount,
        request: &ChangeRequest,
        idempotency_key: &str,
    ) -> Result<(ApplyOutcome, Option<AuditEvent>), LedgerError> {
        let now = Utc::now();

        // A provider transaction recorded under a different idempotency
        // key must not credit twice; replay the recorded entry.
        if let Some(external) = &request.external {
            if let Some(tx_id) = self.store.find_external(external)? {
                if let Some(tx) = self.store.get_transaction(&tx_id)? {
                    let result = StoredResult::Applied {
                        new_balance: tx.balance_after,
                        transaction_id: tx.id,
                    };
                    self.store.resolve(
                        idempotency_key,
                        &result,
                        now,
                        self.config.idempotency_retention,
                    )?;
                    tracing::info!(
                        account_id = %account_id,
                        provider = %external.provider,
                        txn_id = %external.txn_id,
                        "provider transaction already applied, replaying"
                    );
                    return Ok((
                        ApplyOutcome {
                            new_balance: tx.balance_after,
                            transaction_id: tx.id,
                            replayed: true,
                        },
                        None,
                    ));
                }
            }
        }

        let mut account = match self.store.get_account(&account_id)? {
            Some(account) => account,
            None => Account::new(account_id),
        };

        if account.is_suspended() && request.kind == TransactionKind::Usage {
            return Err(LedgerError::AccountSuspended { account_id });
        }

        let balance_before = account.balance;
        let new_balance = balance_before.checked_add(amount)?;

        if amount.is_negative() && new_balance.is_negative() && !request.kind.allows_overdraft() {
            let required = amount.abs();
            let result = StoredResult::InsufficientBalance {
                balance: balance_before,
                required,
            };
            self.store.resolve(
                idempotency_key,
                &result,
                now,
                self.config.idempotency_retention,
            )?;
            return Err(LedgerError::InsufficientBalance {
                balance: balance_before,
                required,
            });
        }

        let mut flag = None;
        if new_balance.is_negative() && request.kind == TransactionKind::Refund {
            match self.config.refund_overdraft_policy {
                RefundOverdraftPolicy::FlagForReview => {
                    flag = Some("refund_overdraft".to_string());
                }
                RefundOverdraftPolicy::SuspendAccount => {
                    account.suspend();
                    flag = Some("refund_overdraft_suspended".to_string());
                }
            }
        }

        account.balance = new_balance;
        account.updated_at = now;

        let mut tx = LedgerTransaction::new(
            account_id,
            request.kind,
            amount,
            balance_before,
            new_balance,
            idempotency_key.to_string(),
        )
        .with_description(request.description.clone());
        if let Some(external) = &request.external {
            tx = tx.with_external(external.clone());
        }

        let record = IdempotencyRecord {
            state: IdempotencyState::Resolved {
                result: StoredResult::Applied {
                    new_balance,
                    transaction_id: tx.id,
                },
            },
            expires_at: now + self.config.idempotency_retention,
        };
        self.store.commit_change(&account, &tx, (idempotency_key, &record))?;

        let event = AuditEvent {
            account_id,
            kind: request.kind,
            amount,
            transaction_id: tx.id,
            balance_after: new_balance,
            flag,
            occurred_at: now,
        };

        Ok((
            ApplyOutcome {
                new_balance,
                transaction_id: tx.id,
                replayed: false,
            },
            Some(event),
        ))
    }

    fn abandon_quietly(&self, idempotency_key: &str) {
        if let Err(e) = self.store.abandon(idempotency_key) {
            tracing::warn!(
                key = %idempotency_key,
                error = %e,
                "failed to release idempotency reservation; liveness timeout will reclaim it"
            );
        }
    }
}

/// Map a stored result back to a caller-visible outcome.
fn replay(result: StoredResult) -> Result<ApplyOutcome, LedgerError> {
    match result {
        StoredResult::Applied {
            new_balance,
            transaction_id,
        } => Ok(ApplyOutcome {
            new_balance,
            transaction_id,
            replayed: true,
        }),
        StoredResult::InsufficientBalance { balance, required } => {
            Err(LedgerError::InsufficientBalance { balance, required })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use prepay_core::replay_balance;
    use prepay_store::{IdempotencyStore, LockStore, RocksStore};
    use tempfile::TempDir;
    use uuid::Uuid;

    fn dollars(d: i64) -> Amount {
        Amount::from_dollars(d).unwrap()
    }

    fn mutator_with(config: EngineConfig) -> (Arc<BalanceMutator<RocksStore>>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        (
            Arc::new(BalanceMutator::new(store, config, AuditSink::log_only())),
            dir,
        )
    }

    fn mutator() -> (Arc<BalanceMutator<RocksStore>>, TempDir) {
        mutator_with(EngineConfig::default())
    }

    async fn topup(
        mutator: &BalanceMutator<RocksStore>,
        account: AccountId,
        amount: Amount,
        key: &str,
    ) -> ApplyOutcome {
        mutator
            .apply_change(account, amount, ChangeRequest::new(TransactionKind::Topup), key)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn topup_then_usage() {
        let (mutator, _dir) = mutator();
        let account = AccountId::new(1);

        let credited = topup(&mutator, account, dollars(10), "k-top").await;
        assert_eq!(credited.new_balance, dollars(10));
        assert!(!credited.replayed);

        let charged = mutator
            .apply_change(
                account,
                dollars(3).neg(),
                ChangeRequest::new(TransactionKind::Usage).with_description("api usage"),
                "k-use",
            )
            .await
            .unwrap();
        assert_eq!(charged.new_balance, dollars(7));
        assert_eq!(mutator.get_balance(account).unwrap(), dollars(7));
    }

    #[tokio::test]
    async fn duplicate_key_replays_identical_result() {
        let (mutator, _dir) = mutator();
        let account = AccountId::new(1);
        topup(&mutator, account, dollars(10), "k-top").await;

        let request = || ChangeRequest::new(TransactionKind::Usage);
        let first = mutator
            .apply_change(account, dollars(3).neg(), request(), "k1")
            .await
            .unwrap();
        let second = mutator
            .apply_change(account, dollars(3).neg(), request(), "k1")
            .await
            .unwrap();

        assert!(!first.replayed);
        assert!(second.replayed);
        assert_eq!(first.new_balance, second.new_balance);
        assert_eq!(first.transaction_id, second.transaction_id);
        assert_eq!(mutator.get_balance(account).unwrap(), dollars(7));

        // One top-up plus exactly one usage entry.
        let history = mutator.list_transactions(account, 10, 0).unwrap();
        assert_eq!(history.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_same_key_applies_exactly_once() {
        let (mutator, _dir) = mutator();
        let account = AccountId::new(1);
        topup(&mutator, account, dollars(10), "k-top").await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let mutator = Arc::clone(&mutator);
            handles.push(tokio::spawn(async move {
                loop {
                    match mutator
                        .apply_change(
                            account,
                            dollars(3).neg(),
                            ChangeRequest::new(TransactionKind::Usage),
                            "k1",
                        )
                        .await
                    {
                        Ok(outcome) => return outcome,
                        Err(e) if e.is_transient() => {
                            tokio::time::sleep(Duration::from_millis(5)).await;
                        }
                        Err(e) => panic!("unexpected terminal error: {e}"),
                    }
                }
            }));
        }

        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.unwrap());
        }

        // Every caller observes the identical result.
        for outcome in &outcomes {
            assert_eq!(outcome.new_balance, dollars(7));
            assert_eq!(outcome.transaction_id, outcomes[0].transaction_id);
        }
        assert_eq!(outcomes.iter().filter(|o| !o.replayed).count(), 1);

        assert_eq!(mutator.get_balance(account).unwrap(), dollars(7));
        let history = mutator.list_transactions(account, 10, 0).unwrap();
        assert_eq!(history.len(), 2);
    }

    #[tokio::test]
    async fn usage_never_overdraws() {
        let (mutator, _dir) = mutator();
        let account = AccountId::new(1);
        topup(&mutator, account, dollars(2), "k-top").await;

        let result = mutator
            .apply_change(
                account,
                dollars(3).neg(),
                ChangeRequest::new(TransactionKind::Usage),
                "k1",
            )
            .await;
        assert!(matches!(
            result,
            Err(LedgerError::InsufficientBalance { balance, required })
                if balance == dollars(2) && required == dollars(3)
        ));
        assert_eq!(mutator.get_balance(account).unwrap(), dollars(2));

        // The denial is stored: a retry with the same key observes it.
        let replayed = mutator
            .apply_change(
                account,
                dollars(3).neg(),
                ChangeRequest::new(TransactionKind::Usage),
                "k1",
            )
            .await;
        assert!(matches!(
            replayed,
            Err(LedgerError::InsufficientBalance { .. })
        ));
        assert!(mutator.list_transactions(account, 10, 0).unwrap().len() == 1);
    }

    #[tokio::test]
    async fn refund_may_overdraw_but_usage_stays_rejected() {
        let (mutator, _dir) = mutator();
        let account = AccountId::new(1);
        topup(&mutator, account, dollars(10), "k-top").await;

        let refunded = mutator
            .apply_change(
                account,
                dollars(30).neg(),
                ChangeRequest::new(TransactionKind::Refund).with_description("chargeback"),
                "k-refund",
            )
            .await
            .unwrap();
        assert_eq!(refunded.new_balance, dollars(-20));

        let result = mutator
            .apply_change(
                account,
                dollars(1).neg(),
                ChangeRequest::new(TransactionKind::Usage),
                "k-use",
            )
            .await;
        assert!(matches!(result, Err(LedgerError::InsufficientBalance { .. })));
        assert_eq!(mutator.get_balance(account).unwrap(), dollars(-20));
    }

    #[tokio::test]
    async fn refund_overdraft_suspend_policy() {
        let config = EngineConfig {
            refund_overdraft_policy: RefundOverdraftPolicy::SuspendAccount,
            ..EngineConfig::default()
        };
        let (mutator, _dir) = mutator_with(config);
        let account = AccountId::new(1);
        topup(&mutator, account, dollars(10), "k-top").await;

        mutator
            .apply_change(
                account,
                dollars(30).neg(),
                ChangeRequest::new(TransactionKind::Refund),
                "k-refund",
            )
            .await
            .unwrap();

        let stored = mutator.get_account(account).unwrap().unwrap();
        assert!(stored.is_suspended());

        let result = mutator
            .apply_change(
                account,
                dollars(1).neg(),
                ChangeRequest::new(TransactionKind::Usage),
                "k-use",
            )
            .await;
        assert!(matches!(result, Err(LedgerError::AccountSuspended { .. })));

        // Credits still apply while suspended, keeping the provider
        // history reconcilable.
        let credited = topup(&mutator, account, dollars(5), "k-top-2").await;
        assert_eq!(credited.new_balance, dollars(-15));
    }

    #[tokio::test]
    async fn adjustment_may_go_either_way() {
        let (mutator, _dir) = mutator();
        let account = AccountId::new(1);

        let down = mutator
            .apply_change(
                account,
                dollars(5).neg(),
                ChangeRequest::new(TransactionKind::Adjustment).with_description("manual fix"),
                "k-adj-1",
            )
            .await
            .unwrap();
        assert_eq!(down.new_balance, dollars(-5));

        let up = mutator
            .apply_change(
                account,
                dollars(8),
                ChangeRequest::new(TransactionKind::Adjustment),
                "k-adj-2",
            )
            .await
            .unwrap();
        assert_eq!(up.new_balance, dollars(3));
    }

    #[tokio::test]
    async fn history_replays_to_current_balance() {
        let (mutator, _dir) = mutator();
        let account = AccountId::new(1);

        topup(&mutator, account, dollars(25), "k1").await;
        mutator
            .apply_change(
                account,
                dollars(3).neg(),
                ChangeRequest::new(TransactionKind::Usage),
                "k2",
            )
            .await
            .unwrap();
        mutator
            .apply_change(
                account,
                dollars(10).neg(),
                ChangeRequest::new(TransactionKind::Refund),
                "k3",
            )
            .await
            .unwrap();

        let mut history = mutator.list_transactions(account, 50, 0).unwrap();
        history.reverse(); // creation order

        let replayed = replay_balance(&history).unwrap();
        assert_eq!(replayed, mutator.get_balance(account).unwrap());
        assert_eq!(replayed, dollars(12));

        // Balance-before/after chain is contiguous.
        for pair in history.windows(2) {
            assert_eq!(pair[0].balance_after, pair[1].balance_before);
        }
    }

    #[tokio::test]
    async fn abandoned_reservation_is_reclaimed() {
        let (mutator, _dir) = mutator();
        let account = AccountId::new(1);
        let store = Arc::clone(&mutator.store);

        // Simulate a process that reserved the key and died: the record
        // is in flight with a reservation older than the liveness window.
        let stale = Utc::now() - Duration::from_secs(61);
        let reservation = store
            .reserve(
                "k2",
                stale,
                Duration::from_secs(60),
                Duration::from_secs(7 * 24 * 3600),
            )
            .unwrap();
        assert_eq!(reservation, Reservation::New);

        // A fresh attempt reclaims the key and applies exactly once.
        let outcome = topup(&mutator, account, dollars(25), "k2").await;
        assert!(!outcome.replayed);
        assert_eq!(outcome.new_balance, dollars(25));
        assert_eq!(mutator.list_transactions(account, 10, 0).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn in_flight_reservation_surfaces_key_conflict() {
        let (mutator, _dir) = mutator();
        let account = AccountId::new(1);
        let store = Arc::clone(&mutator.store);

        let reservation = store
            .reserve(
                "k-live",
                Utc::now(),
                Duration::from_secs(60),
                Duration::from_secs(3600),
            )
            .unwrap();
        assert_eq!(reservation, Reservation::New);

        let result = mutator
            .apply_change(
                account,
                dollars(25),
                ChangeRequest::new(TransactionKind::Topup),
                "k-live",
            )
            .await;
        assert!(matches!(result, Err(LedgerError::KeyConflict { .. })));
    }

    #[tokio::test]
    async fn lock_timeout_is_a_clean_noop() {
        let config = EngineConfig {
            lock_wait_timeout: Duration::from_millis(50),
            lock_retry_interval: Duration::from_millis(10),
            ..EngineConfig::default()
        };
        let (mutator, _dir) = mutator_with(config);
        let account = AccountId::new(9);
        let store = Arc::clone(&mutator.store);

        // Another holder owns the account lock.
        let token = Uuid::new_v4();
        assert!(store
            .try_acquire("account:9", token, Duration::from_secs(10), Utc::now())
            .unwrap());

        let result = mutator
            .apply_change(
                account,
                dollars(25),
                ChangeRequest::new(TransactionKind::Topup),
                "k1",
            )
            .await;
        assert!(matches!(result, Err(LedgerError::LockTimeout { .. })));
        assert_eq!(mutator.get_balance(account).unwrap(), Amount::ZERO);

        // The reservation was released, so the retry succeeds once the
        // lock frees up.
        store.release("account:9", token).unwrap();
        let outcome = topup(&mutator, account, dollars(25), "k1").await;
        assert!(!outcome.replayed);
        assert_eq!(outcome.new_balance, dollars(25));
    }

    #[tokio::test]
    async fn provider_transaction_never_credits_twice() {
        let (mutator, _dir) = mutator();
        let account = AccountId::new(1);
        let external = ExternalRef::new("paddle", "txn_9");

        let first = mutator
            .apply_change(
                account,
                dollars(25),
                ChangeRequest::new(TransactionKind::Topup).with_external(external.clone()),
                "key-from-webhook",
            )
            .await
            .unwrap();
        assert!(!first.replayed);

        // Reconciliation replays the same provider transaction under its
        // own derived key.
        let second = mutator
            .apply_change(
                account,
                dollars(25),
                ChangeRequest::new(TransactionKind::Topup).with_external(external),
                "topup:paddle:txn_9",
            )
            .await
            .unwrap();
        assert!(second.replayed);
        assert_eq!(second.transaction_id, first.transaction_id);
        assert_eq!(mutator.get_balance(account).unwrap(), dollars(25));
    }

    #[tokio::test]
    async fn unknown_account_is_created_on_first_credit() {
        let (mutator, _dir) = mutator();
        let account = AccountId::new(404);

        assert_eq!(mutator.get_balance(account).unwrap(), Amount::ZERO);
        assert!(mutator.get_account(account).unwrap().is_none());

        topup(&mutator, account, dollars(5), "k1").await;
        assert!(mutator.get_account(account).unwrap().is_some());
    }
}
