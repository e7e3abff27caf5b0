//! RocksDB storage layer for the prepay ledger.
//!
//! Persistence is split into per-entity repository traits so the engine
//! never depends on key-namespacing conventions or on RocksDB itself:
//!
//! - [`AccountStore`] / [`TransactionStore`]: ledger state
//! - [`LedgerWrite`]: the single atomic commit combining balance write,
//!   history append, indexes, and idempotency resolution
//! - [`IdempotencyStore`]: at-most-once reservations
//! - [`LockStore`]: per-account advisory locks with fencing tokens
//! - [`ReceiptStore`]: provider event deduplication
//! - [`RateStore`]: sliding-window admission counters
//! - [`PendingPaymentStore`]: in-chat payment sessions
//!
//! [`RocksStore`] implements all of them over column families with CBOR
//! values. Check-and-set operations (`reserve`, `try_acquire`,
//! `check_and_incr`) are serialized through striped in-process mutexes so
//! that two concurrent callers can never both observe the pre-write state.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod keys;
pub mod records;
pub mod rocks;
pub mod schema;

pub use error::{Result, StoreError};
pub use records::{
    IdempotencyRecord, IdempotencyState, LockRecord, PendingPayment, RateDecision, RateWindow,
    ReceiptOutcome, ReleaseOutcome, Reservation, StoredResult, WebhookReceipt,
};
pub use rocks::RocksStore;

use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use prepay_core::{Account, AccountId, ExternalRef, LedgerTransaction, TransactionId};

/// Account records.
pub trait AccountStore: Send + Sync {
    /// Get an account by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>>;

    /// Insert or update an account record.
    ///
    /// Only account metadata flows through this path; balance changes go
    /// through [`LedgerWrite::commit_change`].
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_account(&self, account: &Account) -> Result<()>;
}

/// Ledger transaction records and their indexes.
pub trait TransactionStore: Send + Sync {
    /// Get a transaction by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_transaction(&self, transaction_id: &TransactionId)
        -> Result<Option<LedgerTransaction>>;

    /// List transactions for an account, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_transactions(
        &self,
        account_id: &AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerTransaction>>;

    /// Look up the ledger transaction recorded for a provider transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn find_external(&self, external: &ExternalRef) -> Result<Option<TransactionId>>;

    /// List top-up transactions created within a time window, for
    /// reconciliation against the provider's transaction list.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn list_topups_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<LedgerTransaction>>;
}

/// The single atomic ledger mutation.
pub trait LedgerWrite: Send + Sync {
    /// Persist one balance change as a unit: the updated account, the
    /// appended transaction, its indexes (including the external-txn
    /// index when the transaction carries a provider reference), and the
    /// resolved idempotency record. Either all of them are written or
    /// none.
    ///
    /// The caller must hold the account's advisory lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails; no partial state
    /// is left behind.
    fn commit_change(
        &self,
        account: &Account,
        transaction: &LedgerTransaction,
        idempotency: (&str, &IdempotencyRecord),
    ) -> Result<()>;
}

/// At-most-once reservations keyed by idempotency key.
pub trait IdempotencyStore: Send + Sync {
    /// Atomically reserve a key. Exactly one of any number of concurrent
    /// callers observes [`Reservation::New`]; the rest observe
    /// [`Reservation::InFlight`] or, once resolved,
    /// [`Reservation::Resolved`] with the stored result.
    ///
    /// In-flight reservations older than `liveness` are abandoned and may
    /// be reclaimed by a new caller. Records past retention are treated
    /// as absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn reserve(
        &self,
        key: &str,
        now: DateTime<Utc>,
        liveness: Duration,
        retention: Duration,
    ) -> Result<Reservation>;

    /// Store the terminal result for a key (success or typed denial),
    /// retained for `retention`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn resolve(
        &self,
        key: &str,
        result: &StoredResult,
        now: DateTime<Utc>,
        retention: Duration,
    ) -> Result<()>;

    /// Drop an in-flight reservation whose operation failed before any
    /// side effect, so a retry does not have to wait out the liveness
    /// window.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn abandon(&self, key: &str) -> Result<()>;
}

/// Advisory locks with fencing tokens.
pub trait LockStore: Send + Sync {
    /// Set-if-absent acquisition with expiry. Returns `true` if the lock
    /// was taken by `token`. An expired record counts as absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn try_acquire(
        &self,
        resource: &str,
        token: Uuid,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Release a lock, verifying `token` still owns it. A stale token can
    /// never release a lock taken by a newer acquisition.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn release(&self, resource: &str, token: Uuid) -> Result<ReleaseOutcome>;
}

/// Provider event receipts.
pub trait ReceiptStore: Send + Sync {
    /// Look up the receipt for a provider event, if any unexpired one
    /// exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_receipt(
        &self,
        provider: &str,
        event_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<WebhookReceipt>>;

    /// Record the processing outcome for a provider event.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_receipt(&self, receipt: &WebhookReceipt) -> Result<()>;
}

/// Sliding-window admission counters.
pub trait RateStore: Send + Sync {
    /// Atomically count the current window and, if below `limit`, record
    /// this admission. Two concurrent callers can never both slip under
    /// the limit.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn check_and_incr(
        &self,
        scope: &str,
        limit: u32,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<RateDecision>;
}

/// Pending in-chat payment sessions.
pub trait PendingPaymentStore: Send + Sync {
    /// Store a pending session under its payload key.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn put_pending(&self, payload: &str, pending: &PendingPayment) -> Result<()>;

    /// Get an unexpired pending session.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn get_pending(&self, payload: &str, now: DateTime<Utc>) -> Result<Option<PendingPayment>>;

    /// Remove a pending session after confirmation.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    fn remove_pending(&self, payload: &str) -> Result<()>;
}

/// Everything the engine needs from a storage backend.
pub trait EngineStore:
    AccountStore
    + TransactionStore
    + LedgerWrite
    + IdempotencyStore
    + LockStore
    + ReceiptStore
    + RateStore
    + PendingPaymentStore
{
}

impl<T> EngineStore for T where
    T: AccountStore
        + TransactionStore
        + LedgerWrite
        + IdempotencyStore
        + LockStore
        + ReceiptStore
        + RateStore
        + PendingPaymentStore
{
}
