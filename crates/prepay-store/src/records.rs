//! Transient infrastructure records.
//!
//! These records belong to the engine, not to any account: idempotency
//! reservations, advisory locks, webhook receipts, rate windows, and
//! pending payment sessions. All carry explicit expirations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use prepay_core::{AccountId, Amount, TransactionId};

/// Terminal result stored under an idempotency key.
///
/// Replays return this verbatim so every caller sharing the key observes
/// the identical outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoredResult {
    /// The change was applied.
    Applied {
        /// Balance after the change.
        new_balance: Amount,
        /// The appended ledger transaction.
        transaction_id: TransactionId,
    },

    /// The change was denied for insufficient balance.
    InsufficientBalance {
        /// Balance at the time of the attempt.
        balance: Amount,
        /// Amount the charge required.
        required: Amount,
    },
}

/// State of an idempotency record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdempotencyState {
    /// Reserved by a mutation attempt that has not yet resolved.
    InFlight {
        /// When the reservation was taken. Reservations older than the
        /// liveness timeout are considered abandoned and reclaimable.
        reserved_at: DateTime<Utc>,
    },

    /// Resolved with a terminal result.
    Resolved {
        /// The stored result.
        result: StoredResult,
    },
}

/// An idempotency record: one logical operation, applied at most once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    /// Current state.
    pub state: IdempotencyState,

    /// When the record falls out of retention. Must outlive the provider's
    /// maximum plausible redelivery window.
    pub expires_at: DateTime<Utc>,
}

/// Outcome of an idempotency reservation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reservation {
    /// This caller holds the reservation; exactly one concurrent caller
    /// per key observes this.
    New,

    /// Another caller holds a live reservation.
    InFlight,

    /// The operation already resolved; the stored result must be replayed
    /// without reapplying side effects.
    Resolved(StoredResult),
}

/// An advisory lock record with fencing token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRecord {
    /// Token proving ownership; checked again at release.
    pub token: Uuid,

    /// Auto-expiry preventing deadlock if the holder crashes.
    pub expires_at: DateTime<Utc>,
}

/// Outcome of a lock release attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The lock was held by this token and is now released.
    Released,

    /// The lock is absent or held by a different token; nothing was
    /// released.
    NotOwner,
}

/// Processing outcome recorded for a provider event delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiptOutcome {
    /// The event produced a ledger transaction.
    Applied {
        /// The appended ledger transaction.
        transaction_id: TransactionId,
        /// Balance after the change.
        new_balance: Amount,
    },

    /// The event was definitively denied.
    Denied {
        /// Stable reason code.
        reason: String,
    },

    /// The event type is not one the ledger acts on.
    Ignored,
}

/// Receipt deduplicating provider event deliveries, independent of the
/// application-level idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookReceipt {
    /// Provider name.
    pub provider: String,

    /// The provider's event id.
    pub event_id: String,

    /// How the delivery was processed.
    pub outcome: ReceiptOutcome,

    /// When the receipt was written.
    pub recorded_at: DateTime<Utc>,

    /// When the receipt falls out of retention.
    pub expires_at: DateTime<Utc>,
}

/// Per-scope sliding-window counter state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateWindow {
    /// One-second buckets: `(epoch_second, count)`, oldest first. Buckets
    /// older than the window are pruned on every check.
    pub buckets: Vec<(i64, u32)>,
}

/// Decision returned by a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    /// Whether the request is admitted.
    pub allowed: bool,

    /// Admissions left in the current window.
    pub remaining: u32,

    /// How long to wait before retrying, when not admitted.
    pub retry_after_secs: u64,
}

/// A pending in-chat payment session awaiting confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingPayment {
    /// The account that initiated the payment.
    pub account_id: AccountId,

    /// The amount the session was created for.
    pub amount: Amount,

    /// When the session was created.
    pub created_at: DateTime<Utc>,

    /// When the session expires; confirmation attempts past this point
    /// are treated as session-less.
    pub expires_at: DateTime<Utc>,
}
