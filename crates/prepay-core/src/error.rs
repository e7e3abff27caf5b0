//! Error types for ledger operations.

use crate::ids::IdError;
use crate::{AccountId, Amount, AmountError};

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Errors that can occur applying ledger operations.
///
/// Variants are either *terminal* (retrying the same operation cannot
/// succeed) or *transient* (the caller should retry with backoff); see
/// [`LedgerError::is_transient`]. Duplicate deliveries are not errors:
/// they replay the stored result of the first application.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// A usage charge would drive the balance negative. Terminal.
    #[error("insufficient balance: balance={balance}, required={required}")]
    InsufficientBalance {
        /// Current balance.
        balance: Amount,
        /// Amount the charge required.
        required: Amount,
    },

    /// The account is soft-suspended and rejects usage charges. Terminal.
    #[error("account suspended: {account_id}")]
    AccountSuspended {
        /// The suspended account.
        account_id: AccountId,
    },

    /// Another caller holds an in-flight reservation for this idempotency
    /// key. Transient: poll or retry shortly; the other caller's result
    /// will be replayed.
    #[error("idempotency key in flight: {key}")]
    KeyConflict {
        /// The contended key.
        key: String,
    },

    /// The per-account lock is held by another operation. Transient.
    #[error("account lock busy: {resource}")]
    LockBusy {
        /// The contended resource.
        resource: String,
    },

    /// Lock acquisition did not succeed within the wait timeout. Transient;
    /// no partial state was applied.
    #[error("timed out waiting for account lock: {resource}")]
    LockTimeout {
        /// The contended resource.
        resource: String,
    },

    /// Webhook signature did not verify. Terminal, no side effects.
    #[error("invalid webhook signature")]
    InvalidSignature,

    /// Webhook timestamp is outside the allowed skew. Terminal.
    #[error("stale webhook: timestamp {age_secs}s outside allowed skew")]
    StaleWebhook {
        /// Absolute distance between the event timestamp and now.
        age_secs: i64,
    },

    /// The backing store failed. Transient infrastructure failure;
    /// surfaced as a 5xx so the sender retries.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// A monetary value was malformed or out of range. Terminal.
    #[error(transparent)]
    InvalidAmount(#[from] AmountError),

    /// An identifier was malformed. Terminal.
    #[error(transparent)]
    InvalidId(#[from] IdError),
}

impl LedgerError {
    /// Whether the caller should retry this operation with backoff.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::KeyConflict { .. }
                | Self::LockBusy { .. }
                | Self::LockTimeout { .. }
                | Self::StoreUnavailable(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(LedgerError::KeyConflict { key: "k".into() }.is_transient());
        assert!(LedgerError::LockBusy { resource: "a".into() }.is_transient());
        assert!(LedgerError::LockTimeout { resource: "a".into() }.is_transient());
        assert!(LedgerError::StoreUnavailable("io".into()).is_transient());

        assert!(!LedgerError::InvalidSignature.is_transient());
        assert!(!LedgerError::StaleWebhook { age_secs: 400 }.is_transient());
        assert!(!LedgerError::InsufficientBalance {
            balance: Amount::ZERO,
            required: Amount::from_micros(1),
        }
        .is_transient());
    }
}
