//! Ledger transaction types.
//!
//! Every balance change appends an immutable transaction record carrying
//! the balance before and after the change. Corrections are new
//! transactions (a refund is a negative entry referencing the original),
//! never edits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AccountId, Amount, AmountError, TransactionId};

/// Reference to the provider transaction a ledger change originated from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExternalRef {
    /// Provider name (e.g. `"paddle"`, `"stars"`).
    pub provider: String,

    /// The provider's transaction id.
    pub txn_id: String,
}

impl ExternalRef {
    /// Create a reference to a provider transaction.
    #[must_use]
    pub fn new(provider: impl Into<String>, txn_id: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            txn_id: txn_id.into(),
        }
    }
}

/// An immutable ledger entry recording one balance change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerTransaction {
    /// Unique transaction id (ULID, time-ordered).
    pub id: TransactionId,

    /// The account whose balance changed.
    pub account_id: AccountId,

    /// Signed amount. Positive credits, negative debits.
    pub amount: Amount,

    /// What kind of change this was.
    pub kind: TransactionKind,

    /// Originating provider transaction, when the change came from an
    /// external payment event.
    pub external: Option<ExternalRef>,

    /// The idempotency key under which this change was applied. Unique.
    pub idempotency_key: String,

    /// Balance immediately before this transaction.
    pub balance_before: Amount,

    /// Balance immediately after this transaction.
    pub balance_after: Amount,

    /// Human-readable description.
    pub description: String,

    /// When the transaction was created.
    pub created_at: DateTime<Utc>,
}

impl LedgerTransaction {
    /// Create a new ledger entry.
    #[must_use]
    pub fn new(
        account_id: AccountId,
        kind: TransactionKind,
        amount: Amount,
        balance_before: Amount,
        balance_after: Amount,
        idempotency_key: String,
    ) -> Self {
        Self {
            id: TransactionId::generate(),
            account_id,
            amount,
            kind,
            external: None,
            idempotency_key,
            balance_before,
            balance_after,
            description: String::new(),
            created_at: Utc::now(),
        }
    }

    /// Attach the originating provider transaction.
    #[must_use]
    pub fn with_external(mut self, external: ExternalRef) -> Self {
        self.external = Some(external);
        self
    }

    /// Attach a human-readable description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Kind of ledger transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Funds added from a completed payment.
    Topup,

    /// Funds deducted for metered usage.
    Usage,

    /// Clawback of a refunded payment (negative entry).
    Refund,

    /// Manual correction, signed either way.
    Adjustment,
}

impl TransactionKind {
    /// Whether a debit of this kind may drive the balance negative.
    ///
    /// Usage charges never overdraw. Refund clawbacks and manual
    /// adjustments may leave a temporary negative float.
    #[must_use]
    pub const fn allows_overdraft(&self) -> bool {
        matches!(self, Self::Refund | Self::Adjustment)
    }

    /// Stable string name, as used on the wire and in audit events.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Topup => "topup",
            Self::Usage => "usage",
            Self::Refund => "refund",
            Self::Adjustment => "adjustment",
        }
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fold a transaction history into the balance it produces.
///
/// Applying each signed amount in creation order over a zero starting
/// balance must reproduce the account's current balance exactly; this is
/// the replayability invariant the engine's tests assert.
///
/// # Errors
///
/// Returns [`AmountError::Overflow`] if the running sum leaves the
/// representable range.
pub fn replay_balance<'a, I>(history: I) -> Result<Amount, AmountError>
where
    I: IntoIterator<Item = &'a LedgerTransaction>,
{
    let mut balance = Amount::ZERO;
    for tx in history {
        balance = balance.checked_add(tx.amount)?;
    }
    Ok(balance)
}
