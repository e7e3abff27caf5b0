//! Account types for the prepay ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AccountId, Amount};

/// A prepaid balance account.
///
/// Exactly one account exists per external identity. The balance field is
/// mutated exclusively through the balance mutator; no other component
/// writes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// The stable external identity this account belongs to.
    pub id: AccountId,

    /// Current balance. Non-negative by policy, except during the grace
    /// window after a refund clawback.
    pub balance: Amount,

    /// Lifecycle status. Accounts are never hard-deleted while
    /// transactions reference them.
    pub status: AccountStatus,

    /// When the account was created.
    pub created_at: DateTime<Utc>,

    /// When the account was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Create a new active account with zero balance.
    #[must_use]
    pub fn new(id: AccountId) -> Self {
        let now = Utc::now();
        Self {
            id,
            balance: Amount::ZERO,
            status: AccountStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check whether the balance covers a deduction of `required`.
    #[must_use]
    pub fn has_sufficient_balance(&self, required: Amount) -> bool {
        self.balance >= required
    }

    /// Whether the account is soft-suspended.
    #[must_use]
    pub fn is_suspended(&self) -> bool {
        self.status == AccountStatus::Suspended
    }

    /// Soft-suspend the account.
    pub fn suspend(&mut self) {
        self.status = AccountStatus::Suspended;
        self.updated_at = Utc::now();
    }

    /// Reinstate a suspended account.
    pub fn reinstate(&mut self) {
        self.status = AccountStatus::Active;
        self.updated_at = Utc::now();
    }
}

/// Lifecycle status of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    /// The account can be charged normally.
    Active,

    /// Soft-suspended: usage charges are rejected, credits still apply.
    Suspended,
}
