//! Column family layout.

/// Column family names.
pub mod cf {
    /// Account records, keyed by big-endian account id.
    pub const ACCOUNTS: &str = "accounts";

    /// Ledger transactions, keyed by transaction id (ULID bytes).
    pub const TRANSACTIONS: &str = "transactions";

    /// Per-account transaction index: `account_id || transaction_id`.
    pub const TRANSACTIONS_BY_ACCOUNT: &str = "transactions_by_account";

    /// Provider transaction id → ledger transaction id, keyed by
    /// `provider \0 external_txn_id`.
    pub const EXTERNAL_TXNS: &str = "external_txns";

    /// Idempotency records, keyed by idempotency key.
    pub const IDEMPOTENCY: &str = "idempotency";

    /// Advisory lock records, keyed by resource name.
    pub const LOCKS: &str = "locks";

    /// Webhook receipts, keyed by `provider \0 event_id`.
    pub const WEBHOOK_RECEIPTS: &str = "webhook_receipts";

    /// Sliding-window rate counters, keyed by scope.
    pub const RATE_WINDOWS: &str = "rate_windows";

    /// Pending in-chat payment sessions, keyed by session payload.
    pub const PENDING_PAYMENTS: &str = "pending_payments";
}

/// All column families that must exist in the database.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![
        cf::ACCOUNTS,
        cf::TRANSACTIONS,
        cf::TRANSACTIONS_BY_ACCOUNT,
        cf::EXTERNAL_TXNS,
        cf::IDEMPOTENCY,
        cf::LOCKS,
        cf::WEBHOOK_RECEIPTS,
        cf::RATE_WINDOWS,
        cf::PENDING_PAYMENTS,
    ]
}
