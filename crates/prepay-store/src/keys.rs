//! Key encodings for the column families.
//!
//! Composite keys separate string components with a NUL byte, which cannot
//! occur inside provider names or event ids.

use prepay_core::{AccountId, TransactionId};

/// Create an account key from an account id.
#[must_use]
pub fn account_key(account_id: &AccountId) -> Vec<u8> {
    account_id.to_be_bytes().to_vec()
}

/// Create a transaction key from a transaction id.
#[must_use]
pub fn transaction_key(transaction_id: &TransactionId) -> Vec<u8> {
    transaction_id.to_bytes().to_vec()
}

/// Create an account-transaction index key.
///
/// Format: `account_id (8 bytes) || transaction_id (16 bytes)`.
///
/// ULIDs are time-ordered, so an account's index entries sort by creation
/// time.
#[must_use]
pub fn account_transaction_key(account_id: &AccountId, transaction_id: &TransactionId) -> Vec<u8> {
    let mut key = Vec::with_capacity(24);
    key.extend_from_slice(&account_id.to_be_bytes());
    key.extend_from_slice(&transaction_id.to_bytes());
    key
}

/// Create a prefix for iterating all transactions of one account.
#[must_use]
pub fn account_transactions_prefix(account_id: &AccountId) -> Vec<u8> {
    account_id.to_be_bytes().to_vec()
}

/// Extract the transaction id from an account-transaction index key.
///
/// # Panics
///
/// Panics if the key is not at least 24 bytes.
#[must_use]
pub fn extract_transaction_id(key: &[u8]) -> TransactionId {
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&key[8..24]);
    TransactionId::from_bytes(bytes).expect("valid ULID bytes")
}

/// Create an external-transaction index key: `provider \0 external_txn_id`.
#[must_use]
pub fn external_txn_key(provider: &str, external_txn_id: &str) -> Vec<u8> {
    composite(provider, external_txn_id)
}

/// Create an idempotency record key.
#[must_use]
pub fn idempotency_key(key: &str) -> Vec<u8> {
    key.as_bytes().to_vec()
}

/// Create a lock record key.
#[must_use]
pub fn lock_key(resource: &str) -> Vec<u8> {
    resource.as_bytes().to_vec()
}

/// Create a webhook receipt key: `provider \0 event_id`.
#[must_use]
pub fn receipt_key(provider: &str, event_id: &str) -> Vec<u8> {
    composite(provider, event_id)
}

/// Create a rate-window key from a scope name.
#[must_use]
pub fn rate_key(scope: &str) -> Vec<u8> {
    scope.as_bytes().to_vec()
}

/// Create a pending-payment key from a session payload.
#[must_use]
pub fn pending_key(payload: &str) -> Vec<u8> {
    payload.as_bytes().to_vec()
}

fn composite(left: &str, right: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(left.len() + 1 + right.len());
    key.extend_from_slice(left.as_bytes());
    key.push(0);
    key.extend_from_slice(right.as_bytes());
    key
}
