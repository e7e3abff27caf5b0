//! Ledger query and mutation handlers.
//!
//! These three operations are the only legal way to read or write ledger
//! state from outside the engine: `GetBalance`, `ListTransactions`, and
//! `ApplyChange`.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use prepay_core::{AccountId, Amount, ExternalRef, LedgerTransaction, TransactionKind};
use prepay_engine::{with_retry, ChangeRequest};

use crate::auth::ServiceAuth;
use crate::error::ApiError;
use crate::state::AppState;

/// Default page size for transaction listings.
const DEFAULT_PAGE_SIZE: usize = 50;

/// Maximum page size for transaction listings.
const MAX_PAGE_SIZE: usize = 200;

/// Balance response.
#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    /// The account.
    pub account_id: AccountId,
    /// Current balance.
    pub balance: Amount,
}

/// Get an account's current balance. Unknown identities report zero.
pub async fn get_balance(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(account_id): Path<i64>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let account_id = AccountId::new(account_id);
    let balance = state.mutator.get_balance(account_id)?;
    Ok(Json(BalanceResponse {
        account_id,
        balance,
    }))
}

/// Pagination parameters.
#[derive(Debug, Deserialize)]
pub struct Pagination {
    /// Page size (default 50, max 200).
    pub limit: Option<usize>,
    /// Entries to skip.
    pub offset: Option<usize>,
}

/// One ledger entry on the wire.
#[derive(Debug, Serialize)]
pub struct TransactionView {
    /// Transaction id.
    pub id: String,
    /// Kind of change.
    pub kind: TransactionKind,
    /// Signed amount.
    pub amount: Amount,
    /// Balance before the change.
    pub balance_before: Amount,
    /// Balance after the change.
    pub balance_after: Amount,
    /// Description.
    pub description: String,
    /// Originating provider transaction id, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_txn_id: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl From<LedgerTransaction> for TransactionView {
    fn from(tx: LedgerTransaction) -> Self {
        Self {
            id: tx.id.to_string(),
            kind: tx.kind,
            amount: tx.amount,
            balance_before: tx.balance_before,
            balance_after: tx.balance_after,
            description: tx.description,
            external_txn_id: tx.external.map(|e| e.txn_id),
            created_at: tx.created_at,
        }
    }
}

/// Transaction listing response.
#[derive(Debug, Serialize)]
pub struct TransactionsResponse {
    /// Transactions, newest first.
    pub transactions: Vec<TransactionView>,
    /// Page size used.
    pub limit: usize,
    /// Offset used.
    pub offset: usize,
}

/// List an account's transactions, newest first.
pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Path(account_id): Path<i64>,
    Query(pagination): Query<Pagination>,
) -> Result<Json<TransactionsResponse>, ApiError> {
    let account_id = AccountId::new(account_id);
    let limit = pagination.limit.unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE);
    let offset = pagination.offset.unwrap_or(0);

    let transactions = state
        .mutator
        .list_transactions(account_id, limit, offset)?
        .into_iter()
        .map(TransactionView::from)
        .collect();

    Ok(Json(TransactionsResponse {
        transactions,
        limit,
        offset,
    }))
}

/// Apply-change request.
#[derive(Debug, Deserialize)]
pub struct ApplyRequest {
    /// The account to mutate.
    pub account_id: AccountId,
    /// Signed amount; positive credits, negative debits.
    pub amount: Amount,
    /// Kind of change.
    pub kind: TransactionKind,
    /// Idempotency key; the same key always yields the same result.
    pub idempotency_key: String,
    /// Description for the ledger entry.
    #[serde(default)]
    pub description: String,
    /// Originating provider transaction, if any.
    #[serde(default)]
    pub external: Option<ExternalRefBody>,
}

/// External reference on the wire.
#[derive(Debug, Deserialize)]
pub struct ExternalRefBody {
    /// Provider name.
    pub provider: String,
    /// Provider transaction id.
    pub txn_id: String,
}

/// Apply-change response.
#[derive(Debug, Serialize)]
pub struct ApplyResponse {
    /// Balance after the change.
    pub new_balance: Amount,
    /// The ledger transaction recording the change.
    pub transaction_id: String,
    /// Whether a previously stored result was replayed.
    pub replayed: bool,
}

/// Apply a signed balance change, exactly once per idempotency key.
pub async fn apply_change(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Json(body): Json<ApplyRequest>,
) -> Result<Json<ApplyResponse>, ApiError> {
    if body.idempotency_key.is_empty() {
        return Err(ApiError::BadRequest("idempotency_key must not be empty".into()));
    }

    let mut request = ChangeRequest::new(body.kind).with_description(body.description.clone());
    if let Some(external) = &body.external {
        request = request.with_external(ExternalRef::new(
            external.provider.clone(),
            external.txn_id.clone(),
        ));
    }

    let retry = state.mutator.config().retry.clone();
    let outcome = with_retry(&retry, "apply_change", || {
        state
            .mutator
            .apply_change(body.account_id, body.amount, request.clone(), &body.idempotency_key)
    })
    .await?;

    tracing::info!(
        account_id = %body.account_id,
        kind = %body.kind,
        amount = %body.amount,
        new_balance = %outcome.new_balance,
        replayed = %outcome.replayed,
        "change applied"
    );

    Ok(Json(ApplyResponse {
        new_balance: outcome.new_balance,
        transaction_id: outcome.transaction_id.to_string(),
        replayed: outcome.replayed,
    }))
}
