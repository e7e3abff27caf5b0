//! In-chat payment confirmation.
//!
//! The chat collaborator creates a pending session when it issues an
//! invoice, asks for pre-confirmation before the provider moves funds,
//! and confirms afterwards with the provider-issued charge id. The charge
//! id anchors idempotency: however many times the confirmation is
//! delivered, the account is credited once.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use prepay_core::{AccountId, Amount, ExternalRef, TransactionKind};
use prepay_engine::ratelimit::payment_scope;
use prepay_engine::recon::topup_idempotency_key;
use prepay_engine::{with_retry, ChangeRequest};
use prepay_store::{PendingPayment, PendingPaymentStore};

use crate::auth::ServiceAuth;
use crate::error::ApiError;
use crate::state::AppState;

/// Provider name for the in-chat payment channel.
const PROVIDER: &str = "stars";

/// Session creation request.
#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    /// The account initiating the payment.
    pub account_id: AccountId,
    /// Amount the invoice is for.
    pub amount: Amount,
}

/// Session creation response.
#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    /// Opaque payload identifying the session; embedded in the invoice.
    pub payload: String,
    /// When the session stops being confirmable.
    pub expires_at: DateTime<Utc>,
}

/// Create a pending payment session for an invoice.
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Json(body): Json<CreateSessionRequest>,
) -> Result<Json<CreateSessionResponse>, ApiError> {
    if !body.amount.is_positive() {
        return Err(ApiError::BadRequest("amount must be positive".into()));
    }

    let decision = state.limiter.check(
        &payment_scope(body.account_id),
        state.config.payment_rate_limit,
        state.config.rate_window,
    )?;
    if !decision.allowed {
        return Err(ApiError::TooManyRequests {
            retry_after_secs: decision.retry_after_secs,
        });
    }

    let now = Utc::now();
    let payload = format!("topup:{}", Uuid::new_v4());
    let pending = PendingPayment {
        account_id: body.account_id,
        amount: body.amount,
        created_at: now,
        expires_at: now + state.mutator.config().pending_payment_ttl,
    };
    state.store.put_pending(&payload, &pending)?;

    tracing::info!(
        account_id = %body.account_id,
        amount = %body.amount,
        payload = %payload,
        "payment session created"
    );

    Ok(Json(CreateSessionResponse {
        payload,
        expires_at: pending.expires_at,
    }))
}

/// Pre-confirmation request.
#[derive(Debug, Deserialize)]
pub struct PreCheckoutRequest {
    /// Session payload from the invoice.
    pub payload: String,
    /// The account attempting to pay.
    pub account_id: AccountId,
}

/// Pre-confirmation response. Rejections happen before funds move.
#[derive(Debug, Serialize)]
pub struct PreCheckoutResponse {
    /// Whether the payment may proceed.
    pub ok: bool,
    /// Stable reason code when it may not.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
}

/// Validate a payment before the provider moves funds.
pub async fn precheckout(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Json(body): Json<PreCheckoutRequest>,
) -> Result<Json<PreCheckoutResponse>, ApiError> {
    let pending = state.store.get_pending(&body.payload, Utc::now())?;

    let Some(pending) = pending else {
        return Ok(Json(PreCheckoutResponse {
            ok: false,
            reason: Some("session_expired"),
        }));
    };

    if pending.account_id != body.account_id {
        tracing::warn!(
            expected = %pending.account_id,
            got = %body.account_id,
            "pre-checkout account mismatch"
        );
        return Ok(Json(PreCheckoutResponse {
            ok: false,
            reason: Some("account_mismatch"),
        }));
    }

    Ok(Json(PreCheckoutResponse {
        ok: true,
        reason: None,
    }))
}

/// Confirmation request, sent after the provider moved funds.
#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    /// Session payload from the invoice.
    pub payload: String,
    /// Provider-issued charge id: the idempotency anchor.
    pub charge_id: String,
    /// The account that paid.
    pub account_id: AccountId,
    /// Paid amount; required when the session already expired.
    #[serde(default)]
    pub amount: Option<Amount>,
}

/// Confirmation response.
#[derive(Debug, Serialize)]
pub struct ConfirmResponse {
    /// Balance after the credit.
    pub new_balance: Amount,
    /// The ledger transaction recording the top-up.
    pub transaction_id: String,
    /// Whether this confirmation was a redelivery.
    pub replayed: bool,
}

/// Credit a confirmed in-chat payment.
pub async fn confirm(
    State(state): State<Arc<AppState>>,
    _auth: ServiceAuth,
    Json(body): Json<ConfirmRequest>,
) -> Result<Json<ConfirmResponse>, ApiError> {
    if body.charge_id.is_empty() {
        return Err(ApiError::BadRequest("charge_id must not be empty".into()));
    }

    let now = Utc::now();
    let pending = state.store.get_pending(&body.payload, now)?;

    // Funds have already moved at the provider; an expired session cannot
    // reject the credit, it only loses the recorded amount.
    let amount = match &pending {
        Some(pending) => {
            if pending.account_id != body.account_id {
                tracing::warn!(
                    expected = %pending.account_id,
                    got = %body.account_id,
                    charge_id = %body.charge_id,
                    "confirmation account mismatch, using session account"
                );
            }
            pending.amount
        }
        None => {
            tracing::warn!(
                payload = %body.payload,
                charge_id = %body.charge_id,
                "confirming without a live session, using request amount"
            );
            body.amount
                .ok_or_else(|| ApiError::BadRequest("amount required when session expired".into()))?
        }
    };
    let account_id = pending.as_ref().map_or(body.account_id, |p| p.account_id);

    if !amount.is_positive() {
        return Err(ApiError::BadRequest("amount must be positive".into()));
    }

    let request = ChangeRequest::new(TransactionKind::Topup)
        .with_description(format!("in-chat payment {}", body.charge_id))
        .with_external(ExternalRef::new(PROVIDER, body.charge_id.clone()));
    let key = topup_idempotency_key(PROVIDER, &body.charge_id);

    let retry = state.mutator.config().retry.clone();
    let outcome = with_retry(&retry, "confirm_payment", || {
        state
            .mutator
            .apply_change(account_id, amount, request.clone(), &key)
    })
    .await?;

    if pending.is_some() {
        state.store.remove_pending(&body.payload)?;
    }

    tracing::info!(
        account_id = %account_id,
        charge_id = %body.charge_id,
        new_balance = %outcome.new_balance,
        replayed = %outcome.replayed,
        "in-chat payment confirmed"
    );

    Ok(Json(ConfirmResponse {
        new_balance: outcome.new_balance,
        transaction_id: outcome.transaction_id.to_string(),
        replayed: outcome.replayed,
    }))
}
