//! Provider webhook ingestion.
//!
//! Deliveries pass through admission control, signature and freshness
//! verification, receipt deduplication, and only then reach the ledger.
//! The receipt is written after the ledger call resolves, never before,
//! so a crash between verification and application simply results in a
//! safe retry on redelivery. Duplicates answer `200` - a provider must
//! never be driven to retry an event that already settled.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use prepay_core::{AccountId, Amount, ExternalRef, LedgerError, TransactionKind};
use prepay_engine::ratelimit::webhook_scope;
use prepay_engine::recon::topup_idempotency_key;
use prepay_engine::{with_retry, ChangeRequest};
use prepay_store::{ReceiptOutcome, ReceiptStore, WebhookReceipt};

use crate::error::ApiError;
use crate::state::AppState;

/// Provider name for the card-payment webhook channel.
const PROVIDER: &str = "paddle";

/// Webhook payload.
#[derive(Debug, Deserialize)]
pub struct PaddleWebhook {
    /// Event type.
    pub event_type: String,
    /// The provider's event id (distinct from the transaction id).
    pub event_id: String,
    /// Event data.
    pub data: PaddleEventData,
}

/// Webhook event data.
#[derive(Debug, Deserialize)]
pub struct PaddleEventData {
    /// The provider's transaction id.
    pub id: String,
    /// Settled amount as a decimal string.
    pub amount: Amount,
    /// Application-supplied metadata, echoed back by the provider.
    /// Trusted only because the signature already verified.
    pub metadata: PaddleMetadata,
}

/// Application metadata embedded at checkout time.
#[derive(Debug, Deserialize)]
pub struct PaddleMetadata {
    /// The account the payment belongs to.
    pub account_id: AccountId,
    /// Application-level idempotency key, if one was attached.
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// Webhook response.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// How the delivery was handled: `processed`, `duplicate`, `ignored`,
    /// or `denied`.
    pub status: &'static str,
    /// The ledger transaction, when one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
}

/// Handle provider webhooks.
pub async fn paddle_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<WebhookResponse>, ApiError> {
    let now = Utc::now();

    // Admission control happens before anything touches the ledger.
    let decision = state.limiter.check(
        &webhook_scope(PROVIDER),
        state.config.webhook_rate_limit,
        state.config.rate_window,
    )?;
    if !decision.allowed {
        return Err(ApiError::TooManyRequests {
            retry_after_secs: decision.retry_after_secs,
        });
    }

    // Unverified financial events are never admitted.
    let Some(verifier) = &state.verifier else {
        return Err(ApiError::Unavailable("webhook verification not configured".into()));
    };

    let signature = headers
        .get("paddle-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;

    if let Err(e) = verifier.verify(signature, &body, now) {
        tracing::warn!(error = %e, "webhook verification failed");
        return Err(e.into());
    }

    let webhook: PaddleWebhook =
        serde_json::from_str(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    tracing::info!(
        event_type = %webhook.event_type,
        event_id = %webhook.event_id,
        txn_id = %webhook.data.id,
        "webhook received"
    );

    // Short-circuit redeliveries to the stored outcome; the ledger is
    // never touched twice for one provider event.
    if let Some(receipt) = state.store.get_receipt(PROVIDER, &webhook.event_id, now)? {
        tracing::info!(event_id = %webhook.event_id, "duplicate delivery, replaying receipt");
        return Ok(Json(replay_receipt(&receipt)));
    }

    let (kind, amount, idempotency_key, external) = match webhook.event_type.as_str() {
        "transaction.completed" => {
            let key = webhook
                .data
                .metadata
                .idempotency_key
                .clone()
                .unwrap_or_else(|| topup_idempotency_key(PROVIDER, &webhook.data.id));
            (
                TransactionKind::Topup,
                webhook.data.amount.abs(),
                key,
                ExternalRef::new(PROVIDER, webhook.data.id.clone()),
            )
        }
        "transaction.refunded" => (
            TransactionKind::Refund,
            webhook.data.amount.abs().neg(),
            format!("refund:{PROVIDER}:{}", webhook.data.id),
            // Distinct index entry so the clawback never shadows the
            // original top-up's provider reference.
            ExternalRef::new(PROVIDER, format!("refund:{}", webhook.data.id)),
        ),
        other => {
            tracing::debug!(event_type = %other, "event type not handled by the ledger");
            write_receipt(&state, &webhook.event_id, ReceiptOutcome::Ignored, now)?;
            return Ok(Json(WebhookResponse {
                status: "ignored",
                transaction_id: None,
            }));
        }
    };

    let account_id = webhook.data.metadata.account_id;
    let request = ChangeRequest::new(kind)
        .with_description(format!("{PROVIDER} {}", webhook.event_type))
        .with_external(external);

    let retry = state.mutator.config().retry.clone();
    let applied = with_retry(&retry, "webhook_apply", || {
        state
            .mutator
            .apply_change(account_id, amount, request.clone(), &idempotency_key)
    })
    .await;

    match applied {
        Ok(outcome) => {
            write_receipt(
                &state,
                &webhook.event_id,
                ReceiptOutcome::Applied {
                    transaction_id: outcome.transaction_id,
                    new_balance: outcome.new_balance,
                },
                now,
            )?;
            tracing::info!(
                event_id = %webhook.event_id,
                account_id = %account_id,
                new_balance = %outcome.new_balance,
                replayed = %outcome.replayed,
                "webhook applied"
            );
            Ok(Json(WebhookResponse {
                status: if outcome.replayed { "duplicate" } else { "processed" },
                transaction_id: Some(outcome.transaction_id.to_string()),
            }))
        }
        Err(e) if e.is_transient() => {
            // No receipt: the provider must redeliver and retry the
            // ledger call.
            Err(e.into())
        }
        Err(e) => {
            // Terminal denial; remember it so redeliveries short-circuit.
            tracing::warn!(event_id = %webhook.event_id, error = %e, "webhook denied");
            write_receipt(
                &state,
                &webhook.event_id,
                ReceiptOutcome::Denied {
                    reason: denial_reason(&e),
                },
                now,
            )?;
            Ok(Json(WebhookResponse {
                status: "denied",
                transaction_id: None,
            }))
        }
    }
}

fn replay_receipt(receipt: &WebhookReceipt) -> WebhookResponse {
    match &receipt.outcome {
        ReceiptOutcome::Applied { transaction_id, .. } => WebhookResponse {
            status: "duplicate",
            transaction_id: Some(transaction_id.to_string()),
        },
        ReceiptOutcome::Denied { .. } => WebhookResponse {
            status: "denied",
            transaction_id: None,
        },
        ReceiptOutcome::Ignored => WebhookResponse {
            status: "ignored",
            transaction_id: None,
        },
    }
}

fn write_receipt(
    state: &AppState,
    event_id: &str,
    outcome: ReceiptOutcome,
    now: chrono::DateTime<Utc>,
) -> Result<(), ApiError> {
    let receipt = WebhookReceipt {
        provider: PROVIDER.to_string(),
        event_id: event_id.to_string(),
        outcome,
        recorded_at: now,
        expires_at: now + state.mutator.config().receipt_retention,
    };
    state.store.put_receipt(&receipt).map_err(ApiError::from)
}

fn denial_reason(err: &LedgerError) -> String {
    match err {
        LedgerError::InsufficientBalance { .. } => "insufficient_balance".into(),
        LedgerError::AccountSuspended { .. } => "account_suspended".into(),
        other => other.to_string(),
    }
}
