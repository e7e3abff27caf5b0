//! Audit event emission.
//!
//! Every applied mutation emits an audit event. Emission is fire and
//! forget: it must never block or fail the mutation, so the channel is
//! bounded and full-queue sends drop the event with a warning instead of
//! waiting.

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use prepay_core::{AccountId, Amount, TransactionId, TransactionKind};

/// An applied balance mutation, as seen by audit consumers.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    /// The mutated account.
    pub account_id: AccountId,

    /// Kind of change.
    pub kind: TransactionKind,

    /// Signed amount applied.
    pub amount: Amount,

    /// The appended ledger transaction.
    pub transaction_id: TransactionId,

    /// Balance after the change.
    pub balance_after: Amount,

    /// Review flag raised by policy (e.g. a refund drove the balance
    /// negative), if any.
    pub flag: Option<String>,

    /// When the mutation was applied.
    pub occurred_at: DateTime<Utc>,
}

/// Destination for audit events.
///
/// Events always go to the `ledger_audit` tracing target; when built with
/// a channel they are additionally handed to the notification
/// collaborator.
#[derive(Clone)]
pub struct AuditSink {
    tx: Option<mpsc::Sender<AuditEvent>>,
}

impl AuditSink {
    /// A sink that only logs.
    #[must_use]
    pub fn log_only() -> Self {
        Self { tx: None }
    }

    /// A sink backed by a bounded channel; the receiver side feeds the
    /// notification worker.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<AuditEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx: Some(tx) }, rx)
    }

    /// Emit an event. Never blocks and never fails the caller.
    pub fn emit(&self, event: AuditEvent) {
        tracing::info!(
            target: "ledger_audit",
            account_id = %event.account_id,
            kind = %event.kind,
            amount = %event.amount,
            transaction_id = %event.transaction_id,
            balance_after = %event.balance_after,
            flag = ?event.flag,
            "balance mutated"
        );

        if let Some(tx) = &self.tx {
            if let Err(e) = tx.try_send(event) {
                tracing::warn!(error = %e, "audit queue full, dropping notification");
            }
        }
    }
}
