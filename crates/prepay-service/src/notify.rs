//! Notification collaborator.
//!
//! Audit events flow through a bounded queue into a worker owned by the
//! service, not into unsupervised per-request spawns. The ledger side
//! drops events when the queue is full; the worker here only ever
//! observes, it cannot fail a mutation.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use prepay_engine::AuditEvent;

/// Downstream notification target.
pub trait Notifier: Send + Sync {
    /// Deliver one event. Failures are the notifier's problem to log.
    fn notify(&self, event: &AuditEvent);
}

/// Notifier that writes structured log lines; stands in for the chat
/// delivery collaborator.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, event: &AuditEvent) {
        tracing::info!(
            target: "notifications",
            account_id = %event.account_id,
            kind = %event.kind,
            amount = %event.amount,
            balance_after = %event.balance_after,
            flag = ?event.flag,
            "balance change notification"
        );
    }
}

/// Drain the audit queue into a notifier until the sender side closes.
pub fn spawn_notification_worker(
    mut rx: mpsc::Receiver<AuditEvent>,
    notifier: Arc<dyn Notifier>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            notifier.notify(&event);
        }
        tracing::debug!("notification queue closed, worker exiting");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use chrono::Utc;
    use prepay_core::{AccountId, Amount, TransactionId, TransactionKind};
    use prepay_engine::AuditSink;

    struct RecordingNotifier {
        seen: Mutex<Vec<AccountId>>,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, event: &AuditEvent) {
            self.seen.lock().unwrap().push(event.account_id);
        }
    }

    #[tokio::test]
    async fn worker_drains_audit_events() {
        let (sink, rx) = AuditSink::channel(8);
        let notifier = Arc::new(RecordingNotifier {
            seen: Mutex::new(Vec::new()),
        });
        let handle = spawn_notification_worker(rx, Arc::clone(&notifier) as Arc<dyn Notifier>);

        sink.emit(AuditEvent {
            account_id: AccountId::new(7),
            kind: TransactionKind::Topup,
            amount: Amount::from_dollars(25).unwrap(),
            transaction_id: TransactionId::generate(),
            balance_after: Amount::from_dollars(25).unwrap(),
            flag: None,
            occurred_at: Utc::now(),
        });

        drop(sink);
        handle.await.unwrap();

        assert_eq!(notifier.seen.lock().unwrap().as_slice(), &[AccountId::new(7)]);
    }
}
