//! Provider reconciliation.
//!
//! A periodic batch compares the provider's transaction list for a time
//! window against local top-ups. Transactions the provider settled but
//! the ledger never recorded (a webhook that never arrived) are replayed
//! through the same idempotent `apply_change` path, so reruns are safe.
//! Local top-ups the provider does not know about are flagged for manual
//! review and never auto-reverted.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use prepay_core::{AccountId, Amount, ExternalRef, LedgerError, TransactionId, TransactionKind};
use prepay_store::EngineStore;

use crate::mutator::{BalanceMutator, ChangeRequest};
use crate::retry::with_retry;

/// One settled transaction as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderTransaction {
    /// The provider's transaction id.
    pub txn_id: String,

    /// The account the payment belongs to.
    pub account_id: AccountId,

    /// Settled amount.
    pub amount: Amount,

    /// When the provider settled it.
    pub occurred_at: DateTime<Utc>,
}

/// Errors from the provider's transaction feed.
#[derive(Debug, thiserror::Error)]
pub enum ProviderFeedError {
    /// The request to the provider failed.
    #[error("provider request failed: {0}")]
    Request(String),

    /// The provider's response could not be interpreted.
    #[error("provider response malformed: {0}")]
    Malformed(String),
}

/// Source of the provider's settled-transaction list.
#[async_trait]
pub trait ProviderFeed: Send + Sync {
    /// Name of the provider, used for external references and derived
    /// idempotency keys.
    fn provider_name(&self) -> &str;

    /// List transactions the provider settled within a time window.
    async fn list_transactions(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ProviderTransaction>, ProviderFeedError>;
}

/// Errors from a reconciliation run.
#[derive(Debug, thiserror::Error)]
pub enum ReconError {
    /// The provider feed failed; nothing was compared.
    #[error(transparent)]
    Feed(#[from] ProviderFeedError),

    /// The local ledger could not be read.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// A local top-up the provider has no record of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconFlag {
    /// The local ledger transaction.
    pub transaction_id: TransactionId,

    /// The provider transaction id it claims to originate from.
    pub external_txn_id: String,
}

/// Summary of one reconciliation window.
#[derive(Debug, Default)]
pub struct ReconReport {
    /// Provider transactions examined.
    pub checked: usize,

    /// Provider transaction ids that were missing locally and have been
    /// credited through the idempotent path.
    pub replayed: Vec<String>,

    /// Provider transaction ids that were missing locally but failed to
    /// apply; they will be retried by the next run.
    pub failed: Vec<String>,

    /// Local top-ups absent upstream, flagged for manual review.
    pub flagged: Vec<ReconFlag>,
}

/// Periodic comparator between the provider's ledger and ours.
pub struct ReconciliationJob<S, P> {
    mutator: Arc<BalanceMutator<S>>,
    store: Arc<S>,
    feed: Arc<P>,
}

impl<S: EngineStore, P: ProviderFeed> ReconciliationJob<S, P> {
    /// Create a reconciliation job.
    pub fn new(mutator: Arc<BalanceMutator<S>>, store: Arc<S>, feed: Arc<P>) -> Self {
        Self {
            mutator,
            store,
            feed,
        }
    }

    /// Reconcile one time window.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider feed or the local ledger cannot
    /// be read. Failures applying individual missing transactions do not
    /// abort the run; they are reported and retried next time.
    pub async fn run_window(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<ReconReport, ReconError> {
        let provider = self.feed.provider_name().to_string();
        let upstream = self.feed.list_transactions(from, to).await?;
        let local = self
            .store
            .list_topups_between(from, to)
            .map_err(LedgerError::from)?;

        let local_ids: HashSet<&str> = local
            .iter()
            .filter_map(|tx| tx.external.as_ref())
            .filter(|external| external.provider == provider)
            .map(|external| external.txn_id.as_str())
            .collect();
        let upstream_ids: HashSet<&str> =
            upstream.iter().map(|txn| txn.txn_id.as_str()).collect();

        let mut report = ReconReport {
            checked: upstream.len(),
            ..ReconReport::default()
        };

        // Missing locally: credit through the same idempotent path the
        // webhook would have taken.
        for txn in upstream
            .iter()
            .filter(|txn| !local_ids.contains(txn.txn_id.as_str()))
        {
            match self.replay_missing(&provider, txn).await {
                Ok(()) => report.replayed.push(txn.txn_id.clone()),
                Err(e) => {
                    tracing::warn!(
                        provider = %provider,
                        txn_id = %txn.txn_id,
                        error = %e,
                        "failed to replay missing provider transaction"
                    );
                    report.failed.push(txn.txn_id.clone());
                }
            }
        }

        // Extra locally: present in our ledger, absent upstream. Flag,
        // never auto-revert.
        for tx in &local {
            let Some(external) = tx.external.as_ref() else {
                continue;
            };
            if external.provider == provider && !upstream_ids.contains(external.txn_id.as_str()) {
                tracing::warn!(
                    provider = %provider,
                    txn_id = %external.txn_id,
                    transaction_id = %tx.id,
                    "local top-up absent upstream, flagging for review"
                );
                report.flagged.push(ReconFlag {
                    transaction_id: tx.id,
                    external_txn_id: external.txn_id.clone(),
                });
            }
        }

        tracing::info!(
            provider = %provider,
            checked = %report.checked,
            replayed = %report.replayed.len(),
            failed = %report.failed.len(),
            flagged = %report.flagged.len(),
            "reconciliation window complete"
        );

        Ok(report)
    }

    /// Run forever, reconciling a trailing window every `interval`.
    pub async fn run_every(&self, interval: Duration, lookback: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let to = Utc::now();
            let from = to - lookback;
            if let Err(e) = self.run_window(from, to).await {
                tracing::error!(error = %e, "reconciliation run failed");
            }
        }
    }

    async fn replay_missing(
        &self,
        provider: &str,
        txn: &ProviderTransaction,
    ) -> Result<(), LedgerError> {
        let key = topup_idempotency_key(provider, &txn.txn_id);
        let request = ChangeRequest::new(TransactionKind::Topup)
            .with_description(format!("reconciled {provider} payment"))
            .with_external(ExternalRef::new(provider, txn.txn_id.clone()));

        let retry = self.mutator.config().retry.clone();
        let outcome = with_retry(&retry, "recon_replay", || {
            self.mutator
                .apply_change(txn.account_id, txn.amount, request.clone(), &key)
        })
        .await?;

        tracing::info!(
            provider = %provider,
            txn_id = %txn.txn_id,
            account_id = %txn.account_id,
            amount = %txn.amount,
            replayed = %outcome.replayed,
            "missing provider transaction credited"
        );
        Ok(())
    }
}

/// Canonical idempotency key for a provider top-up, shared by webhook
/// ingestion and reconciliation so both paths dedupe against each other.
#[must_use]
pub fn topup_idempotency_key(provider: &str, txn_id: &str) -> String {
    format!("topup:{provider}:{txn_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditSink;
    use crate::config::EngineConfig;
    use prepay_store::RocksStore;
    use tempfile::TempDir;

    fn dollars(d: i64) -> Amount {
        Amount::from_dollars(d).unwrap()
    }

    struct StubFeed {
        txns: Vec<ProviderTransaction>,
    }

    #[async_trait]
    impl ProviderFeed for StubFeed {
        fn provider_name(&self) -> &str {
            "paddle"
        }

        async fn list_transactions(
            &self,
            _from: DateTime<Utc>,
            _to: DateTime<Utc>,
        ) -> Result<Vec<ProviderTransaction>, ProviderFeedError> {
            Ok(self.txns.clone())
        }
    }

    fn setup(
        txns: Vec<ProviderTransaction>,
    ) -> (
        ReconciliationJob<RocksStore, StubFeed>,
        Arc<BalanceMutator<RocksStore>>,
        TempDir,
    ) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        let mutator = Arc::new(BalanceMutator::new(
            Arc::clone(&store),
            EngineConfig::default(),
            AuditSink::log_only(),
        ));
        let job = ReconciliationJob::new(Arc::clone(&mutator), store, Arc::new(StubFeed { txns }));
        (job, mutator, dir)
    }

    #[tokio::test]
    async fn missing_upstream_transactions_are_credited() {
        let account = AccountId::new(7);
        let now = Utc::now();
        let (job, mutator, _dir) = setup(vec![
            ProviderTransaction {
                txn_id: "txn_seen".into(),
                account_id: account,
                amount: dollars(10),
                occurred_at: now,
            },
            ProviderTransaction {
                txn_id: "txn_missed".into(),
                account_id: account,
                amount: dollars(25),
                occurred_at: now,
            },
        ]);

        // The webhook for txn_seen arrived normally.
        mutator
            .apply_change(
                account,
                dollars(10),
                ChangeRequest::new(TransactionKind::Topup)
                    .with_external(ExternalRef::new("paddle", "txn_seen")),
                &topup_idempotency_key("paddle", "txn_seen"),
            )
            .await
            .unwrap();

        let report = job
            .run_window(now - Duration::from_secs(3600), now + Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(report.checked, 2);
        assert_eq!(report.replayed, vec!["txn_missed".to_string()]);
        assert!(report.failed.is_empty());
        assert!(report.flagged.is_empty());
        assert_eq!(mutator.get_balance(account).unwrap(), dollars(35));
    }

    #[tokio::test]
    async fn rerunning_a_window_is_idempotent() {
        let account = AccountId::new(7);
        let now = Utc::now();
        let (job, mutator, _dir) = setup(vec![ProviderTransaction {
            txn_id: "txn_1".into(),
            account_id: account,
            amount: dollars(25),
            occurred_at: now,
        }]);

        let from = now - Duration::from_secs(3600);
        let to = now + Duration::from_secs(60);

        job.run_window(from, to).await.unwrap();
        let second = job.run_window(from, to).await.unwrap();

        // The second run sees the transaction locally and replays nothing.
        assert!(second.replayed.is_empty());
        assert_eq!(mutator.get_balance(account).unwrap(), dollars(25));
        assert_eq!(mutator.list_transactions(account, 10, 0).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn local_topups_absent_upstream_are_flagged_not_reverted() {
        let account = AccountId::new(7);
        let now = Utc::now();
        let (job, mutator, _dir) = setup(vec![]);

        mutator
            .apply_change(
                account,
                dollars(10),
                ChangeRequest::new(TransactionKind::Topup)
                    .with_external(ExternalRef::new("paddle", "txn_phantom")),
                &topup_idempotency_key("paddle", "txn_phantom"),
            )
            .await
            .unwrap();

        let report = job
            .run_window(now - Duration::from_secs(3600), now + Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(report.flagged.len(), 1);
        assert_eq!(report.flagged[0].external_txn_id, "txn_phantom");
        // Never auto-reverted.
        assert_eq!(mutator.get_balance(account).unwrap(), dollars(10));
    }

    #[tokio::test]
    async fn other_providers_topups_are_not_flagged() {
        let account = AccountId::new(7);
        let now = Utc::now();
        let (job, mutator, _dir) = setup(vec![]);

        mutator
            .apply_change(
                account,
                dollars(10),
                ChangeRequest::new(TransactionKind::Topup)
                    .with_external(ExternalRef::new("stars", "charge_1")),
                &topup_idempotency_key("stars", "charge_1"),
            )
            .await
            .unwrap();

        let report = job
            .run_window(now - Duration::from_secs(3600), now + Duration::from_secs(60))
            .await
            .unwrap();
        assert!(report.flagged.is_empty());
    }
}
