//! `RocksDB` storage implementation.

use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode, Options,
    WriteBatch,
};
use uuid::Uuid;

use prepay_core::{
    Account, AccountId, ExternalRef, LedgerTransaction, TransactionId, TransactionKind,
};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::records::{
    IdempotencyRecord, IdempotencyState, LockRecord, PendingPayment, RateDecision, RateWindow,
    ReleaseOutcome, Reservation, StoredResult, WebhookReceipt,
};
use crate::schema::{all_column_families, cf};
use crate::{
    AccountStore, IdempotencyStore, LedgerWrite, LockStore, PendingPaymentStore, RateStore,
    ReceiptStore, TransactionStore,
};

/// Number of mutexes serializing check-and-set operations. Keys hash onto
/// stripes, so unrelated keys contend only on hash collisions.
const CAS_STRIPES: usize = 64;

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<rocksdb::MultiThreaded>>,
    stripes: Vec<Mutex<()>>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let stripes = (0..CAS_STRIPES).map(|_| Mutex::new(())).collect();

        Ok(Self {
            db: Arc::new(db),
            stripes,
        })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Unavailable(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Lock the stripe serializing check-and-set operations for `key`.
    fn stripe(&self, key: &[u8]) -> MutexGuard<'_, ()> {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        let index = usize::try_from(hasher.finish() % CAS_STRIPES as u64)
            .expect("stripe index fits in usize");
        // A poisoned stripe only means another thread panicked while
        // holding the guard; the protected state lives in the database.
        match self.stripes[index].lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn get_record<T: serde::de::DeserializeOwned>(
        &self,
        cf_name: &str,
        key: &[u8],
    ) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        self.db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Unavailable(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    fn put_record<T: serde::Serialize>(&self, cf_name: &str, key: &[u8], value: &T) -> Result<()> {
        let cf = self.cf(cf_name)?;
        let data = Self::serialize(value)?;
        self.db
            .put_cf(&cf, key, data)
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    fn delete_record(&self, cf_name: &str, key: &[u8]) -> Result<()> {
        let cf = self.cf(cf_name)?;
        self.db
            .delete_cf(&cf, key)
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

impl AccountStore for RocksStore {
    fn get_account(&self, account_id: &AccountId) -> Result<Option<Account>> {
        self.get_record(cf::ACCOUNTS, &keys::account_key(account_id))
    }

    fn put_account(&self, account: &Account) -> Result<()> {
        self.put_record(cf::ACCOUNTS, &keys::account_key(&account.id), account)
    }
}

impl TransactionStore for RocksStore {
    fn get_transaction(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Option<LedgerTransaction>> {
        self.get_record(cf::TRANSACTIONS, &keys::transaction_key(transaction_id))
    }

    fn list_transactions(
        &self,
        account_id: &AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerTransaction>> {
        let cf_by_account = self.cf(cf::TRANSACTIONS_BY_ACCOUNT)?;
        let prefix = keys::account_transactions_prefix(account_id);

        let iter = self.db.iterator_cf(
            &cf_by_account,
            IteratorMode::From(&prefix, Direction::Forward),
        );

        // ULID index keys are time-ordered; collect them and reverse for
        // newest-first listing.
        let mut all_keys: Vec<Vec<u8>> = Vec::new();
        for item in iter {
            let (key, _) = item.map_err(|e| StoreError::Unavailable(e.to_string()))?;
            if !key.starts_with(&prefix) {
                break;
            }
            all_keys.push(key.to_vec());
        }
        all_keys.reverse();

        let mut transactions = Vec::new();
        for key in all_keys.into_iter().skip(offset) {
            if transactions.len() >= limit {
                break;
            }
            let tx_id = keys::extract_transaction_id(&key);
            if let Some(tx) = self.get_transaction(&tx_id)? {
                transactions.push(tx);
            }
        }

        Ok(transactions)
    }

    fn find_external(&self, external: &ExternalRef) -> Result<Option<TransactionId>> {
        let cf = self.cf(cf::EXTERNAL_TXNS)?;
        let key = keys::external_txn_key(&external.provider, &external.txn_id);

        let Some(data) = self
            .db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Unavailable(e.to_string()))?
        else {
            return Ok(None);
        };

        let bytes: [u8; 16] = data
            .as_slice()
            .try_into()
            .map_err(|_| StoreError::Serialization("malformed external index entry".into()))?;
        let id = TransactionId::from_bytes(bytes)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(Some(id))
    }

    fn list_topups_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<LedgerTransaction>> {
        let cf_tx = self.cf(cf::TRANSACTIONS)?;

        // ULID keys lead with a 48-bit big-endian millisecond timestamp,
        // so a window scan starts at the first id of `from`.
        let from_ms = u64::try_from(from.timestamp_millis().max(0)).unwrap_or(0);
        let to_ms = u64::try_from(to.timestamp_millis().max(0)).unwrap_or(0);
        let mut start = [0u8; 16];
        start[..6].copy_from_slice(&from_ms.to_be_bytes()[2..8]);

        let iter = self
            .db
            .iterator_cf(&cf_tx, IteratorMode::From(&start, Direction::Forward));

        let mut topups = Vec::new();
        for item in iter {
            let (_, value) = item.map_err(|e| StoreError::Unavailable(e.to_string()))?;
            let tx: LedgerTransaction = Self::deserialize(&value)?;
            if tx.id.timestamp_ms() > to_ms {
                break;
            }
            if tx.kind == TransactionKind::Topup {
                topups.push(tx);
            }
        }

        Ok(topups)
    }
}

impl LedgerWrite for RocksStore {
    fn commit_change(
        &self,
        account: &Account,
        transaction: &LedgerTransaction,
        idempotency: (&str, &IdempotencyRecord),
    ) -> Result<()> {
        let cf_accounts = self.cf(cf::ACCOUNTS)?;
        let cf_tx = self.cf(cf::TRANSACTIONS)?;
        let cf_by_account = self.cf(cf::TRANSACTIONS_BY_ACCOUNT)?;
        let cf_external = self.cf(cf::EXTERNAL_TXNS)?;
        let cf_idempotency = self.cf(cf::IDEMPOTENCY)?;

        let account_value = Self::serialize(account)?;
        let tx_value = Self::serialize(transaction)?;
        let (idem_key, idem_record) = idempotency;
        let idem_value = Self::serialize(idem_record)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_accounts, keys::account_key(&account.id), &account_value);
        batch.put_cf(&cf_tx, keys::transaction_key(&transaction.id), &tx_value);
        batch.put_cf(
            &cf_by_account,
            keys::account_transaction_key(&account.id, &transaction.id),
            [],
        );
        if let Some(external) = &transaction.external {
            batch.put_cf(
                &cf_external,
                keys::external_txn_key(&external.provider, &external.txn_id),
                transaction.id.to_bytes(),
            );
        }
        batch.put_cf(&cf_idempotency, keys::idempotency_key(idem_key), &idem_value);

        self.db
            .write(batch)
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

impl IdempotencyStore for RocksStore {
    fn reserve(
        &self,
        key: &str,
        now: DateTime<Utc>,
        liveness: Duration,
        retention: Duration,
    ) -> Result<Reservation> {
        let encoded = keys::idempotency_key(key);
        let _guard = self.stripe(&encoded);

        let existing: Option<IdempotencyRecord> = self.get_record(cf::IDEMPOTENCY, &encoded)?;

        let live = existing.filter(|record| record.expires_at > now);
        match live {
            Some(IdempotencyRecord {
                state: IdempotencyState::Resolved { result },
                ..
            }) => Ok(Reservation::Resolved(result)),
            Some(IdempotencyRecord {
                state: IdempotencyState::InFlight { reserved_at },
                ..
            }) => {
                let abandoned = now
                    .signed_duration_since(reserved_at)
                    .to_std()
                    .is_ok_and(|age| age > liveness);
                if abandoned {
                    tracing::debug!(key = %key, "reclaiming abandoned idempotency reservation");
                    self.write_in_flight(&encoded, now, retention)?;
                    Ok(Reservation::New)
                } else {
                    Ok(Reservation::InFlight)
                }
            }
            None => {
                self.write_in_flight(&encoded, now, retention)?;
                Ok(Reservation::New)
            }
        }
    }

    fn resolve(
        &self,
        key: &str,
        result: &StoredResult,
        now: DateTime<Utc>,
        retention: Duration,
    ) -> Result<()> {
        let record = IdempotencyRecord {
            state: IdempotencyState::Resolved {
                result: result.clone(),
            },
            expires_at: now + retention,
        };
        self.put_record(cf::IDEMPOTENCY, &keys::idempotency_key(key), &record)
    }

    fn abandon(&self, key: &str) -> Result<()> {
        self.delete_record(cf::IDEMPOTENCY, &keys::idempotency_key(key))
    }
}

impl RocksStore {
    fn write_in_flight(
        &self,
        encoded_key: &[u8],
        now: DateTime<Utc>,
        retention: Duration,
    ) -> Result<()> {
        let record = IdempotencyRecord {
            state: IdempotencyState::InFlight { reserved_at: now },
            expires_at: now + retention,
        };
        self.put_record(cf::IDEMPOTENCY, encoded_key, &record)
    }
}

impl LockStore for RocksStore {
    fn try_acquire(
        &self,
        resource: &str,
        token: Uuid,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let encoded = keys::lock_key(resource);
        let _guard = self.stripe(&encoded);

        let existing: Option<LockRecord> = self.get_record(cf::LOCKS, &encoded)?;
        if existing.is_some_and(|record| record.expires_at > now) {
            return Ok(false);
        }

        let record = LockRecord {
            token,
            expires_at: now + ttl,
        };
        self.put_record(cf::LOCKS, &encoded, &record)?;
        Ok(true)
    }

    fn release(&self, resource: &str, token: Uuid) -> Result<ReleaseOutcome> {
        let encoded = keys::lock_key(resource);
        let _guard = self.stripe(&encoded);

        let existing: Option<LockRecord> = self.get_record(cf::LOCKS, &encoded)?;
        match existing {
            Some(record) if record.token == token => {
                self.delete_record(cf::LOCKS, &encoded)?;
                Ok(ReleaseOutcome::Released)
            }
            _ => Ok(ReleaseOutcome::NotOwner),
        }
    }
}

impl ReceiptStore for RocksStore {
    fn get_receipt(
        &self,
        provider: &str,
        event_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<WebhookReceipt>> {
        let receipt: Option<WebhookReceipt> =
            self.get_record(cf::WEBHOOK_RECEIPTS, &keys::receipt_key(provider, event_id))?;
        Ok(receipt.filter(|r| r.expires_at > now))
    }

    fn put_receipt(&self, receipt: &WebhookReceipt) -> Result<()> {
        self.put_record(
            cf::WEBHOOK_RECEIPTS,
            &keys::receipt_key(&receipt.provider, &receipt.event_id),
            receipt,
        )
    }
}

impl RateStore for RocksStore {
    fn check_and_incr(
        &self,
        scope: &str,
        limit: u32,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<RateDecision> {
        let encoded = keys::rate_key(scope);
        let _guard = self.stripe(&encoded);

        let mut state: RateWindow = self
            .get_record(cf::RATE_WINDOWS, &encoded)?
            .unwrap_or_default();

        let now_sec = now.timestamp();
        let window_secs = i64::try_from(window.as_secs()).unwrap_or(i64::MAX);
        let floor = now_sec - window_secs;

        // Discount events older than the window.
        state.buckets.retain(|(second, _)| *second > floor);

        let count: u64 = state.buckets.iter().map(|(_, c)| u64::from(*c)).sum();

        if count >= u64::from(limit) {
            let oldest = state
                .buckets
                .first()
                .map_or(now_sec, |(second, _)| *second);
            let retry_after_secs =
                u64::try_from((oldest + window_secs - now_sec).max(1)).unwrap_or(1);
            self.put_record(cf::RATE_WINDOWS, &encoded, &state)?;
            return Ok(RateDecision {
                allowed: false,
                remaining: 0,
                retry_after_secs,
            });
        }

        match state.buckets.last_mut() {
            Some((second, bucket_count)) if *second == now_sec => *bucket_count += 1,
            _ => state.buckets.push((now_sec, 1)),
        }
        self.put_record(cf::RATE_WINDOWS, &encoded, &state)?;

        let remaining = u32::try_from(u64::from(limit) - count - 1).unwrap_or(0);
        Ok(RateDecision {
            allowed: true,
            remaining,
            retry_after_secs: 0,
        })
    }
}

impl PendingPaymentStore for RocksStore {
    fn put_pending(&self, payload: &str, pending: &PendingPayment) -> Result<()> {
        self.put_record(cf::PENDING_PAYMENTS, &keys::pending_key(payload), pending)
    }

    fn get_pending(&self, payload: &str, now: DateTime<Utc>) -> Result<Option<PendingPayment>> {
        let pending: Option<PendingPayment> =
            self.get_record(cf::PENDING_PAYMENTS, &keys::pending_key(payload))?;
        Ok(pending.filter(|p| p.expires_at > now))
    }

    fn remove_pending(&self, payload: &str) -> Result<()> {
        self.delete_record(cf::PENDING_PAYMENTS, &keys::pending_key(payload))
    }
}
