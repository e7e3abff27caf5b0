//! The transactional core of the prepay ledger.
//!
//! This crate turns untrusted, possibly-duplicated, possibly-out-of-order
//! payment events into exactly-once balance mutations:
//!
//! - [`BalanceMutator`]: applies a signed change under an idempotency
//!   reservation and a per-account advisory lock, committing the balance
//!   write and history append as one atomic unit
//! - [`WebhookVerifier`]: authenticity and freshness checks for inbound
//!   provider callbacks
//! - [`RateLimiter`]: sliding-window admission control for sensitive
//!   endpoints
//! - [`ReconciliationJob`]: periodic comparison of the provider's
//!   transaction list against local top-ups
//! - [`retry::with_retry`]: typed backoff for transient failures
//!
//! Mutations on the same account observe a single total order imposed by
//! the account lock; unrelated accounts proceed fully in parallel.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod audit;
pub mod config;
pub mod crypto;
pub mod lock;
pub mod mutator;
pub mod ratelimit;
pub mod recon;
pub mod retry;
pub mod webhook;

pub use audit::{AuditEvent, AuditSink};
pub use config::{EngineConfig, RefundOverdraftPolicy};
pub use lock::{AccountLockManager, LockGuard};
pub use mutator::{ApplyOutcome, BalanceMutator, ChangeRequest};
pub use ratelimit::RateLimiter;
pub use recon::{
    ProviderFeed, ProviderFeedError, ProviderTransaction, ReconError, ReconFlag, ReconReport,
    ReconciliationJob,
};
pub use retry::{with_retry, RetryConfig};
pub use webhook::WebhookVerifier;
