//! Core types for the prepay ledger engine.
//!
//! This crate provides the foundational types shared by the storage,
//! engine, and service layers:
//!
//! - **Amounts**: [`Amount`], a signed fixed-point decimal
//! - **Identifiers**: [`AccountId`], [`TransactionId`]
//! - **Accounts**: [`Account`], [`AccountStatus`]
//! - **Ledger entries**: [`LedgerTransaction`], [`TransactionKind`]
//! - **Errors**: [`LedgerError`]
//!
//! # Money representation
//!
//! All monetary values are USD amounts stored as scaled `i64` integers
//! with six fractional digits (micro-dollars): `1_000_000` units = $1.
//! Arithmetic never touches binary floating point.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod account;
pub mod amount;
pub mod error;
pub mod ids;
pub mod transaction;

pub use account::{Account, AccountStatus};
pub use amount::{Amount, AmountError};
pub use error::{LedgerError, Result};
pub use ids::{AccountId, IdError, TransactionId};
pub use transaction::{replay_balance, ExternalRef, LedgerTransaction, TransactionKind};
