//! Prepay ledger HTTP API service.
//!
//! This crate exposes the engine over HTTP:
//!
//! - Provider webhook ingestion (signature-verified, deduplicated)
//! - In-chat payment session creation, pre-confirmation, and confirmation
//! - The ledger query/mutation surface: balance, transaction history,
//!   and `apply` for usage charges and manual adjustments
//!
//! # Authentication
//!
//! All `/v1` routes require the service API key (`Authorization: Bearer`).
//! Webhook routes authenticate by signature instead.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)] // handlers need async for routing consistency

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod notify;
pub mod provider;
pub mod routes;
pub mod state;

pub use config::ServiceConfig;
pub use error::ApiError;
pub use notify::{spawn_notification_worker, LogNotifier, Notifier};
pub use provider::PaddleFeedClient;
pub use routes::create_router;
pub use state::AppState;
