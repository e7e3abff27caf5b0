//! Webhook authenticity and freshness verification.
//!
//! Every inbound callback passes through the same checks, in order:
//! signature, then freshness. Deduplication against stored receipts
//! happens afterwards, at the ingestion layer, so that a rejected
//! delivery never leaves any trace. A failed check yields a terminal
//! rejection with no side effects; the caller must not reveal which
//! check failed.

use std::time::Duration;

use chrono::{DateTime, Utc};

use prepay_core::LedgerError;

use crate::crypto::{constant_time_eq, hmac_sha256_hex};

/// Verifies the signature header a payment provider attaches to webhook
/// deliveries.
///
/// The header carries the signing timestamp and digest in one delimited
/// field, `ts=<unix-seconds>;h1=<hex-hmac>`. The digest is HMAC-SHA256
/// over `"{timestamp}:{rawBody}"` with a shared secret, and deliveries
/// older (or newer) than the allowed skew are rejected even when the
/// signature is valid, to stop replay of captured payloads.
#[derive(Debug, Clone)]
pub struct WebhookVerifier {
    secret: String,
    max_skew: Duration,
}

impl WebhookVerifier {
    /// Create a verifier for a shared secret.
    #[must_use]
    pub fn new(secret: impl Into<String>, max_skew: Duration) -> Self {
        Self {
            secret: secret.into(),
            max_skew,
        }
    }

    /// Verify an inbound delivery.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidSignature`] if the header is malformed or
    ///   the digest does not match.
    /// - [`LedgerError::StaleWebhook`] if the timestamp is outside the
    ///   allowed skew.
    pub fn verify(
        &self,
        signature_header: &str,
        raw_body: &str,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        let Some((timestamp, signature)) = parse_signature_header(signature_header) else {
            return Err(LedgerError::InvalidSignature);
        };

        let message = format!("{timestamp}:{raw_body}");
        let expected = hmac_sha256_hex(&self.secret, &message);
        if !constant_time_eq(&expected, signature) {
            return Err(LedgerError::InvalidSignature);
        }

        let age_secs = (now.timestamp() - timestamp).abs();
        let max_skew_secs = i64::try_from(self.max_skew.as_secs()).unwrap_or(i64::MAX);
        if age_secs > max_skew_secs {
            return Err(LedgerError::StaleWebhook { age_secs });
        }

        Ok(())
    }

    /// Sign a body the way the provider would. Used by tests and the
    /// in-chat confirmation path, which shares the signature scheme.
    #[must_use]
    pub fn sign(&self, raw_body: &str, timestamp: i64) -> String {
        let digest = hmac_sha256_hex(&self.secret, &format!("{timestamp}:{raw_body}"));
        format!("ts={timestamp};h1={digest}")
    }
}

/// Parse a `ts=<unix>;h1=<hex>` header value.
fn parse_signature_header(header: &str) -> Option<(i64, &str)> {
    let mut timestamp = None;
    let mut signature = None;

    for part in header.split(';') {
        if let Some(value) = part.strip_prefix("ts=") {
            timestamp = value.parse::<i64>().ok();
        } else if let Some(value) = part.strip_prefix("h1=") {
            signature = Some(value);
        }
    }

    Some((timestamp?, signature?))
}
