//! API error types and responses.

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use prepay_core::{Amount, LedgerError};

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Unauthorized - missing or invalid credentials, or a webhook whose
    /// verification failed. The response never reveals which check failed.
    #[error("unauthorized")]
    Unauthorized,

    /// Forbidden - the account is suspended.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad request - invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Conflict - the idempotency key is held by an in-flight operation.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Insufficient balance for a usage charge.
    #[error("payment required: balance={balance}, required={required}")]
    PaymentRequired {
        /// Current balance.
        balance: Amount,
        /// Amount the charge required.
        required: Amount,
    },

    /// Rate limited.
    #[error("too many requests")]
    TooManyRequests {
        /// Seconds until the window admits another request.
        retry_after_secs: u64,
    },

    /// Transient failure - the caller should retry.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut retry_after = None;
        let (status, code, message, details) = match &self {
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                self.to_string(),
                None,
            ),
            Self::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", msg.clone(), None),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone(), None),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone(), None),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone(), None),
            Self::PaymentRequired { balance, required } => (
                StatusCode::PAYMENT_REQUIRED,
                "insufficient_balance",
                self.to_string(),
                Some(serde_json::json!({
                    "balance": balance.to_string(),
                    "required": required.to_string(),
                })),
            ),
            Self::TooManyRequests { retry_after_secs } => {
                retry_after = Some(*retry_after_secs);
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    "rate_limited",
                    "too many requests".to_string(),
                    None,
                )
            }
            Self::Unavailable(msg) => {
                tracing::warn!(error = %msg, "transient failure surfaced to caller");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "unavailable",
                    "temporarily unavailable, retry".to_string(),
                    None,
                )
            }
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "an internal error occurred".to_string(),
                    None,
                )
            }
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
                details,
            },
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert("retry-after", value);
            }
        }
        response
    }
}

impl From<prepay_store::StoreError> for ApiError {
    fn from(err: prepay_store::StoreError) -> Self {
        Self::from(LedgerError::from(err))
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientBalance { balance, required } => {
                Self::PaymentRequired { balance, required }
            }
            LedgerError::AccountSuspended { account_id } => {
                Self::Forbidden(format!("account suspended: {account_id}"))
            }
            LedgerError::KeyConflict { key } => {
                Self::Conflict(format!("operation in flight for key {key}"))
            }
            LedgerError::LockBusy { .. } | LedgerError::LockTimeout { .. } => {
                Self::Unavailable("account busy".into())
            }
            // Signature and freshness failures collapse to one opaque
            // response so forgers learn nothing about which check failed.
            LedgerError::InvalidSignature | LedgerError::StaleWebhook { .. } => Self::Unauthorized,
            LedgerError::StoreUnavailable(msg) => Self::Unavailable(msg),
            LedgerError::InvalidAmount(e) => Self::BadRequest(e.to_string()),
            LedgerError::InvalidId(e) => Self::BadRequest(e.to_string()),
        }
    }
}
