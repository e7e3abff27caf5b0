//! Service-to-service authentication.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use prepay_engine::crypto::constant_time_eq;

use crate::error::ApiError;
use crate::state::AppState;

/// Service authentication via API key.
///
/// Used by the collaborating layers (usage-charging proxy, chat bot) that
/// call the ledger surface. The key is compared in constant time.
#[derive(Debug, Clone)]
pub struct ServiceAuth;

#[async_trait]
impl FromRequestParts<Arc<AppState>> for ServiceAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = state.config.service_api_key.as_deref() else {
            // Closed by default: no configured key means no access.
            return Err(ApiError::Unauthorized);
        };

        let token = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or(ApiError::Unauthorized)?;

        if constant_time_eq(token, expected) {
            Ok(Self)
        } else {
            Err(ApiError::Unauthorized)
        }
    }
}
