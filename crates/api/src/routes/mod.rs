//! Route handlers.

pub mod cart;
pub mod catalog;
pub mod checkout;
pub mod health;
pub mod metrics;
pub mod orders;

use axum::http::HeaderMap;
use common::UserId;

use crate::error::ApiError;

/// Extracts the verified user id the upstream auth service forwards.
///
/// The core trusts this header the way it would trust a validated
/// bearer token; issuing and validating tokens is the auth service's
/// problem.
pub fn require_user(headers: &HeaderMap) -> Result<UserId, ApiError> {
    let value = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Validation("missing x-user-id header".to_string()))?;

    let uuid = uuid::Uuid::parse_str(value)
        .map_err(|e| ApiError::Validation(format!("invalid x-user-id: {e}")))?;

    Ok(UserId::from_uuid(uuid))
}
