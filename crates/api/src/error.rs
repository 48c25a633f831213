//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use checkout::CheckoutError;
use ledger::LedgerError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Bad request from the client. Never retried automatically.
    Validation(String),
    /// Resource not found.
    NotFound(String),
    /// Transient contention; the client may retry with backoff.
    Conflict(String),
    /// Coordination error from the checkout core.
    Checkout(CheckoutError),
    /// Store error from a direct cart/catalog/order handler.
    Ledger(LedgerError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Checkout(err) => checkout_error_to_response(err),
            ApiError::Ledger(err) => ledger_error_to_response(err),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn checkout_error_to_response(err: CheckoutError) -> (StatusCode, String) {
    match &err {
        CheckoutError::EmptyCart | CheckoutError::OutOfStock(_) => {
            (StatusCode::BAD_REQUEST, err.to_string())
        }
        CheckoutError::Conflict => (StatusCode::CONFLICT, err.to_string()),
        CheckoutError::KeyReuse(_) => (StatusCode::CONFLICT, err.to_string()),
        CheckoutError::OrderNotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
        CheckoutError::DownstreamTimeout(_) => (StatusCode::GATEWAY_TIMEOUT, err.to_string()),
        CheckoutError::IntegrityViolation(msg) => {
            // Fatal; logged for manual reconciliation, internals kept
            // out of the response body.
            tracing::error!(error = %msg, "integrity violation");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal error".to_string(),
            )
        }
        _ => {
            tracing::error!(error = %err, "checkout error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal error".to_string(),
            )
        }
    }
}

fn ledger_error_to_response(err: LedgerError) -> (StatusCode, String) {
    match &err {
        LedgerError::EmptyCart => (StatusCode::BAD_REQUEST, err.to_string()),
        LedgerError::ProductNotFound(_) | LedgerError::OrderNotFound(_) => {
            (StatusCode::NOT_FOUND, err.to_string())
        }
        LedgerError::Conflict { .. } | LedgerError::Duplicate(_) => {
            (StatusCode::CONFLICT, err.to_string())
        }
        _ => {
            tracing::error!(error = %err, "ledger error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal error".to_string(),
            )
        }
    }
}

impl From<CheckoutError> for ApiError {
    fn from(err: CheckoutError) -> Self {
        ApiError::Checkout(err)
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        ApiError::Ledger(err)
    }
}
