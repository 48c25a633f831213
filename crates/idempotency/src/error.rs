//! Idempotency guard error types.

use thiserror::Error;

/// Errors that can occur while claiming or resolving idempotency keys.
#[derive(Debug, Error)]
pub enum IdempotencyError {
    /// The key is already claimed for a different operation or a
    /// different request fingerprint. Signals a client bug; surfaced as
    /// a 409-equivalent, never retried.
    #[error("Idempotency key '{key}' reused with different {what}")]
    KeyReuse { key: String, what: &'static str },

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for idempotency operations.
pub type Result<T> = std::result::Result<T, IdempotencyError>;
