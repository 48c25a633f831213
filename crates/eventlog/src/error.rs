//! Event log error types.

use thiserror::Error;

/// Errors that can occur while publishing or consuming events.
#[derive(Debug, Error)]
pub enum EventLogError {
    /// The transport rejected or dropped the publish attempt.
    /// Retryable; after the retry budget the event is parked in the
    /// outbox instead of being lost.
    #[error("Publish failed: {0}")]
    Publish(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for event log operations.
pub type Result<T> = std::result::Result<T, EventLogError>;
