//! Ledger error types.

use common::{OrderId, ProductId};
use thiserror::Error;

/// Errors that can occur when interacting with the ledger store.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// A concurrent transaction touched the same cart or order.
    /// Transient; the caller should re-fetch and retry with backoff.
    #[error("Conflict: cart changed concurrently (expected version {expected}, found {actual})")]
    Conflict { expected: i64, actual: i64 },

    /// The cart has no lines to check out.
    #[error("Cart is empty")]
    EmptyCart,

    /// A cart line references a product the catalog no longer has.
    /// The whole checkout aborts; no partial orders.
    #[error("Product not found: {0}")]
    ProductNotFound(ProductId),

    /// The order was not found.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// The operation was already applied (e.g. a payment-intent id that
    /// already has a row). Not a failure; the caller acknowledges and
    /// skips.
    #[error("Duplicate: {0}")]
    Duplicate(String),

    /// An invariant was violated. Fatal; never auto-retried, requires
    /// manual reconciliation.
    #[error("Integrity violation: {0}")]
    Integrity(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LedgerError {
    /// Returns true if the operation is safe to retry after a backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Conflict { .. })
    }
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
