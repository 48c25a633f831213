//! Checkout and reconciliation error types.

use common::{OrderId, ProductId};
use eventlog::EventLogError;
use idempotency::IdempotencyError;
use ledger::LedgerError;
use thiserror::Error;

/// Errors surfaced by the checkout coordinator and payment reconciler.
///
/// The taxonomy callers see:
/// - `EmptyCart`, `OutOfStock`, `KeyReuse` — validation-class, never
///   auto-retried;
/// - `Conflict`, `DownstreamTimeout` — transient, safe to retry (the
///   coordinator already retried locally; a timeout resolves via
///   idempotency replay on the next attempt, never assumed failed);
/// - `OrderNotFound` — surfaced only after the bounded
///   eventual-consistency retries;
/// - `IntegrityViolation` — fatal, logged, manual reconciliation.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// The cart has nothing to check out.
    #[error("Cart is empty")]
    EmptyCart,

    /// A cart line references a product that is gone from the catalog.
    /// The whole checkout aborts; no partial orders.
    #[error("Product unavailable: {0}")]
    OutOfStock(ProductId),

    /// Concurrent requests fought over the same cart or claim and the
    /// retry budget ran out. Safe to retry with backoff.
    #[error("Conflict: concurrent request in flight, retry")]
    Conflict,

    /// An idempotency key was reused for a materially different request.
    /// Client bug; rejected with a 409-equivalent.
    #[error("Idempotency key reused with a different {0}")]
    KeyReuse(&'static str),

    /// The order was not found, after bounded retries where eventual
    /// consistency could explain a miss.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// An invariant was violated; escalated for manual review.
    #[error("Integrity violation: {0}")]
    IntegrityViolation(String),

    /// A store or broker call exceeded its deadline. Outcome unknown;
    /// resolved by idempotency replay on the next attempt.
    #[error("Downstream timeout: {0}")]
    DownstreamTimeout(&'static str),

    /// Ledger store error.
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Idempotency guard error.
    #[error("Idempotency error: {0}")]
    Idempotency(#[from] IdempotencyError),

    /// Event log error.
    #[error("Event log error: {0}")]
    EventLog(#[from] EventLogError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CheckoutError {
    /// Returns true if the caller may retry the operation with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CheckoutError::Conflict | CheckoutError::DownstreamTimeout(_)
        )
    }
}

/// Convenience type alias for coordinator results.
pub type Result<T> = std::result::Result<T, CheckoutError>;
