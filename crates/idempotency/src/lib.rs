//! Idempotency guard: at-most-once effect under at-least-once delivery.
//!
//! Both the checkout coordinator (client-supplied or cart-content key)
//! and the payment reconciler (external payment-intent id) claim a key
//! before mutating, and commit the operation's result for verbatim
//! replay. Claims are atomic; concurrent callers race to `Fresh` and
//! the losers replay the winner's stored result.

pub mod error;
pub mod guard;
pub mod memory;
pub mod postgres;

pub use error::{IdempotencyError, Result};
pub use guard::{Begin, DEFAULT_RETENTION, IdempotencyGuard, IdempotencyRecord};
pub use memory::MemoryGuard;
pub use postgres::PostgresGuard;
