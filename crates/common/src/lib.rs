//! Shared types for the storefront coordination core.
//!
//! Identifier newtypes keep user, order, payment, and product ids from
//! being mixed up at compile time; `Money` keeps all currency arithmetic
//! in fixed-point cents.

pub mod ids;
pub mod money;

pub use ids::{IdempotencyKey, OrderId, PaymentId, PaymentIntentId, ProductId, UserId};
pub use money::Money;
