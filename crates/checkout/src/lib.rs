//! Checkout coordination for the storefront core.
//!
//! Two actors live here:
//! - [`CheckoutCoordinator`] converts a cart into a committed order:
//!   exactly-once under client retries and concurrent requests, with the
//!   cart cleared in the same transaction that commits the order.
//! - [`PaymentReconciler`] consumes asynchronous payment confirmations:
//!   idempotent on the external payment-intent id, tolerant of
//!   duplicated and reordered delivery.
//!
//! Both recover `Conflict` and timeouts locally via bounded retry with
//! backoff and resolve unknown outcomes through idempotency replay;
//! everything else surfaces to the caller verbatim.

pub mod coordinator;
pub mod error;
pub mod reconciler;

pub use coordinator::{CheckoutCoordinator, CheckoutReceipt, CoordinatorConfig, OP_CHECKOUT};
pub use error::{CheckoutError, Result};
pub use reconciler::{
    OP_PAYMENT_CONFIRM, PaymentConfirmation, PaymentOutcome, PaymentReconciler, ReconcileOutcome,
    ReconcilerConfig,
};
