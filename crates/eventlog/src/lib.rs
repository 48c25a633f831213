//! Append-only order event log.
//!
//! The checkout coordinator and payment reconciler publish here for
//! external notification/audit consumers. The contract is at-least-once:
//! a publish either reaches the log or is parked in the outbox for a
//! later sweep, never silently dropped. Consumers may assume ordering
//! only within one partition (order id) and must be idempotent.

pub mod error;
pub mod event;
pub mod memory;
pub mod outbox;
pub mod postgres;
pub mod publisher;
pub mod retry;

pub use error::{EventLogError, Result};
pub use event::{EventLineItem, OrderEvent};
pub use memory::{EventLog, FlakyPublisher};
pub use outbox::{MemoryOutbox, Outbox, ParkedEvent, PostgresOutbox};
pub use postgres::PostgresEventLog;
pub use publisher::EventPublisher;
pub use retry::{RetryPolicy, RetryingPublisher};
