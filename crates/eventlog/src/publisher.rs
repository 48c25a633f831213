//! The event publisher trait.

use async_trait::async_trait;

use crate::{OrderEvent, Result};

/// Publishes order events to the append-only log.
///
/// Publishing is at-least-once from the caller's perspective: a
/// successful return means the event is durably appended (or parked in
/// an outbox for a later sweep), never silently dropped. Consumers must
/// treat every delivery as possibly duplicated.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Appends an event to the log.
    async fn publish(&self, event: OrderEvent) -> Result<()>;
}
