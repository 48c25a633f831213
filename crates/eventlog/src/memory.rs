//! In-memory event log implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::OrderId;
use tokio::sync::{Mutex, mpsc};

use crate::{OrderEvent, Result, publisher::EventPublisher};

#[derive(Default)]
struct LogState {
    events: Vec<OrderEvent>,
    partitions: HashMap<OrderId, Vec<usize>>,
    subscribers: Vec<mpsc::UnboundedSender<OrderEvent>>,
}

/// In-memory event log for tests and single-process wiring.
///
/// Appends keep per-partition order; subscribers receive every event in
/// append order. A dropped receiver is pruned on the next publish.
#[derive(Clone, Default)]
pub struct EventLog {
    state: Arc<Mutex<LogState>>,
}

impl EventLog {
    /// Creates a new empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to all events appended after this call.
    pub async fn subscribe(&self) -> mpsc::UnboundedReceiver<OrderEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().await.subscribers.push(tx);
        rx
    }

    /// Returns all events in append order.
    pub async fn all_events(&self) -> Vec<OrderEvent> {
        self.state.lock().await.events.clone()
    }

    /// Returns the events for one partition, in append order.
    pub async fn events_for(&self, partition_key: OrderId) -> Vec<OrderEvent> {
        let state = self.state.lock().await;
        state
            .partitions
            .get(&partition_key)
            .map(|indices| indices.iter().map(|&i| state.events[i].clone()).collect())
            .unwrap_or_default()
    }

    /// Returns the total number of events appended.
    pub async fn event_count(&self) -> usize {
        self.state.lock().await.events.len()
    }
}

#[async_trait]
impl EventPublisher for EventLog {
    async fn publish(&self, event: OrderEvent) -> Result<()> {
        let mut state = self.state.lock().await;

        let index = state.events.len();
        state
            .partitions
            .entry(event.partition_key())
            .or_default()
            .push(index);
        state.events.push(event.clone());

        state
            .subscribers
            .retain(|tx| tx.send(event.clone()).is_ok());

        metrics::counter!("eventlog_events_published").increment(1);
        Ok(())
    }
}

/// A publisher that fails a configurable number of times before
/// succeeding. Test double for retry/outbox behavior.
#[derive(Clone, Default)]
pub struct FlakyPublisher {
    inner: EventLog,
    failures_left: Arc<Mutex<u32>>,
    attempts: Arc<Mutex<u32>>,
}

impl FlakyPublisher {
    /// Creates a publisher that fails the first `failures` publishes.
    pub fn failing(failures: u32) -> Self {
        Self {
            inner: EventLog::new(),
            failures_left: Arc::new(Mutex::new(failures)),
            attempts: Arc::new(Mutex::new(0)),
        }
    }

    /// Returns the underlying log.
    pub fn log(&self) -> &EventLog {
        &self.inner
    }

    /// Returns how many publish attempts were made.
    pub async fn attempt_count(&self) -> u32 {
        *self.attempts.lock().await
    }
}

#[async_trait]
impl EventPublisher for FlakyPublisher {
    async fn publish(&self, event: OrderEvent) -> Result<()> {
        *self.attempts.lock().await += 1;

        let mut failures = self.failures_left.lock().await;
        if *failures > 0 {
            *failures -= 1;
            return Err(crate::EventLogError::Publish(
                "simulated transport failure".to_string(),
            ));
        }
        drop(failures);

        self.inner.publish(event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::{Money, PaymentIntentId};

    fn paid_event(order_id: OrderId) -> OrderEvent {
        OrderEvent::OrderPaid {
            order_id,
            intent_id: PaymentIntentId::new("pi_1"),
            amount: Money::from_cents(2500),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn publish_appends_in_order() {
        let log = EventLog::new();
        let order_a = OrderId::new();
        let order_b = OrderId::new();

        log.publish(paid_event(order_a)).await.unwrap();
        log.publish(paid_event(order_b)).await.unwrap();
        log.publish(paid_event(order_a)).await.unwrap();

        assert_eq!(log.event_count().await, 3);
        assert_eq!(log.events_for(order_a).await.len(), 2);
        assert_eq!(log.events_for(order_b).await.len(), 1);
    }

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let log = EventLog::new();
        let mut rx = log.subscribe().await;

        let order_id = OrderId::new();
        log.publish(paid_event(order_id)).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.partition_key(), order_id);
    }

    #[tokio::test]
    async fn dropped_subscriber_does_not_fail_publish() {
        let log = EventLog::new();
        let rx = log.subscribe().await;
        drop(rx);

        log.publish(paid_event(OrderId::new())).await.unwrap();
        assert_eq!(log.event_count().await, 1);
    }

    #[tokio::test]
    async fn flaky_publisher_fails_then_recovers() {
        let publisher = FlakyPublisher::failing(2);
        let event = paid_event(OrderId::new());

        assert!(publisher.publish(event.clone()).await.is_err());
        assert!(publisher.publish(event.clone()).await.is_err());
        assert!(publisher.publish(event).await.is_ok());
        assert_eq!(publisher.attempt_count().await, 3);
        assert_eq!(publisher.log().event_count().await, 1);
    }
}
