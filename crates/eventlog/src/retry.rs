//! Retrying publisher with outbox escalation.

use std::time::Duration;

use async_trait::async_trait;

use crate::{
    OrderEvent, Result,
    outbox::Outbox,
    publisher::EventPublisher,
};

/// Bounded exponential backoff policy.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total publish attempts before escalating to the outbox.
    pub attempts: u32,

    /// Delay before the second attempt; doubles each retry.
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Returns the delay before the given retry (0-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(retry)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(50),
        }
    }
}

/// Wraps a publisher with bounded retries and an outbox fallback.
///
/// `publish` never loses an event: it retries the inner publisher per
/// the policy and, if the transport is still down, parks the event in
/// the outbox and returns success. A periodic [`sweep`] re-emits parked
/// events; this is the reconciliation path that guarantees every
/// committed order eventually gets its `order_created` on the log.
///
/// [`sweep`]: RetryingPublisher::sweep
pub struct RetryingPublisher<P, O> {
    inner: P,
    outbox: O,
    policy: RetryPolicy,
}

impl<P: Clone, O: Clone> Clone for RetryingPublisher<P, O> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            outbox: self.outbox.clone(),
            policy: self.policy,
        }
    }
}

impl<P: EventPublisher, O: Outbox> RetryingPublisher<P, O> {
    /// Creates a retrying publisher with the default policy.
    pub fn new(inner: P, outbox: O) -> Self {
        Self::with_policy(inner, outbox, RetryPolicy::default())
    }

    /// Creates a retrying publisher with a custom policy.
    pub fn with_policy(inner: P, outbox: O, policy: RetryPolicy) -> Self {
        Self {
            inner,
            outbox,
            policy,
        }
    }

    /// Returns the inner publisher.
    pub fn inner(&self) -> &P {
        &self.inner
    }

    /// Returns the outbox.
    pub fn outbox(&self) -> &O {
        &self.outbox
    }

    /// Re-emits up to `limit` parked events.
    ///
    /// Events that publish successfully are removed from the outbox;
    /// the rest stay parked for the next sweep. Returns how many were
    /// drained.
    #[tracing::instrument(skip(self))]
    pub async fn sweep(&self, limit: usize) -> Result<usize> {
        let parked = self.outbox.peek(limit).await?;
        let mut drained = 0;

        for entry in parked {
            match self.inner.publish(entry.event.clone()).await {
                Ok(()) => {
                    self.outbox.remove(entry.id).await?;
                    drained += 1;
                }
                Err(e) => {
                    tracing::warn!(outbox_id = entry.id, error = %e, "outbox sweep publish failed");
                    break;
                }
            }
        }

        if drained > 0 {
            metrics::counter!("eventlog_outbox_drained").increment(drained as u64);
            tracing::info!(drained, "outbox sweep drained events");
        }

        Ok(drained)
    }
}

#[async_trait]
impl<P: EventPublisher, O: Outbox> EventPublisher for RetryingPublisher<P, O> {
    async fn publish(&self, event: OrderEvent) -> Result<()> {
        let mut last_err = None;

        for attempt in 0..self.policy.attempts {
            if attempt > 0 {
                tokio::time::sleep(self.policy.delay_for(attempt - 1)).await;
                metrics::counter!("eventlog_publish_retries").increment(1);
            }

            match self.inner.publish(event.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(
                        event_type = event.event_type(),
                        attempt,
                        error = %e,
                        "publish attempt failed"
                    );
                    last_err = Some(e);
                }
            }
        }

        // The transport is down; park the event rather than lose it.
        if let Some(e) = last_err {
            tracing::warn!(
                event_type = event.event_type(),
                partition_key = %event.partition_key(),
                error = %e,
                "publish retries exhausted, parking event in outbox"
            );
        }
        self.outbox.park(event).await
    }
}
