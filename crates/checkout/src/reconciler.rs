//! Payment reconciler: applies asynchronous payment confirmations.

use std::time::Duration;

use chrono::Utc;
use common::{IdempotencyKey, Money, OrderId, PaymentIntentId};
use eventlog::{EventPublisher, OrderEvent};
use idempotency::{Begin, IdempotencyError, IdempotencyGuard};
use ledger::{LedgerError, LedgerStore, Order, OrderStatus, Payment, PaymentStatus};
use serde::{Deserialize, Serialize};

use crate::error::{CheckoutError, Result};

/// Operation type payment claims are recorded under.
pub const OP_PAYMENT_CONFIRM: &str = "payment-confirm";

/// Outcome carried on a confirmation event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "lowercase")]
pub enum PaymentOutcome {
    /// The gateway charged the customer.
    Succeeded,

    /// The charge failed; the order stays actionable for a retry.
    Failed {
        /// Gateway-reported reason.
        reason: String,
    },
}

/// One asynchronous confirmation from the payment gateway.
///
/// The transport guarantees at-least-once delivery and same-key
/// ordering only; confirmations may arrive duplicated and out of order
/// relative to other orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentConfirmation {
    /// Globally unique id for this payment attempt; the dedup key.
    pub intent_id: PaymentIntentId,

    /// The order the payment is for.
    pub order_id: OrderId,

    /// The charged amount in cents.
    pub amount: Money,

    /// What happened.
    pub outcome: PaymentOutcome,
}

/// What applying a confirmation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// The payment row was inserted and the order moved to this status.
    Applied(OrderStatus),

    /// The confirmation had already been applied (redelivery); nothing
    /// changed.
    AlreadyApplied,
}

/// Timing knobs for the reconciler.
#[derive(Debug, Clone, Copy)]
pub struct ReconcilerConfig {
    /// Lookup attempts while an order may be missing only because of
    /// read-replica lag.
    pub lookup_attempts: u32,

    /// Delay before the second lookup; doubles each retry.
    pub lookup_base_delay: Duration,

    /// Polls while waiting for a racing claim holder to commit.
    pub replay_wait_attempts: u32,

    /// Delay between those polls.
    pub replay_wait_delay: Duration,

    /// Deadline for the record transaction; on expiry the claim is kept
    /// and the redelivery resolves by replay.
    pub record_timeout: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            lookup_attempts: 5,
            lookup_base_delay: Duration::from_millis(50),
            replay_wait_attempts: 20,
            replay_wait_delay: Duration::from_millis(25),
            record_timeout: Duration::from_secs(5),
        }
    }
}

/// Consumes payment confirmation events and advances order state,
/// tolerant of duplicate and out-of-order delivery.
pub struct PaymentReconciler<L, G, P> {
    ledger: L,
    guard: G,
    publisher: P,
    config: ReconcilerConfig,
}

impl<L, G, P> PaymentReconciler<L, G, P>
where
    L: LedgerStore,
    G: IdempotencyGuard,
    P: EventPublisher,
{
    /// Creates a reconciler with default timing.
    pub fn new(ledger: L, guard: G, publisher: P) -> Self {
        Self::with_config(ledger, guard, publisher, ReconcilerConfig::default())
    }

    /// Creates a reconciler with custom timing.
    pub fn with_config(ledger: L, guard: G, publisher: P, config: ReconcilerConfig) -> Self {
        Self {
            ledger,
            guard,
            publisher,
            config,
        }
    }

    /// Applies one confirmation event.
    ///
    /// Replays (same intent id) are acknowledged without re-executing;
    /// an order missing past the replica-lag window escalates as
    /// `OrderNotFound`; an amount that disagrees with the order total
    /// escalates as `IntegrityViolation`. Both escalations raise an
    /// operational alert and are invisible to the end user.
    #[tracing::instrument(skip(self, confirmation), fields(intent_id = %confirmation.intent_id, order_id = %confirmation.order_id))]
    pub async fn apply(&self, confirmation: PaymentConfirmation) -> Result<ReconcileOutcome> {
        metrics::counter!("reconciler_events_total").increment(1);

        let key = IdempotencyKey::new(confirmation.intent_id.as_str());

        match self
            .guard
            .begin(&key, OP_PAYMENT_CONFIRM, confirmation.intent_id.as_str())
            .await
        {
            Ok(Begin::Fresh) => {}
            Ok(Begin::Replayed(_)) => {
                metrics::counter!("reconciler_duplicates_total").increment(1);
                return Ok(ReconcileOutcome::AlreadyApplied);
            }
            Ok(Begin::InProgress) => {
                let waited = self
                    .guard
                    .wait_for_result(
                        &key,
                        self.config.replay_wait_attempts,
                        self.config.replay_wait_delay,
                    )
                    .await?;
                return match waited {
                    Some(_) => {
                        metrics::counter!("reconciler_duplicates_total").increment(1);
                        Ok(ReconcileOutcome::AlreadyApplied)
                    }
                    None => Err(CheckoutError::Conflict),
                };
            }
            Err(IdempotencyError::KeyReuse { what, .. }) => {
                return Err(CheckoutError::KeyReuse(what));
            }
            Err(e) => return Err(e.into()),
        }

        // The confirmation may outrun the order on a lagging replica;
        // a miss is not permanent on first sight.
        let order = match self.find_order(confirmation.order_id).await? {
            Some(order) => order,
            None => {
                self.guard.release(&key).await?;
                metrics::counter!("reconciler_escalations_total").increment(1);
                tracing::error!(
                    order_id = %confirmation.order_id,
                    intent_id = %confirmation.intent_id,
                    "order still missing after lookup retries, escalating to manual review"
                );
                return Err(CheckoutError::OrderNotFound(confirmation.order_id));
            }
        };

        if confirmation.amount != order.total {
            self.guard.release(&key).await?;
            metrics::counter!("reconciler_escalations_total").increment(1);
            return Err(CheckoutError::IntegrityViolation(format!(
                "confirmation amount {} disagrees with order total {} for order {}",
                confirmation.amount, order.total, order.id
            )));
        }

        if order.status == OrderStatus::Paid {
            // Redelivered or reordered confirmation for a settled
            // order: acknowledge, record nothing.
            self.commit_outcome(&key, ReconcileOutcome::AlreadyApplied)
                .await?;
            metrics::counter!("reconciler_duplicates_total").increment(1);
            return Ok(ReconcileOutcome::AlreadyApplied);
        }

        let status = match confirmation.outcome {
            PaymentOutcome::Succeeded => PaymentStatus::Succeeded,
            PaymentOutcome::Failed { .. } => PaymentStatus::Failed,
        };
        let payment = Payment::confirmed(
            order.id,
            confirmation.intent_id.clone(),
            confirmation.amount,
            status,
        );

        let recorded = tokio::time::timeout(
            self.config.record_timeout,
            self.ledger.record_payment(payment),
        )
        .await;

        let applied = match recorded {
            // Outcome unknown: keep the claim; the redelivery replays.
            Err(_) => return Err(CheckoutError::DownstreamTimeout("ledger payment record")),
            Ok(Ok(applied)) => applied,
            Ok(Err(LedgerError::Duplicate(_))) => {
                self.commit_outcome(&key, ReconcileOutcome::AlreadyApplied)
                    .await?;
                metrics::counter!("reconciler_duplicates_total").increment(1);
                return Ok(ReconcileOutcome::AlreadyApplied);
            }
            Ok(Err(LedgerError::Conflict { .. })) => {
                self.guard.release(&key).await?;
                return Err(CheckoutError::Conflict);
            }
            Ok(Err(LedgerError::Integrity(msg))) => {
                self.guard.release(&key).await?;
                metrics::counter!("reconciler_escalations_total").increment(1);
                return Err(CheckoutError::IntegrityViolation(msg));
            }
            Ok(Err(e)) => {
                self.guard.release(&key).await?;
                return Err(e.into());
            }
        };

        let outcome = ReconcileOutcome::Applied(applied.order.status);
        self.commit_outcome(&key, outcome).await?;
        metrics::counter!("reconciler_applied_total").increment(1);

        // Publish after the transaction, same best-effort policy as the
        // coordinator.
        self.publish_result(&confirmation, &applied.order).await;

        Ok(outcome)
    }

    async fn find_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        for attempt in 0..self.config.lookup_attempts {
            if attempt > 0 {
                tokio::time::sleep(
                    self.config.lookup_base_delay * 2u32.saturating_pow(attempt - 1),
                )
                .await;
            }
            if let Some(order) = self.ledger.get_order(order_id).await? {
                return Ok(Some(order));
            }
        }
        Ok(None)
    }

    async fn commit_outcome(&self, key: &IdempotencyKey, outcome: ReconcileOutcome) -> Result<()> {
        self.guard
            .commit(key, serde_json::to_value(outcome)?)
            .await?;
        Ok(())
    }

    async fn publish_result(&self, confirmation: &PaymentConfirmation, order: &Order) {
        let event = match &confirmation.outcome {
            PaymentOutcome::Succeeded => OrderEvent::OrderPaid {
                order_id: order.id,
                intent_id: confirmation.intent_id.clone(),
                amount: confirmation.amount,
                timestamp: Utc::now(),
            },
            PaymentOutcome::Failed { reason } => OrderEvent::OrderPaymentFailed {
                order_id: order.id,
                intent_id: confirmation.intent_id.clone(),
                reason: reason.clone(),
                timestamp: Utc::now(),
            },
        };

        if let Err(e) = self.publisher.publish(event).await {
            metrics::counter!("reconciler_publish_failures_total").increment(1);
            tracing::error!(order_id = %order.id, error = %e, "payment event publish failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::UserId;
    use eventlog::EventLog;
    use idempotency::MemoryGuard;
    use ledger::{CheckoutDraft, MemoryLedger, Product};

    async fn setup() -> (
        PaymentReconciler<MemoryLedger, MemoryGuard, EventLog>,
        MemoryLedger,
        EventLog,
    ) {
        let ledger = MemoryLedger::new();
        let log = EventLog::new();
        let reconciler = PaymentReconciler::with_config(
            ledger.clone(),
            MemoryGuard::new(),
            log.clone(),
            ReconcilerConfig {
                lookup_attempts: 2,
                lookup_base_delay: Duration::from_millis(1),
                ..ReconcilerConfig::default()
            },
        );

        ledger
            .upsert_product(Product::new("SKU-A", "Widget", None, Money::from_cents(1000)))
            .await
            .unwrap();

        (reconciler, ledger, log)
    }

    async fn pending_order(ledger: &MemoryLedger) -> Order {
        let user = UserId::new();
        let cart = ledger.add_to_cart(user, "SKU-A".into(), 2).await.unwrap();
        ledger
            .commit_checkout(CheckoutDraft {
                order_id: OrderId::new(),
                user_id: user,
                idempotency_key: IdempotencyKey::new("k"),
                expected_cart_version: cart.version(),
            })
            .await
            .unwrap()
    }

    fn success_for(order: &Order, intent: &str) -> PaymentConfirmation {
        PaymentConfirmation {
            intent_id: PaymentIntentId::new(intent),
            order_id: order.id,
            amount: order.total,
            outcome: PaymentOutcome::Succeeded,
        }
    }

    #[tokio::test]
    async fn success_confirmation_marks_order_paid_and_publishes() {
        let (reconciler, ledger, log) = setup().await;
        let order = pending_order(&ledger).await;

        let outcome = reconciler.apply(success_for(&order, "pi_1")).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Applied(OrderStatus::Paid));

        let reloaded = ledger.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, OrderStatus::Paid);

        let events = log.events_for(order.id).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type(), "order_paid");
    }

    #[tokio::test]
    async fn replayed_confirmation_is_a_no_op() {
        let (reconciler, ledger, log) = setup().await;
        let order = pending_order(&ledger).await;

        reconciler.apply(success_for(&order, "pi_1")).await.unwrap();
        let replay = reconciler.apply(success_for(&order, "pi_1")).await.unwrap();

        assert_eq!(replay, ReconcileOutcome::AlreadyApplied);
        assert_eq!(ledger.payment_count().await, 1);
        assert_eq!(log.events_for(order.id).await.len(), 1);

        let reloaded = ledger.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, OrderStatus::Paid);
    }

    #[tokio::test]
    async fn second_intent_on_paid_order_acks_without_a_row() {
        let (reconciler, ledger, _) = setup().await;
        let order = pending_order(&ledger).await;

        reconciler.apply(success_for(&order, "pi_1")).await.unwrap();
        let outcome = reconciler.apply(success_for(&order, "pi_2")).await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::AlreadyApplied);
        assert_eq!(ledger.payment_count().await, 1);
    }

    #[tokio::test]
    async fn failure_confirmation_marks_order_failed() {
        let (reconciler, ledger, log) = setup().await;
        let order = pending_order(&ledger).await;

        let confirmation = PaymentConfirmation {
            intent_id: PaymentIntentId::new("pi_1"),
            order_id: order.id,
            amount: order.total,
            outcome: PaymentOutcome::Failed {
                reason: "card declined".into(),
            },
        };
        let outcome = reconciler.apply(confirmation).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Applied(OrderStatus::Failed));

        let events = log.events_for(order.id).await;
        assert_eq!(events[0].event_type(), "order_payment_failed");

        // A later attempt with a fresh intent can still pay the order.
        let retry = reconciler.apply(success_for(&order, "pi_2")).await.unwrap();
        assert_eq!(retry, ReconcileOutcome::Applied(OrderStatus::Paid));
    }

    #[tokio::test]
    async fn missing_order_escalates_after_bounded_retries() {
        let (reconciler, _, _) = setup().await;

        let confirmation = PaymentConfirmation {
            intent_id: PaymentIntentId::new("pi_1"),
            order_id: OrderId::new(),
            amount: Money::from_cents(100),
            outcome: PaymentOutcome::Succeeded,
        };
        let result = reconciler.apply(confirmation.clone()).await;
        assert!(matches!(result, Err(CheckoutError::OrderNotFound(_))));

        // The claim was released, so a redelivery after the data heals
        // is not shadow-banned by a poisoned record.
        let result = reconciler.apply(confirmation).await;
        assert!(matches!(result, Err(CheckoutError::OrderNotFound(_))));
    }

    #[tokio::test]
    async fn amount_mismatch_is_an_integrity_violation() {
        let (reconciler, ledger, _) = setup().await;
        let order = pending_order(&ledger).await;

        let confirmation = PaymentConfirmation {
            intent_id: PaymentIntentId::new("pi_1"),
            order_id: order.id,
            amount: order.total + Money::from_cents(1),
            outcome: PaymentOutcome::Succeeded,
        };
        let result = reconciler.apply(confirmation).await;
        assert!(matches!(result, Err(CheckoutError::IntegrityViolation(_))));
        assert_eq!(ledger.payment_count().await, 0);
    }

    #[tokio::test]
    async fn concurrent_replays_converge_to_one_row() {
        let (reconciler, ledger, _) = setup().await;
        let reconciler = std::sync::Arc::new(reconciler);
        let order = pending_order(&ledger).await;

        let mut handles = Vec::new();
        for _ in 0..4 {
            let r = reconciler.clone();
            let confirmation = success_for(&order, "pi_1");
            handles.push(tokio::spawn(async move { r.apply(confirmation).await }));
        }

        let mut applied = 0;
        for handle in handles {
            match handle.await.unwrap().unwrap() {
                ReconcileOutcome::Applied(status) => {
                    applied += 1;
                    assert_eq!(status, OrderStatus::Paid);
                }
                ReconcileOutcome::AlreadyApplied => {}
            }
        }

        assert_eq!(applied, 1);
        assert_eq!(ledger.payment_count().await, 1);
        let reloaded = ledger.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, OrderStatus::Paid);
    }
}
