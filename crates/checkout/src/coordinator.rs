//! Checkout coordinator: converts a cart into a committed order.

use std::time::Duration;

use chrono::Utc;
use common::{IdempotencyKey, Money, OrderId, UserId, ids::cart_fingerprint};
use eventlog::{EventLineItem, EventPublisher, OrderEvent};
use idempotency::{Begin, IdempotencyError, IdempotencyGuard};
use ledger::{CheckoutDraft, LedgerError, LedgerStore, Order, OrderStatus};
use serde::{Deserialize, Serialize};

use crate::error::{CheckoutError, Result};

/// Operation type checkout claims are recorded under.
pub const OP_CHECKOUT: &str = "checkout";

/// Timing knobs for the coordinator.
#[derive(Debug, Clone, Copy)]
pub struct CoordinatorConfig {
    /// Attempts for the whole checkout when a conflict is observed.
    pub conflict_attempts: u32,

    /// Delay before the second attempt; doubles each retry.
    pub conflict_base_delay: Duration,

    /// Polls while waiting for a racing winner's receipt.
    pub replay_wait_attempts: u32,

    /// Delay between those polls.
    pub replay_wait_delay: Duration,

    /// Deadline for the commit transaction. On expiry the outcome is
    /// unknown: the claim is left in place and the next attempt
    /// resolves it by replay.
    pub commit_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            conflict_attempts: 3,
            conflict_base_delay: Duration::from_millis(25),
            replay_wait_attempts: 20,
            replay_wait_delay: Duration::from_millis(25),
            commit_timeout: Duration::from_secs(5),
        }
    }
}

/// What a successful checkout returns, and what the guard stores for
/// replay. Replays return this verbatim, no recomputation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutReceipt {
    /// The committed order.
    pub order_id: OrderId,

    /// The order total in cents.
    pub total: Money,

    /// Order status at commit time (always `pending`).
    pub status: OrderStatus,
}

impl CheckoutReceipt {
    fn for_order(order: &Order) -> Self {
        Self {
            order_id: order.id,
            total: order.total,
            status: order.status,
        }
    }
}

/// Orchestrates checkout: claim the idempotency key, commit the order
/// atomically against the observed cart version, store the receipt,
/// publish `order_created`.
///
/// Per attempt the state machine is claim → prices locked → order
/// committed (cart cleared in the same transaction) → receipt stored →
/// published, with failure before the commit releasing the claim.
/// Conflicts re-fetch the cart and retry the whole flow rather than
/// resubmitting a stale computation.
pub struct CheckoutCoordinator<L, G, P> {
    ledger: L,
    guard: G,
    publisher: P,
    config: CoordinatorConfig,
}

impl<L, G, P> CheckoutCoordinator<L, G, P>
where
    L: LedgerStore,
    G: IdempotencyGuard,
    P: EventPublisher,
{
    /// Creates a coordinator with default timing.
    pub fn new(ledger: L, guard: G, publisher: P) -> Self {
        Self::with_config(ledger, guard, publisher, CoordinatorConfig::default())
    }

    /// Creates a coordinator with custom timing.
    pub fn with_config(ledger: L, guard: G, publisher: P, config: CoordinatorConfig) -> Self {
        Self {
            ledger,
            guard,
            publisher,
            config,
        }
    }

    /// Checks out the user's cart.
    ///
    /// A client-supplied key takes precedence; otherwise the key is
    /// derived from the cart contents, so identical retries replay the
    /// same receipt. Returns the receipt of the committed (or replayed)
    /// order.
    #[tracing::instrument(skip(self), fields(user_id = %user_id))]
    pub async fn checkout(
        &self,
        user_id: UserId,
        supplied_key: Option<IdempotencyKey>,
    ) -> Result<CheckoutReceipt> {
        metrics::counter!("checkout_requests_total").increment(1);
        let started = std::time::Instant::now();

        let mut result = self.try_checkout(user_id, supplied_key.clone()).await;
        let mut attempt = 1;
        while attempt < self.config.conflict_attempts
            && matches!(result, Err(CheckoutError::Conflict))
        {
            metrics::counter!("checkout_conflicts_total").increment(1);
            tokio::time::sleep(self.config.conflict_base_delay * 2u32.saturating_pow(attempt - 1))
                .await;
            result = self.try_checkout(user_id, supplied_key.clone()).await;
            attempt += 1;
        }

        match &result {
            Ok(receipt) => {
                metrics::histogram!("checkout_duration_seconds")
                    .record(started.elapsed().as_secs_f64());
                tracing::info!(order_id = %receipt.order_id, total = %receipt.total, "checkout done");
            }
            Err(e) => {
                tracing::warn!(error = %e, "checkout failed");
            }
        }

        result
    }

    /// One full pass of the checkout state machine.
    async fn try_checkout(
        &self,
        user_id: UserId,
        supplied_key: Option<IdempotencyKey>,
    ) -> Result<CheckoutReceipt> {
        let cart = self.ledger.get_cart(user_id).await.map_err(map_ledger)?;

        if cart.is_empty() {
            // The cart may be empty because a concurrent request with
            // the same key already committed (or is about to); replay
            // its receipt rather than failing a keyed retry.
            if let Some(key) = &supplied_key {
                match self.guard.get(key).await? {
                    Some(record)
                        if record.operation == OP_CHECKOUT
                            && !record.is_expired(Utc::now()) =>
                    {
                        let result = match record.result {
                            Some(result) => Some(result),
                            None => {
                                self.guard
                                    .wait_for_result(
                                        key,
                                        self.config.replay_wait_attempts,
                                        self.config.replay_wait_delay,
                                    )
                                    .await?
                            }
                        };
                        return match result {
                            Some(result) => {
                                metrics::counter!("checkout_replays_total").increment(1);
                                Ok(serde_json::from_value(result)?)
                            }
                            None => Err(CheckoutError::Conflict),
                        };
                    }
                    _ => {}
                }
            }
            return Err(CheckoutError::EmptyCart);
        }

        let fingerprint = cart_fingerprint(user_id, cart.lines());
        let key = supplied_key
            .unwrap_or_else(|| IdempotencyKey::derive_for_cart(user_id, cart.lines()));

        match self.guard.begin(&key, OP_CHECKOUT, &fingerprint).await {
            Ok(Begin::Fresh) => {}
            Ok(Begin::Replayed(result)) => {
                metrics::counter!("checkout_replays_total").increment(1);
                return Ok(serde_json::from_value(result)?);
            }
            Ok(Begin::InProgress) => {
                // Lost the claim race; block briefly for the winner's
                // receipt, then replay it.
                let waited = self
                    .guard
                    .wait_for_result(
                        &key,
                        self.config.replay_wait_attempts,
                        self.config.replay_wait_delay,
                    )
                    .await?;
                return match waited {
                    Some(result) => {
                        metrics::counter!("checkout_replays_total").increment(1);
                        Ok(serde_json::from_value(result)?)
                    }
                    None => Err(CheckoutError::Conflict),
                };
            }
            Err(IdempotencyError::KeyReuse { what, .. }) => {
                return Err(CheckoutError::KeyReuse(what));
            }
            Err(e) => return Err(e.into()),
        }

        // Claim held. Commit the order against the cart version we
        // observed; the store re-reads prices inside the transaction.
        let draft = CheckoutDraft {
            order_id: OrderId::new(),
            user_id,
            idempotency_key: key.clone(),
            expected_cart_version: cart.version(),
        };

        let committed = tokio::time::timeout(
            self.config.commit_timeout,
            self.ledger.commit_checkout(draft),
        )
        .await;

        let order = match committed {
            // Outcome unknown: keep the claim so the next attempt
            // resolves by replay instead of double-committing.
            Err(_) => return Err(CheckoutError::DownstreamTimeout("ledger commit")),
            Ok(Ok(order)) => order,
            Ok(Err(e)) => {
                self.guard.release(&key).await?;
                return Err(map_ledger(e));
            }
        };

        let receipt = CheckoutReceipt::for_order(&order);
        self.guard
            .commit(&key, serde_json::to_value(&receipt)?)
            .await?;
        metrics::counter!("checkout_committed_total").increment(1);

        // Publish after the transaction. A publish failure never rolls
        // back the committed order; the publisher retries and parks in
        // the outbox, and the sweep re-emits anything parked.
        self.publish_order_created(&order).await;

        Ok(receipt)
    }

    async fn publish_order_created(&self, order: &Order) {
        let event = OrderEvent::OrderCreated {
            order_id: order.id,
            user_id: order.user_id,
            total: order.total,
            line_items: order
                .lines
                .iter()
                .map(|line| EventLineItem {
                    product_id: line.product_id.clone(),
                    quantity: line.quantity,
                    unit_price: line.unit_price,
                })
                .collect(),
            timestamp: order.created_at,
        };

        if let Err(e) = self.publisher.publish(event).await {
            metrics::counter!("checkout_publish_failures_total").increment(1);
            tracing::error!(order_id = %order.id, error = %e, "order_created publish failed");
        }
    }
}

fn map_ledger(e: LedgerError) -> CheckoutError {
    match e {
        LedgerError::EmptyCart => CheckoutError::EmptyCart,
        LedgerError::ProductNotFound(id) => CheckoutError::OutOfStock(id),
        LedgerError::Conflict { .. } => CheckoutError::Conflict,
        LedgerError::OrderNotFound(id) => CheckoutError::OrderNotFound(id),
        LedgerError::Integrity(msg) => CheckoutError::IntegrityViolation(msg),
        other => CheckoutError::Ledger(other),
    }
}
