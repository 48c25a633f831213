//! In-memory ledger store implementation for testing.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::{OrderId, PaymentIntentId, ProductId, UserId};
use tokio::sync::Mutex;

use crate::{
    Cart, LedgerError, Order, OrderLine, OrderStatus, Payment, PaymentStatus, Product, Result,
    store::{CheckoutDraft, LedgerStore, PaymentApplied},
};

#[derive(Default)]
struct MemoryState {
    products: HashMap<ProductId, Product>,
    carts: HashMap<UserId, Cart>,
    orders: HashMap<OrderId, Order>,
    payments: Vec<Payment>,
}

/// In-memory ledger for tests.
///
/// A single mutex over the whole state makes every operation a
/// serializable transaction, the same contract the PostgreSQL
/// implementation provides with row locks.
#[derive(Clone, Default)]
pub struct MemoryLedger {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryLedger {
    /// Creates a new empty in-memory ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of payment rows stored.
    pub async fn payment_count(&self) -> usize {
        self.state.lock().await.payments.len()
    }

    /// Returns the total number of orders stored.
    pub async fn order_count(&self) -> usize {
        self.state.lock().await.orders.len()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn upsert_product(&self, product: Product) -> Result<()> {
        let mut state = self.state.lock().await;
        state.products.insert(product.id.clone(), product);
        Ok(())
    }

    async fn get_product(&self, product_id: &ProductId) -> Result<Option<Product>> {
        let state = self.state.lock().await;
        Ok(state.products.get(product_id).cloned())
    }

    async fn list_products(&self) -> Result<Vec<Product>> {
        let state = self.state.lock().await;
        let mut products: Vec<_> = state.products.values().cloned().collect();
        products.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(products)
    }

    async fn delete_product(&self, product_id: &ProductId) -> Result<bool> {
        let mut state = self.state.lock().await;
        Ok(state.products.remove(product_id).is_some())
    }

    async fn get_cart(&self, user_id: UserId) -> Result<Cart> {
        let state = self.state.lock().await;
        Ok(state
            .carts
            .get(&user_id)
            .cloned()
            .unwrap_or_else(|| Cart::empty(user_id)))
    }

    async fn add_to_cart(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<Cart> {
        let mut state = self.state.lock().await;
        if !state.products.contains_key(&product_id) {
            return Err(LedgerError::ProductNotFound(product_id));
        }
        let cart = state
            .carts
            .entry(user_id)
            .or_insert_with(|| Cart::empty(user_id));
        cart.add(product_id, quantity);
        Ok(cart.clone())
    }

    async fn remove_from_cart(&self, user_id: UserId, product_id: &ProductId) -> Result<Cart> {
        let mut state = self.state.lock().await;
        let cart = state
            .carts
            .entry(user_id)
            .or_insert_with(|| Cart::empty(user_id));
        cart.remove(product_id);
        Ok(cart.clone())
    }

    async fn clear_cart(&self, user_id: UserId) -> Result<()> {
        let mut state = self.state.lock().await;
        state.carts.remove(&user_id);
        Ok(())
    }

    async fn commit_checkout(&self, draft: CheckoutDraft) -> Result<Order> {
        let mut state = self.state.lock().await;

        let cart = match state.carts.get(&draft.user_id) {
            Some(cart) if !cart.is_empty() => cart.clone(),
            _ => return Err(LedgerError::EmptyCart),
        };

        if cart.version() != draft.expected_cart_version {
            return Err(LedgerError::Conflict {
                expected: draft.expected_cart_version.as_i64(),
                actual: cart.version().as_i64(),
            });
        }

        // Capture prices inside the same critical section as the insert.
        let mut lines = Vec::with_capacity(cart.line_count());
        for (product_id, quantity) in cart.lines() {
            let product = state
                .products
                .get(product_id)
                .ok_or_else(|| LedgerError::ProductNotFound(product_id.clone()))?;
            lines.push(OrderLine::new(
                product.id.clone(),
                product.name.clone(),
                quantity,
                product.price,
            ));
        }

        let order = Order::from_lines(
            draft.order_id,
            draft.user_id,
            draft.idempotency_key,
            lines,
            Utc::now(),
        );

        state.orders.insert(order.id, order.clone());
        state.carts.remove(&draft.user_id);
        metrics::counter!("ledger_checkouts_committed").increment(1);

        Ok(order)
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        let state = self.state.lock().await;
        Ok(state.orders.get(&order_id).cloned())
    }

    async fn list_orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        let state = self.state.lock().await;
        let mut orders: Vec<_> = state
            .orders
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn cancel_order(&self, order_id: OrderId) -> Result<Order> {
        let mut state = self.state.lock().await;
        let order = state
            .orders
            .get_mut(&order_id)
            .ok_or(LedgerError::OrderNotFound(order_id))?;

        if !order.status.can_cancel() {
            return Err(LedgerError::Integrity(format!(
                "cannot cancel order {} in status {}",
                order_id, order.status
            )));
        }

        order.status = OrderStatus::Canceled;
        Ok(order.clone())
    }

    async fn record_payment(&self, payment: Payment) -> Result<PaymentApplied> {
        let mut state = self.state.lock().await;

        if state
            .payments
            .iter()
            .any(|p| p.intent_id == payment.intent_id)
        {
            return Err(LedgerError::Duplicate(format!(
                "payment intent {} already recorded",
                payment.intent_id
            )));
        }

        let order = state
            .orders
            .get_mut(&payment.order_id)
            .ok_or(LedgerError::OrderNotFound(payment.order_id))?;

        match payment.status {
            PaymentStatus::Succeeded => {
                if order.status == OrderStatus::Paid {
                    return Err(LedgerError::Duplicate(format!(
                        "order {} already paid",
                        order.id
                    )));
                }
                if !order.status.can_mark_paid() {
                    return Err(LedgerError::Integrity(format!(
                        "payment success for order {} in status {}",
                        order.id, order.status
                    )));
                }
                order.status = OrderStatus::Paid;
            }
            PaymentStatus::Failed => {
                if order.status == OrderStatus::Canceled {
                    return Err(LedgerError::Integrity(format!(
                        "payment failure for canceled order {}",
                        order.id
                    )));
                }
                // A failure never downgrades an already-paid order.
                if order.status.can_mark_failed() {
                    order.status = OrderStatus::Failed;
                }
            }
            PaymentStatus::Initiated => {}
        }

        let applied = PaymentApplied {
            payment: payment.clone(),
            order: order.clone(),
        };
        state.payments.push(payment);
        metrics::counter!("ledger_payments_recorded").increment(1);

        Ok(applied)
    }

    async fn get_payment_by_intent(
        &self,
        intent_id: &PaymentIntentId,
    ) -> Result<Option<Payment>> {
        let state = self.state.lock().await;
        Ok(state
            .payments
            .iter()
            .find(|p| &p.intent_id == intent_id)
            .cloned())
    }
}
