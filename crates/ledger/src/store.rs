//! The ledger store trait.

use async_trait::async_trait;
use common::{IdempotencyKey, OrderId, PaymentIntentId, ProductId, UserId};

use crate::{Cart, CartVersion, Order, Payment, Product, Result};

/// The inputs to a checkout transaction.
///
/// The store builds the order inside its own transaction: it re-reads
/// the cart, joins current product prices, captures them as line items,
/// computes the total, inserts the order, and clears the cart. The
/// caller supplies only identity and the cart version it observed.
#[derive(Debug, Clone)]
pub struct CheckoutDraft {
    /// Identifier the new order will get.
    pub order_id: OrderId,

    /// The user checking out.
    pub user_id: UserId,

    /// The key the checkout was claimed under, stored on the order.
    pub idempotency_key: IdempotencyKey,

    /// The cart version the caller observed. The commit fails with
    /// `Conflict` if the cart moved past it.
    pub expected_cart_version: CartVersion,
}

/// The result of applying a payment confirmation.
#[derive(Debug, Clone)]
pub struct PaymentApplied {
    /// The inserted payment row.
    pub payment: Payment,

    /// The order after the status transition.
    pub order: Order,
}

/// Transactional store for carts, orders, payments, and the product
/// catalog.
///
/// Implementations must make `commit_checkout` and `record_payment`
/// atomic with serializable-or-better isolation: concurrent transactions
/// that would violate an invariant fail with [`LedgerError::Conflict`]
/// and the caller re-fetches and retries.
///
/// [`LedgerError::Conflict`]: crate::LedgerError::Conflict
#[async_trait]
pub trait LedgerStore: Send + Sync {
    // -- Catalog --

    /// Inserts or replaces a product.
    async fn upsert_product(&self, product: Product) -> Result<()>;

    /// Looks up a product by id.
    async fn get_product(&self, product_id: &ProductId) -> Result<Option<Product>>;

    /// Lists all products.
    async fn list_products(&self) -> Result<Vec<Product>>;

    /// Deletes a product. Returns true if it existed.
    async fn delete_product(&self, product_id: &ProductId) -> Result<bool>;

    // -- Cart --

    /// Returns the user's cart; an empty cart if they have none.
    async fn get_cart(&self, user_id: UserId) -> Result<Cart>;

    /// Adds quantity of a product to the cart, creating the line if
    /// absent. Fails with `ProductNotFound` if the catalog has no such
    /// product.
    async fn add_to_cart(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<Cart>;

    /// Removes a product line from the cart.
    async fn remove_from_cart(&self, user_id: UserId, product_id: &ProductId) -> Result<Cart>;

    /// Drops the cart entirely.
    async fn clear_cart(&self, user_id: UserId) -> Result<()>;

    // -- Checkout --

    /// Converts the user's cart into a pending order, atomically.
    ///
    /// In one transaction: verify the cart is non-empty (`EmptyCart`)
    /// and still at `expected_cart_version` (`Conflict` otherwise); read
    /// every line's current product (`ProductNotFound` aborts the whole
    /// checkout, no partial orders); capture unit prices and compute the
    /// total in fixed point; insert the order with status `pending`;
    /// clear the cart. Either all of this happens or none of it does.
    async fn commit_checkout(&self, draft: CheckoutDraft) -> Result<Order>;

    // -- Orders --

    /// Looks up an order by id.
    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>>;

    /// Lists a user's orders, newest first.
    async fn list_orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>>;

    /// Cancels a pending or failed order. `Integrity` if the order is in
    /// a terminal status.
    async fn cancel_order(&self, order_id: OrderId) -> Result<Order>;

    // -- Payments --

    /// Records a payment confirmation and advances the order status,
    /// atomically.
    ///
    /// In one transaction: `OrderNotFound` if the order is missing;
    /// `Duplicate` if the intent id already has a row, or if a success
    /// lands on an already-`paid` order (redelivery); otherwise insert
    /// the payment row and transition the order (`paid` on success,
    /// `failed` on failure — a failure row is still recorded against a
    /// paid order but never downgrades it). A confirmation for a
    /// canceled order is `Integrity` and goes to manual review.
    async fn record_payment(&self, payment: Payment) -> Result<PaymentApplied>;

    /// Looks up a payment row by external intent id.
    async fn get_payment_by_intent(
        &self,
        intent_id: &PaymentIntentId,
    ) -> Result<Option<Payment>>;
}
