//! Order event schema.
//!
//! Events are partitioned by order id. Delivery is at-least-once and
//! ordered only within a partition; consumers must tolerate duplicates
//! and cross-partition reordering.

use chrono::{DateTime, Utc};
use common::{Money, OrderId, PaymentIntentId, ProductId, UserId};
use serde::{Deserialize, Serialize};

/// One captured line item as carried on `order_created`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLineItem {
    /// The product identifier.
    pub product_id: ProductId,

    /// Quantity ordered.
    pub quantity: u32,

    /// Unit price captured at checkout, in cents.
    pub unit_price: Money,
}

/// Events the coordinator and reconciler publish for downstream
/// notification/audit consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderEvent {
    /// A checkout committed a new pending order.
    OrderCreated {
        order_id: OrderId,
        user_id: UserId,
        total: Money,
        line_items: Vec<EventLineItem>,
        timestamp: DateTime<Utc>,
    },

    /// A payment confirmation transitioned the order to paid.
    OrderPaid {
        order_id: OrderId,
        intent_id: PaymentIntentId,
        amount: Money,
        timestamp: DateTime<Utc>,
    },

    /// A payment attempt failed; the order stays actionable.
    OrderPaymentFailed {
        order_id: OrderId,
        intent_id: PaymentIntentId,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl OrderEvent {
    /// Returns the event type name as serialized on the wire.
    pub fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderCreated { .. } => "order_created",
            OrderEvent::OrderPaid { .. } => "order_paid",
            OrderEvent::OrderPaymentFailed { .. } => "order_payment_failed",
        }
    }

    /// Returns the partition key. Same-key ordering is the only
    /// delivery-order guarantee consumers may assume.
    pub fn partition_key(&self) -> OrderId {
        match self {
            OrderEvent::OrderCreated { order_id, .. }
            | OrderEvent::OrderPaid { order_id, .. }
            | OrderEvent::OrderPaymentFailed { order_id, .. } => *order_id,
        }
    }
}
