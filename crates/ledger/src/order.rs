//! Order entity and status state machine.

use chrono::{DateTime, Utc};
use common::{IdempotencyKey, Money, OrderId, ProductId, UserId};
use serde::{Deserialize, Serialize};

/// The status of an order.
///
/// Transitions:
/// ```text
/// Pending ──┬──► Paid
///           ├──► Failed ──┬──► Paid
///           │             └──► Canceled
///           └──► Canceled
/// ```
/// `Paid` and `Canceled` are terminal. A `Failed` order stays actionable:
/// a fresh payment attempt (new intent id) may still pay it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Order committed, awaiting payment confirmation.
    #[default]
    Pending,

    /// Payment confirmed (terminal state).
    Paid,

    /// The last payment attempt failed; a retry may still pay the order.
    Failed,

    /// Order was canceled (terminal state).
    Canceled,
}

impl OrderStatus {
    /// Returns true if the order can transition to `Paid` from this status.
    pub fn can_mark_paid(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Failed)
    }

    /// Returns true if the order can transition to `Failed` from this status.
    pub fn can_mark_failed(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Failed)
    }

    /// Returns true if the order can be canceled from this status.
    pub fn can_cancel(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Failed)
    }

    /// Returns true if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Paid | OrderStatus::Canceled)
    }

    /// Returns the status name as stored and serialized.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Failed => "failed",
            OrderStatus::Canceled => "canceled",
        }
    }

    /// Parses a stored status name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OrderStatus::Pending),
            "paid" => Some(OrderStatus::Paid),
            "failed" => Some(OrderStatus::Failed),
            "canceled" => Some(OrderStatus::Canceled),
            _ => None,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One line of an order: the product and the unit price captured at
/// checkout time. Never re-read from the catalog afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    /// The product identifier.
    pub product_id: ProductId,

    /// Product name at checkout time.
    pub product_name: String,

    /// Quantity ordered.
    pub quantity: u32,

    /// Unit price at checkout time, in cents.
    pub unit_price: Money,
}

impl OrderLine {
    /// Creates a new order line.
    pub fn new(
        product_id: impl Into<ProductId>,
        product_name: impl Into<String>,
        quantity: u32,
        unit_price: Money,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            product_name: product_name.into(),
            quantity,
            unit_price,
        }
    }

    /// Returns the total for this line (quantity × unit price).
    pub fn line_total(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }
}

/// A committed order. Line items are immutable once created; only the
/// status moves afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Order identifier.
    pub id: OrderId,

    /// Owning user.
    pub user_id: UserId,

    /// Captured line items, in cart order.
    pub lines: Vec<OrderLine>,

    /// Exact fixed-point sum of all line totals.
    pub total: Money,

    /// Current status.
    pub status: OrderStatus,

    /// When the order was committed.
    pub created_at: DateTime<Utc>,

    /// The idempotency key the checkout was claimed under.
    pub idempotency_key: IdempotencyKey,
}

impl Order {
    /// Builds a pending order from captured lines, computing the total as
    /// the exact fixed-point sum of line totals.
    ///
    /// Both store implementations call this inside the checkout
    /// transaction so the captured prices and the inserted total can
    /// never diverge.
    pub fn from_lines(
        id: OrderId,
        user_id: UserId,
        idempotency_key: IdempotencyKey,
        lines: Vec<OrderLine>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let total = Money::sum(lines.iter().map(OrderLine::line_total));
        Self {
            id,
            user_id,
            lines,
            total,
            status: OrderStatus::Pending,
            created_at,
            idempotency_key,
        }
    }
}
