//! Payment entity.

use chrono::{DateTime, Utc};
use common::{Money, OrderId, PaymentId, PaymentIntentId};
use serde::{Deserialize, Serialize};

/// The status of a payment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    /// The attempt started but the gateway has not confirmed yet.
    Initiated,

    /// The gateway confirmed the charge.
    Succeeded,

    /// The gateway reported the charge failed.
    Failed,
}

impl PaymentStatus {
    /// Returns the status name as stored and serialized.
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Initiated => "initiated",
            PaymentStatus::Succeeded => "succeeded",
            PaymentStatus::Failed => "failed",
        }
    }

    /// Parses a stored status name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "initiated" => Some(PaymentStatus::Initiated),
            "succeeded" => Some(PaymentStatus::Succeeded),
            "failed" => Some(PaymentStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A payment attempt for an order. One row per external payment-intent
/// id; rows are never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    /// Payment row identifier.
    pub id: PaymentId,

    /// The order this payment is for.
    pub order_id: OrderId,

    /// Charged amount in cents.
    pub amount: Money,

    /// Outcome reported by the gateway.
    pub status: PaymentStatus,

    /// External payment-intent id; unique, used for dedup.
    pub intent_id: PaymentIntentId,

    /// When the confirmation was recorded.
    pub recorded_at: DateTime<Utc>,
}

impl Payment {
    /// Creates a payment row from a gateway confirmation.
    pub fn confirmed(
        order_id: OrderId,
        intent_id: PaymentIntentId,
        amount: Money,
        status: PaymentStatus,
    ) -> Self {
        Self {
            id: PaymentId::new(),
            order_id,
            amount,
            status,
            intent_id,
            recorded_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirmed_payment_carries_intent() {
        let order_id = OrderId::new();
        let payment = Payment::confirmed(
            order_id,
            PaymentIntentId::new("pi_1"),
            Money::from_cents(2500),
            PaymentStatus::Succeeded,
        );
        assert_eq!(payment.order_id, order_id);
        assert_eq!(payment.intent_id.as_str(), "pi_1");
        assert_eq!(payment.status, PaymentStatus::Succeeded);
    }

    #[test]
    fn status_roundtrips_through_strings() {
        for status in [
            PaymentStatus::Initiated,
            PaymentStatus::Succeeded,
            PaymentStatus::Failed,
        ] {
            assert_eq!(PaymentStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(PaymentStatus::parse("refunded"), None);
    }
}
