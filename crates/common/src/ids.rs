//! Identifier newtypes.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new random id.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an id from an existing UUID.
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID.
            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

uuid_id! {
    /// Unique identifier for a user, as verified by the upstream auth service.
    UserId
}

uuid_id! {
    /// Unique identifier for an order.
    OrderId
}

uuid_id! {
    /// Unique identifier for a payment row.
    PaymentId
}

/// Product identifier (SKU).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(String);

impl ProductId {
    /// Creates a new product ID from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the product ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ProductId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ProductId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ProductId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for ProductId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// External payment-intent identifier, assigned by the payment gateway.
///
/// Globally unique per payment attempt; the reconciler uses it to
/// deduplicate confirmation events.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentIntentId(String);

impl PaymentIntentId {
    /// Creates a payment-intent ID from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the intent ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PaymentIntentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for PaymentIntentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for PaymentIntentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Token deduplicating a logically-identical operation across retries.
///
/// Either supplied by the client or derived from the cart contents via
/// [`IdempotencyKey::derive_for_cart`]. A client-supplied key takes
/// precedence over the derived one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Creates a key from a client-supplied token.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Derives a key from the current cart contents.
    ///
    /// The key is `cart-` followed by the hex SHA-256 of the user id and
    /// the cart's lines in product-id order, so two requests observing
    /// the same cart derive the same key.
    pub fn derive_for_cart<'a, I>(user_id: UserId, lines: I) -> Self
    where
        I: IntoIterator<Item = (&'a ProductId, u32)>,
    {
        Self(format!("cart-{}", cart_fingerprint(user_id, lines)))
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for IdempotencyKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for IdempotencyKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Hex SHA-256 over a user id and cart lines in product-id order.
///
/// Also used as the claim fingerprint that detects a client key reused
/// across different cart contents.
pub fn cart_fingerprint<'a, I>(user_id: UserId, lines: I) -> String
where
    I: IntoIterator<Item = (&'a ProductId, u32)>,
{
    let mut hasher = Sha256::new();
    hasher.update(user_id.as_uuid().as_bytes());
    for (product_id, quantity) in lines {
        hasher.update(product_id.as_str().as_bytes());
        hasher.update(quantity.to_be_bytes());
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_id_new_creates_unique_ids() {
        assert_ne!(UserId::new(), UserId::new());
    }

    #[test]
    fn order_id_from_uuid_preserves_value() {
        let uuid = Uuid::new_v4();
        let id = OrderId::from_uuid(uuid);
        assert_eq!(id.as_uuid(), uuid);
    }

    #[test]
    fn order_id_serialization_roundtrip() {
        let id = OrderId::new();
        let json = serde_json::to_string(&id).unwrap();
        let deserialized: OrderId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, deserialized);
    }

    #[test]
    fn product_id_string_conversion() {
        let id = ProductId::new("SKU-001");
        assert_eq!(id.as_str(), "SKU-001");

        let id2: ProductId = "SKU-002".into();
        assert_eq!(id2.as_str(), "SKU-002");
    }

    #[test]
    fn derived_key_is_stable_for_same_cart() {
        let user = UserId::new();
        let a = ProductId::new("SKU-A");
        let b = ProductId::new("SKU-B");

        let k1 = IdempotencyKey::derive_for_cart(user, [(&a, 2), (&b, 1)]);
        let k2 = IdempotencyKey::derive_for_cart(user, [(&a, 2), (&b, 1)]);
        assert_eq!(k1, k2);
        assert!(k1.as_str().starts_with("cart-"));
    }

    #[test]
    fn derived_key_changes_with_contents() {
        let user = UserId::new();
        let a = ProductId::new("SKU-A");

        let k1 = IdempotencyKey::derive_for_cart(user, [(&a, 2)]);
        let k2 = IdempotencyKey::derive_for_cart(user, [(&a, 3)]);
        assert_ne!(k1, k2);
    }

    #[test]
    fn derived_key_changes_with_user() {
        let a = ProductId::new("SKU-A");

        let k1 = IdempotencyKey::derive_for_cart(UserId::new(), [(&a, 1)]);
        let k2 = IdempotencyKey::derive_for_cart(UserId::new(), [(&a, 1)]);
        assert_ne!(k1, k2);
    }

    #[test]
    fn payment_intent_id_display() {
        let id = PaymentIntentId::new("pi_123");
        assert_eq!(id.to_string(), "pi_123");
    }
}
