//! Product entity.

use common::{Money, ProductId};
use serde::{Deserialize, Serialize};

/// A catalog product. Read-only from the checkout coordinator's
/// perspective; the catalog owns mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    /// The product identifier (SKU).
    pub id: ProductId,

    /// Human-readable product name.
    pub name: String,

    /// Optional description.
    pub description: Option<String>,

    /// Unit price in cents.
    pub price: Money,
}

impl Product {
    /// Creates a new product.
    pub fn new(
        id: impl Into<ProductId>,
        name: impl Into<String>,
        description: Option<String>,
        price: Money,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description,
            price,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialization_roundtrip() {
        let product = Product::new("SKU-001", "Widget", Some("A widget".into()), Money::from_cents(1000));
        let json = serde_json::to_string(&product).unwrap();
        let deserialized: Product = serde_json::from_str(&json).unwrap();
        assert_eq!(product, deserialized);
    }
}
