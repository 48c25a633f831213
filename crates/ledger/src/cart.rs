//! Cart entity.

use std::collections::BTreeMap;

use common::{ProductId, UserId};
use serde::{Deserialize, Serialize};

/// Version number for a cart, used for optimistic concurrency control.
///
/// The version starts at 1 when the cart gets its first line and
/// increments on every mutation. Checkout commits against an expected
/// version; a mismatch means another request changed the cart in between.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct CartVersion(i64);

impl CartVersion {
    /// Creates a version from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the initial version (0) for a cart that has never been touched.
    pub fn initial() -> Self {
        Self(0)
    }

    /// Returns the next version.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw version value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for CartVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A user's cart: product id → quantity, mutable until checkout.
///
/// Lines are kept in product-id order so content fingerprints are stable
/// regardless of insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    user_id: UserId,
    lines: BTreeMap<ProductId, u32>,
    version: CartVersion,
}

impl Cart {
    /// Creates an empty cart for a user.
    pub fn empty(user_id: UserId) -> Self {
        Self {
            user_id,
            lines: BTreeMap::new(),
            version: CartVersion::initial(),
        }
    }

    /// Reconstructs a cart from stored lines and version.
    pub fn from_parts(
        user_id: UserId,
        lines: BTreeMap<ProductId, u32>,
        version: CartVersion,
    ) -> Self {
        Self {
            user_id,
            lines,
            version,
        }
    }

    /// Returns the owning user id.
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Returns the current version.
    pub fn version(&self) -> CartVersion {
        self.version
    }

    /// Returns true if the cart has no lines.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Returns the number of distinct products.
    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    /// Returns the quantity of a product, or 0 if absent.
    pub fn quantity_of(&self, product_id: &ProductId) -> u32 {
        self.lines.get(product_id).copied().unwrap_or(0)
    }

    /// Iterates lines in product-id order.
    pub fn lines(&self) -> impl Iterator<Item = (&ProductId, u32)> {
        self.lines.iter().map(|(id, qty)| (id, *qty))
    }

    /// Adds quantity to a product line, creating it if absent.
    pub fn add(&mut self, product_id: ProductId, quantity: u32) {
        *self.lines.entry(product_id).or_insert(0) += quantity;
        self.version = self.version.next();
    }

    /// Removes a product line entirely. Returns true if it existed.
    pub fn remove(&mut self, product_id: &ProductId) -> bool {
        let existed = self.lines.remove(product_id).is_some();
        if existed {
            self.version = self.version.next();
        }
        existed
    }
}
