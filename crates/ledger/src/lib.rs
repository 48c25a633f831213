//! Transactional ledger for carts, orders, and payments.
//!
//! The ledger is the authoritative state holder for the storefront core.
//! Its composite operations sit exactly at the coordinator's transaction
//! boundaries: `commit_checkout` converts a cart into a pending order and
//! clears the cart atomically, `record_payment` inserts a payment row and
//! advances the order status atomically. Everything else is plain
//! entity CRUD.

pub mod cart;
pub mod error;
pub mod memory;
pub mod order;
pub mod payment;
pub mod postgres;
pub mod product;
pub mod store;

pub use cart::{Cart, CartVersion};
pub use error::{LedgerError, Result};
pub use memory::MemoryLedger;
pub use order::{Order, OrderLine, OrderStatus};
pub use payment::{Payment, PaymentStatus};
pub use postgres::PostgresLedger;
pub use product::Product;
pub use store::{CheckoutDraft, LedgerStore, PaymentApplied};
