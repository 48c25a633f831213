//! PostgreSQL-backed ledger store implementation.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{
    IdempotencyKey, Money, OrderId, PaymentId, PaymentIntentId, ProductId, UserId,
};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{
    Cart, CartVersion, LedgerError, Order, OrderLine, OrderStatus, Payment, PaymentStatus,
    Product, Result,
    store::{CheckoutDraft, LedgerStore, PaymentApplied},
};

/// PostgreSQL-backed ledger.
///
/// Each composite operation runs in one transaction; the cart and order
/// rows are taken `FOR UPDATE` so concurrent checkouts and payment
/// confirmations serialize on the row. PostgreSQL serialization
/// failures (40001/40P01) surface as [`LedgerError::Conflict`] so
/// callers retry them like any other conflict.
#[derive(Clone)]
pub struct PostgresLedger {
    pool: PgPool,
}

impl PostgresLedger {
    /// Creates a new PostgreSQL ledger.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_product(row: PgRow) -> Result<Product> {
        Ok(Product {
            id: ProductId::new(row.try_get::<String, _>("id")?),
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            price: Money::from_cents(row.try_get("price_cents")?),
        })
    }

    fn row_to_order(row: &PgRow, lines: Vec<OrderLine>) -> Result<Order> {
        let status_str: String = row.try_get("status")?;
        let status = OrderStatus::parse(&status_str).ok_or_else(|| {
            LedgerError::Integrity(format!("unknown order status '{status_str}' in store"))
        })?;

        Ok(Order {
            id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
            user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
            lines,
            total: Money::from_cents(row.try_get("total_cents")?),
            status,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
            idempotency_key: IdempotencyKey::new(row.try_get::<String, _>("idempotency_key")?),
        })
    }

    fn row_to_payment(row: PgRow) -> Result<Payment> {
        let status_str: String = row.try_get("status")?;
        let status = PaymentStatus::parse(&status_str).ok_or_else(|| {
            LedgerError::Integrity(format!("unknown payment status '{status_str}' in store"))
        })?;

        Ok(Payment {
            id: PaymentId::from_uuid(row.try_get::<Uuid, _>("id")?),
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            amount: Money::from_cents(row.try_get("amount_cents")?),
            status,
            intent_id: PaymentIntentId::new(row.try_get::<String, _>("intent_id")?),
            recorded_at: row.try_get::<DateTime<Utc>, _>("recorded_at")?,
        })
    }

    async fn fetch_order_lines(
        tx: &mut Transaction<'_, Postgres>,
        order_id: OrderId,
    ) -> Result<Vec<OrderLine>> {
        let rows = sqlx::query(
            r#"
            SELECT product_id, product_name, quantity, unit_price_cents
            FROM order_lines
            WHERE order_id = $1
            ORDER BY position ASC
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_all(&mut **tx)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                Ok(OrderLine {
                    product_id: ProductId::new(row.try_get::<String, _>("product_id")?),
                    product_name: row.try_get("product_name")?,
                    quantity: row.try_get::<i32, _>("quantity")? as u32,
                    unit_price: Money::from_cents(row.try_get("unit_price_cents")?),
                })
            })
            .collect::<Result<Vec<_>>>()?)
    }

    async fn fetch_cart(&self, user_id: UserId) -> Result<Cart> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT version FROM carts WHERE user_id = $1")
                .bind(user_id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;

        let Some(version) = version else {
            return Ok(Cart::empty(user_id));
        };

        let rows = sqlx::query("SELECT product_id, quantity FROM cart_items WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .fetch_all(&self.pool)
            .await?;

        let mut lines = BTreeMap::new();
        for row in rows {
            lines.insert(
                ProductId::new(row.try_get::<String, _>("product_id")?),
                row.try_get::<i32, _>("quantity")? as u32,
            );
        }

        Ok(Cart::from_parts(user_id, lines, CartVersion::new(version)))
    }
}

/// Maps transient PostgreSQL failures to `Conflict` so callers retry.
fn map_db_error(e: sqlx::Error) -> LedgerError {
    if let sqlx::Error::Database(ref db_err) = e {
        if matches!(db_err.code().as_deref(), Some("40001") | Some("40P01")) {
            return LedgerError::Conflict {
                expected: 0,
                actual: 0,
            };
        }
    }
    LedgerError::Database(e)
}

#[async_trait]
impl LedgerStore for PostgresLedger {
    async fn upsert_product(&self, product: Product) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO products (id, name, description, price_cents)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                description = EXCLUDED.description,
                price_cents = EXCLUDED.price_cents
            "#,
        )
        .bind(product.id.as_str())
        .bind(&product.name)
        .bind(&product.description)
        .bind(product.price.cents())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_product(&self, product_id: &ProductId) -> Result<Option<Product>> {
        let row = sqlx::query(
            "SELECT id, name, description, price_cents FROM products WHERE id = $1",
        )
        .bind(product_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_product).transpose()
    }

    async fn list_products(&self) -> Result<Vec<Product>> {
        let rows =
            sqlx::query("SELECT id, name, description, price_cents FROM products ORDER BY id")
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(Self::row_to_product).collect()
    }

    async fn delete_product(&self, product_id: &ProductId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM products WHERE id = $1")
            .bind(product_id.as_str())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_cart(&self, user_id: UserId) -> Result<Cart> {
        self.fetch_cart(user_id).await
    }

    async fn add_to_cart(
        &self,
        user_id: UserId,
        product_id: ProductId,
        quantity: u32,
    ) -> Result<Cart> {
        let mut tx = self.pool.begin().await?;

        let exists: Option<i32> = sqlx::query_scalar("SELECT 1 FROM products WHERE id = $1")
            .bind(product_id.as_str())
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(LedgerError::ProductNotFound(product_id));
        }

        sqlx::query(
            r#"
            INSERT INTO carts (user_id, version) VALUES ($1, 1)
            ON CONFLICT (user_id) DO UPDATE SET version = carts.version + 1
            "#,
        )
        .bind(user_id.as_uuid())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO cart_items (user_id, product_id, quantity)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, product_id)
                DO UPDATE SET quantity = cart_items.quantity + EXCLUDED.quantity
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(product_id.as_str())
        .bind(quantity as i32)
        .execute(&mut *tx)
        .await?;

        tx.commit().await.map_err(map_db_error)?;

        self.fetch_cart(user_id).await
    }

    async fn remove_from_cart(&self, user_id: UserId, product_id: &ProductId) -> Result<Cart> {
        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query("DELETE FROM cart_items WHERE user_id = $1 AND product_id = $2")
            .bind(user_id.as_uuid())
            .bind(product_id.as_str())
            .execute(&mut *tx)
            .await?;

        if removed.rows_affected() > 0 {
            sqlx::query("UPDATE carts SET version = version + 1 WHERE user_id = $1")
                .bind(user_id.as_uuid())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await.map_err(map_db_error)?;

        self.fetch_cart(user_id).await
    }

    async fn clear_cart(&self, user_id: UserId) -> Result<()> {
        sqlx::query("DELETE FROM carts WHERE user_id = $1")
            .bind(user_id.as_uuid())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    #[tracing::instrument(skip(self, draft), fields(user_id = %draft.user_id))]
    async fn commit_checkout(&self, draft: CheckoutDraft) -> Result<Order> {
        let mut tx = self.pool.begin().await?;

        // Lock the cart row; concurrent checkouts of the same cart
        // serialize here, and the loser sees the row gone.
        let version: Option<i64> =
            sqlx::query_scalar("SELECT version FROM carts WHERE user_id = $1 FOR UPDATE")
                .bind(draft.user_id.as_uuid())
                .fetch_optional(&mut *tx)
                .await
                .map_err(map_db_error)?;

        let Some(version) = version else {
            return Err(LedgerError::EmptyCart);
        };

        let rows = sqlx::query(
            r#"
            SELECT ci.product_id, ci.quantity, p.name, p.price_cents
            FROM cart_items ci
            LEFT JOIN products p ON p.id = ci.product_id
            WHERE ci.user_id = $1
            ORDER BY ci.product_id ASC
            "#,
        )
        .bind(draft.user_id.as_uuid())
        .fetch_all(&mut *tx)
        .await
        .map_err(map_db_error)?;

        if rows.is_empty() {
            return Err(LedgerError::EmptyCart);
        }

        if version != draft.expected_cart_version.as_i64() {
            return Err(LedgerError::Conflict {
                expected: draft.expected_cart_version.as_i64(),
                actual: version,
            });
        }

        // Prices captured here, inside the same transaction as the
        // order insert.
        let mut lines = Vec::with_capacity(rows.len());
        for row in rows {
            let product_id = ProductId::new(row.try_get::<String, _>("product_id")?);
            let name: Option<String> = row.try_get("name")?;
            let price_cents: Option<i64> = row.try_get("price_cents")?;
            let (Some(name), Some(price_cents)) = (name, price_cents) else {
                return Err(LedgerError::ProductNotFound(product_id));
            };
            lines.push(OrderLine {
                product_id,
                product_name: name,
                quantity: row.try_get::<i32, _>("quantity")? as u32,
                unit_price: Money::from_cents(price_cents),
            });
        }

        let order = Order::from_lines(
            draft.order_id,
            draft.user_id,
            draft.idempotency_key,
            lines,
            Utc::now(),
        );

        sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, total_cents, status, created_at, idempotency_key)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.user_id.as_uuid())
        .bind(order.total.cents())
        .bind(order.status.as_str())
        .bind(order.created_at)
        .bind(order.idempotency_key.as_str())
        .execute(&mut *tx)
        .await
        .map_err(map_db_error)?;

        for (position, line) in order.lines.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO order_lines
                    (order_id, position, product_id, product_name, quantity, unit_price_cents)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(order.id.as_uuid())
            .bind(position as i32)
            .bind(line.product_id.as_str())
            .bind(&line.product_name)
            .bind(line.quantity as i32)
            .bind(line.unit_price.cents())
            .execute(&mut *tx)
            .await
            .map_err(map_db_error)?;
        }

        // Cascades to cart_items.
        sqlx::query("DELETE FROM carts WHERE user_id = $1")
            .bind(draft.user_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(map_db_error)?;

        tx.commit().await.map_err(map_db_error)?;
        metrics::counter!("ledger_checkouts_committed").increment(1);

        Ok(order)
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            SELECT id, user_id, total_cents, status, created_at, idempotency_key
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let lines = Self::fetch_order_lines(&mut tx, order_id).await?;
        tx.commit().await?;

        Ok(Some(Self::row_to_order(&row, lines)?))
    }

    async fn list_orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            r#"
            SELECT id, user_id, total_cents, status, created_at, idempotency_key
            FROM orders
            WHERE user_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_all(&mut *tx)
        .await?;

        let mut orders = Vec::with_capacity(rows.len());
        for row in rows {
            let order_id = OrderId::from_uuid(row.try_get::<Uuid, _>("id")?);
            let lines = Self::fetch_order_lines(&mut tx, order_id).await?;
            orders.push(Self::row_to_order(&row, lines)?);
        }

        tx.commit().await?;
        Ok(orders)
    }

    async fn cancel_order(&self, order_id: OrderId) -> Result<Order> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            SELECT id, user_id, total_cents, status, created_at, idempotency_key
            FROM orders
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_db_error)?;

        let row = row.ok_or(LedgerError::OrderNotFound(order_id))?;
        let lines = Self::fetch_order_lines(&mut tx, order_id).await?;
        let mut order = Self::row_to_order(&row, lines)?;

        if !order.status.can_cancel() {
            return Err(LedgerError::Integrity(format!(
                "cannot cancel order {} in status {}",
                order_id, order.status
            )));
        }

        sqlx::query("UPDATE orders SET status = $1 WHERE id = $2")
            .bind(OrderStatus::Canceled.as_str())
            .bind(order_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(map_db_error)?;

        tx.commit().await.map_err(map_db_error)?;
        order.status = OrderStatus::Canceled;

        Ok(order)
    }

    #[tracing::instrument(skip(self, payment), fields(order_id = %payment.order_id, intent_id = %payment.intent_id))]
    async fn record_payment(&self, payment: Payment) -> Result<PaymentApplied> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            SELECT id, user_id, total_cents, status, created_at, idempotency_key
            FROM orders
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(payment.order_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_db_error)?;

        let row = row.ok_or(LedgerError::OrderNotFound(payment.order_id))?;
        let lines = Self::fetch_order_lines(&mut tx, payment.order_id).await?;
        let mut order = Self::row_to_order(&row, lines)?;

        let exists: Option<i32> = sqlx::query_scalar("SELECT 1 FROM payments WHERE intent_id = $1")
            .bind(payment.intent_id.as_str())
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_some() {
            return Err(LedgerError::Duplicate(format!(
                "payment intent {} already recorded",
                payment.intent_id
            )));
        }

        let new_status = match payment.status {
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
                Some(OrderStatus::Paid)
            }
            PaymentStatus::Failed => {
                if order.status == OrderStatus::Canceled {
                    return Err(LedgerError::Integrity(format!(
                        "payment failure for canceled order {}",
                        order.id
                    )));
                }
                // A failure never downgrades an already-paid order.
                order.status.can_mark_failed().then_some(OrderStatus::Failed)
            }
            PaymentStatus::Initiated => None,
        };

        sqlx::query(
            r#"
            INSERT INTO payments (id, order_id, amount_cents, status, intent_id, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(payment.id.as_uuid())
        .bind(payment.order_id.as_uuid())
        .bind(payment.amount.cents())
        .bind(payment.status.as_str())
        .bind(payment.intent_id.as_str())
        .bind(payment.recorded_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            // The unique index is the backstop when two confirmations
            // race past the existence check.
            if let sqlx::Error::Database(ref db_err) = e {
                if db_err.constraint() == Some("payments_intent_id_unique") {
                    return LedgerError::Duplicate(format!(
                        "payment intent {} already recorded",
                        payment.intent_id
                    ));
                }
            }
            map_db_error(e)
        })?;

        if let Some(status) = new_status {
            sqlx::query("UPDATE orders SET status = $1 WHERE id = $2")
                .bind(status.as_str())
                .bind(order.id.as_uuid())
                .execute(&mut *tx)
                .await
                .map_err(map_db_error)?;
            order.status = status;
        }

        tx.commit().await.map_err(map_db_error)?;
        metrics::counter!("ledger_payments_recorded").increment(1);

        Ok(PaymentApplied { payment, order })
    }

    async fn get_payment_by_intent(
        &self,
        intent_id: &PaymentIntentId,
    ) -> Result<Option<Payment>> {
        let row = sqlx::query(
            r#"
            SELECT id, order_id, amount_cents, status, intent_id, recorded_at
            FROM payments
            WHERE intent_id = $1
            "#,
        )
        .bind(intent_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_payment).transpose()
    }
}
