//! PostgreSQL-backed event log implementation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};

use crate::{OrderEvent, Result, publisher::EventPublisher};
use common::OrderId;

/// Append-only event log on PostgreSQL.
///
/// The `sequence` column gives per-partition ordering; downstream CDC
/// tooling tails this table.
#[derive(Clone)]
pub struct PostgresEventLog {
    pool: PgPool,
}

impl PostgresEventLog {
    /// Creates a new PostgreSQL event log.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Returns the events for one partition in append order.
    pub async fn events_for(&self, partition_key: OrderId) -> Result<Vec<OrderEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT payload
            FROM events
            WHERE partition_key = $1
            ORDER BY sequence ASC
            "#,
        )
        .bind(partition_key.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let payload: serde_json::Value = row.try_get("payload")?;
                Ok(serde_json::from_value(payload)?)
            })
            .collect()
    }

    /// Returns the total number of events appended.
    pub async fn event_count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM events")
            .fetch_one(&self.pool)
            .await?;

        Ok(count as usize)
    }
}

#[async_trait]
impl EventPublisher for PostgresEventLog {
    async fn publish(&self, event: OrderEvent) -> Result<()> {
        let payload = serde_json::to_value(&event)?;

        sqlx::query(
            r#"
            INSERT INTO events (event_type, partition_key, payload, published_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(event.event_type())
        .bind(event.partition_key().as_uuid())
        .bind(payload)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        metrics::counter!("eventlog_events_published").increment(1);
        Ok(())
    }
}
