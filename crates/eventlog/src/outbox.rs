//! Publish outbox: where events go instead of being dropped.
//!
//! When the transport stays down past the retry budget, the event is
//! parked here; a periodic sweep re-emits parked events until the log
//! acknowledges them.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};
use tokio::sync::Mutex;

use crate::{OrderEvent, Result};

/// A parked event with its outbox position.
#[derive(Debug, Clone)]
pub struct ParkedEvent {
    /// Outbox row id, used to remove the entry after a confirmed publish.
    pub id: i64,

    /// The event awaiting re-emission.
    pub event: OrderEvent,
}

/// Durable parking space for events that could not be published.
#[async_trait]
pub trait Outbox: Send + Sync {
    /// Parks an event for a later sweep.
    async fn park(&self, event: OrderEvent) -> Result<()>;

    /// Returns up to `limit` parked events, oldest first.
    async fn peek(&self, limit: usize) -> Result<Vec<ParkedEvent>>;

    /// Removes a parked event after its publish was acknowledged.
    async fn remove(&self, id: i64) -> Result<()>;

    /// Returns the number of parked events.
    async fn depth(&self) -> Result<usize>;
}

/// In-memory outbox for tests and single-process wiring.
#[derive(Clone, Default)]
pub struct MemoryOutbox {
    entries: Arc<Mutex<Vec<ParkedEvent>>>,
    next_id: Arc<Mutex<i64>>,
}

impl MemoryOutbox {
    /// Creates a new empty outbox.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Outbox for MemoryOutbox {
    async fn park(&self, event: OrderEvent) -> Result<()> {
        let mut next_id = self.next_id.lock().await;
        *next_id += 1;
        let id = *next_id;
        drop(next_id);

        self.entries.lock().await.push(ParkedEvent { id, event });
        metrics::counter!("eventlog_outbox_parked").increment(1);
        Ok(())
    }

    async fn peek(&self, limit: usize) -> Result<Vec<ParkedEvent>> {
        let entries = self.entries.lock().await;
        Ok(entries.iter().take(limit).cloned().collect())
    }

    async fn remove(&self, id: i64) -> Result<()> {
        self.entries.lock().await.retain(|e| e.id != id);
        Ok(())
    }

    async fn depth(&self) -> Result<usize> {
        Ok(self.entries.lock().await.len())
    }
}

/// PostgreSQL-backed outbox.
#[derive(Clone)]
pub struct PostgresOutbox {
    pool: PgPool,
}

impl PostgresOutbox {
    /// Creates a new PostgreSQL outbox.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Outbox for PostgresOutbox {
    async fn park(&self, event: OrderEvent) -> Result<()> {
        let payload = serde_json::to_value(&event)?;

        sqlx::query("INSERT INTO outbox (payload, parked_at) VALUES ($1, $2)")
            .bind(payload)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        metrics::counter!("eventlog_outbox_parked").increment(1);
        Ok(())
    }

    async fn peek(&self, limit: usize) -> Result<Vec<ParkedEvent>> {
        let rows = sqlx::query("SELECT id, payload FROM outbox ORDER BY id ASC LIMIT $1")
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|row| {
                let payload: serde_json::Value = row.try_get("payload")?;
                Ok(ParkedEvent {
                    id: row.try_get("id")?,
                    event: serde_json::from_value(payload)?,
                })
            })
            .collect()
    }

    async fn remove(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM outbox WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn depth(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM outbox")
            .fetch_one(&self.pool)
            .await?;

        Ok(count as usize)
    }
}
