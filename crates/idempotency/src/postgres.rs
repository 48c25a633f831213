//! PostgreSQL-backed idempotency guard implementation.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::IdempotencyKey;
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::{
    Begin, IdempotencyError, Result,
    guard::{DEFAULT_RETENTION, IdempotencyGuard, IdempotencyRecord},
};

/// PostgreSQL guard.
///
/// The claim is a plain `INSERT ... ON CONFLICT (key) DO NOTHING`; the
/// primary key is the atomic arbiter, so exactly one of any number of
/// concurrent callers inserts the row and wins `Fresh`.
#[derive(Clone)]
pub struct PostgresGuard {
    pool: PgPool,
    retention: Duration,
}

impl PostgresGuard {
    /// Creates a guard with the default 24h retention window.
    pub fn new(pool: PgPool) -> Self {
        Self::with_retention(pool, DEFAULT_RETENTION)
    }

    /// Creates a guard with a custom retention window.
    pub fn with_retention(pool: PgPool, retention: Duration) -> Self {
        Self { pool, retention }
    }

    fn row_to_record(row: PgRow) -> Result<IdempotencyRecord> {
        Ok(IdempotencyRecord {
            key: IdempotencyKey::new(row.try_get::<String, _>("key")?),
            operation: row.try_get("operation")?,
            fingerprint: row.try_get("fingerprint")?,
            result: row.try_get("result")?,
            claimed_at: row.try_get::<DateTime<Utc>, _>("claimed_at")?,
            expires_at: row.try_get::<DateTime<Utc>, _>("expires_at")?,
        })
    }

    async fn try_claim(
        &self,
        key: &IdempotencyKey,
        operation: &str,
        fingerprint: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let expires_at = now
            + chrono::Duration::from_std(self.retention)
                .unwrap_or_else(|_| chrono::Duration::hours(24));

        let result = sqlx::query(
            r#"
            INSERT INTO idempotency_records
                (key, operation, fingerprint, result, claimed_at, expires_at)
            VALUES ($1, $2, $3, NULL, $4, $5)
            ON CONFLICT (key) DO NOTHING
            "#,
        )
        .bind(key.as_str())
        .bind(operation)
        .bind(fingerprint)
        .bind(now)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl IdempotencyGuard for PostgresGuard {
    #[tracing::instrument(skip(self, fingerprint), fields(key = %key))]
    async fn begin(
        &self,
        key: &IdempotencyKey,
        operation: &str,
        fingerprint: &str,
    ) -> Result<Begin> {
        let now = Utc::now();

        if self.try_claim(key, operation, fingerprint, now).await? {
            return Ok(Begin::Fresh);
        }

        // Row exists. Reap it if expired and try once more.
        let reaped = sqlx::query(
            "DELETE FROM idempotency_records WHERE key = $1 AND expires_at <= $2",
        )
        .bind(key.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?;

        if reaped.rows_affected() > 0 && self.try_claim(key, operation, fingerprint, now).await? {
            return Ok(Begin::Fresh);
        }

        let record = self
            .get(key)
            .await?
            .ok_or_else(|| sqlx::Error::RowNotFound)?;

        if record.operation != operation {
            return Err(IdempotencyError::KeyReuse {
                key: key.to_string(),
                what: "operation",
            });
        }
        if record.fingerprint != fingerprint {
            return Err(IdempotencyError::KeyReuse {
                key: key.to_string(),
                what: "fingerprint",
            });
        }

        Ok(match record.result {
            Some(result) => Begin::Replayed(result),
            None => Begin::InProgress,
        })
    }

    async fn commit(&self, key: &IdempotencyKey, result: serde_json::Value) -> Result<()> {
        sqlx::query("UPDATE idempotency_records SET result = $2 WHERE key = $1")
            .bind(key.as_str())
            .bind(result)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn release(&self, key: &IdempotencyKey) -> Result<()> {
        sqlx::query("DELETE FROM idempotency_records WHERE key = $1 AND result IS NULL")
            .bind(key.as_str())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn get(&self, key: &IdempotencyKey) -> Result<Option<IdempotencyRecord>> {
        let row = sqlx::query(
            r#"
            SELECT key, operation, fingerprint, result, claimed_at, expires_at
            FROM idempotency_records
            WHERE key = $1
            "#,
        )
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_record).transpose()
    }
}
