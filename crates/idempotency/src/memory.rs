//! In-memory idempotency guard implementation for testing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use common::IdempotencyKey;
use tokio::sync::Mutex;

use crate::{
    Begin, IdempotencyError, Result,
    guard::{DEFAULT_RETENTION, IdempotencyGuard, IdempotencyRecord},
};

/// In-memory guard for tests.
///
/// The mutex over the claim map makes `begin` the same atomic
/// compare-and-set the PostgreSQL implementation gets from its unique
/// constraint.
#[derive(Clone)]
pub struct MemoryGuard {
    records: Arc<Mutex<HashMap<IdempotencyKey, IdempotencyRecord>>>,
    retention: Duration,
}

impl MemoryGuard {
    /// Creates a guard with the default 24h retention window.
    pub fn new() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }

    /// Creates a guard with a custom retention window.
    pub fn with_retention(retention: Duration) -> Self {
        Self {
            records: Arc::new(Mutex::new(HashMap::new())),
            retention,
        }
    }

    /// Returns the number of live (unexpired) records.
    pub async fn record_count(&self) -> usize {
        let now = Utc::now();
        self.records
            .lock()
            .await
            .values()
            .filter(|r| !r.is_expired(now))
            .count()
    }
}

impl Default for MemoryGuard {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdempotencyGuard for MemoryGuard {
    async fn begin(
        &self,
        key: &IdempotencyKey,
        operation: &str,
        fingerprint: &str,
    ) -> Result<Begin> {
        let mut records = self.records.lock().await;
        let now = Utc::now();

        if let Some(record) = records.get(key) {
            if !record.is_expired(now) {
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
                return Ok(match &record.result {
                    Some(result) => Begin::Replayed(result.clone()),
                    None => Begin::InProgress,
                });
            }
        }

        // No live record: take the claim.
        let expires_at = now
            + chrono::Duration::from_std(self.retention)
                .unwrap_or_else(|_| chrono::Duration::hours(24));
        records.insert(
            key.clone(),
            IdempotencyRecord {
                key: key.clone(),
                operation: operation.to_string(),
                fingerprint: fingerprint.to_string(),
                result: None,
                claimed_at: now,
                expires_at,
            },
        );

        Ok(Begin::Fresh)
    }

    async fn commit(&self, key: &IdempotencyKey, result: serde_json::Value) -> Result<()> {
        let mut records = self.records.lock().await;
        if let Some(record) = records.get_mut(key) {
            record.result = Some(result);
        }
        Ok(())
    }

    async fn release(&self, key: &IdempotencyKey) -> Result<()> {
        let mut records = self.records.lock().await;
        if let Some(record) = records.get(key) {
            if record.result.is_none() {
                records.remove(key);
            }
        }
        Ok(())
    }

    async fn get(&self, key: &IdempotencyKey) -> Result<Option<IdempotencyRecord>> {
        let records = self.records.lock().await;
        Ok(records.get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn fresh_then_replayed() {
        let guard = MemoryGuard::new();
        let key = IdempotencyKey::new("k1");

        let first = guard.begin(&key, "checkout", "fp").await.unwrap();
        assert_eq!(first, Begin::Fresh);

        guard.commit(&key, json!({"order": "o1"})).await.unwrap();

        let second = guard.begin(&key, "checkout", "fp").await.unwrap();
        assert_eq!(second, Begin::Replayed(json!({"order": "o1"})));
    }

    #[tokio::test]
    async fn loser_sees_in_progress_until_commit() {
        let guard = MemoryGuard::new();
        let key = IdempotencyKey::new("k1");

        assert_eq!(guard.begin(&key, "checkout", "fp").await.unwrap(), Begin::Fresh);
        assert_eq!(
            guard.begin(&key, "checkout", "fp").await.unwrap(),
            Begin::InProgress
        );

        guard.commit(&key, json!(1)).await.unwrap();
        assert_eq!(
            guard.begin(&key, "checkout", "fp").await.unwrap(),
            Begin::Replayed(json!(1))
        );
    }

    #[tokio::test]
    async fn different_fingerprint_is_key_reuse() {
        let guard = MemoryGuard::new();
        let key = IdempotencyKey::new("k1");

        guard.begin(&key, "checkout", "fp-a").await.unwrap();
        let result = guard.begin(&key, "checkout", "fp-b").await;
        assert!(matches!(
            result,
            Err(IdempotencyError::KeyReuse { what: "fingerprint", .. })
        ));
    }

    #[tokio::test]
    async fn different_operation_is_key_reuse() {
        let guard = MemoryGuard::new();
        let key = IdempotencyKey::new("k1");

        guard.begin(&key, "checkout", "fp").await.unwrap();
        let result = guard.begin(&key, "payment-confirm", "fp").await;
        assert!(matches!(
            result,
            Err(IdempotencyError::KeyReuse { what: "operation", .. })
        ));
    }

    #[tokio::test]
    async fn release_reopens_the_claim() {
        let guard = MemoryGuard::new();
        let key = IdempotencyKey::new("k1");

        guard.begin(&key, "checkout", "fp").await.unwrap();
        guard.release(&key).await.unwrap();

        assert_eq!(guard.begin(&key, "checkout", "fp").await.unwrap(), Begin::Fresh);
    }

    #[tokio::test]
    async fn release_keeps_committed_results() {
        let guard = MemoryGuard::new();
        let key = IdempotencyKey::new("k1");

        guard.begin(&key, "checkout", "fp").await.unwrap();
        guard.commit(&key, json!(7)).await.unwrap();
        guard.release(&key).await.unwrap();

        assert_eq!(
            guard.begin(&key, "checkout", "fp").await.unwrap(),
            Begin::Replayed(json!(7))
        );
    }

    #[tokio::test]
    async fn expired_record_is_claimable_again() {
        let guard = MemoryGuard::with_retention(Duration::from_millis(10));
        let key = IdempotencyKey::new("k1");

        guard.begin(&key, "checkout", "fp").await.unwrap();
        guard.commit(&key, json!(1)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(25)).await;

        // Past retention a duplicate re-executes; different fingerprint
        // is also accepted because the old claim no longer counts.
        assert_eq!(
            guard.begin(&key, "checkout", "fp-other").await.unwrap(),
            Begin::Fresh
        );
    }

    #[tokio::test]
    async fn wait_for_result_sees_committed_value() {
        let guard = MemoryGuard::new();
        let key = IdempotencyKey::new("k1");
        guard.begin(&key, "checkout", "fp").await.unwrap();

        let waiter = guard.clone();
        let waiter_key = key.clone();
        let handle = tokio::spawn(async move {
            waiter
                .wait_for_result(&waiter_key, 20, Duration::from_millis(5))
                .await
                .unwrap()
        });

        tokio::time::sleep(Duration::from_millis(15)).await;
        guard.commit(&key, json!({"ok": true})).await.unwrap();

        assert_eq!(handle.await.unwrap(), Some(json!({"ok": true})));
    }

    #[tokio::test]
    async fn wait_for_result_gives_up_after_budget() {
        let guard = MemoryGuard::new();
        let key = IdempotencyKey::new("k1");
        guard.begin(&key, "checkout", "fp").await.unwrap();

        let result = guard
            .wait_for_result(&key, 3, Duration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(result, None);
    }
}
