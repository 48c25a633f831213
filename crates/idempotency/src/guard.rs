//! The idempotency guard trait.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::IdempotencyKey;
use serde::{Deserialize, Serialize};

use crate::Result;

/// The default retention window for claimed keys.
///
/// After this window a record expires and a duplicate request will
/// re-execute the operation. That is an accepted trade-off of bounded
/// retention, not a bug: callers that retry later than the window get
/// at-least-once semantics again.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// One claimed key with its stored outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    /// The claimed key.
    pub key: IdempotencyKey,

    /// The operation type the key was claimed for (e.g. `"checkout"`).
    pub operation: String,

    /// Request fingerprint; detects the same key reused for a
    /// materially different request.
    pub fingerprint: String,

    /// The stored result, once the winner committed. `None` while the
    /// operation is still in flight.
    pub result: Option<serde_json::Value>,

    /// When the claim was taken.
    pub claimed_at: DateTime<Utc>,

    /// When the record stops deduplicating.
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    /// Returns true if the record is past its retention window.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// The outcome of a claim attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Begin {
    /// The caller won the claim and must run the operation, then
    /// `commit` or `release`.
    Fresh,

    /// The operation already ran; the stored result is returned
    /// verbatim and the mutation must not execute again.
    Replayed(serde_json::Value),

    /// Another caller holds the claim but has not committed yet. Wait
    /// briefly and replay, or surface a retryable conflict.
    InProgress,
}

/// Deduplicates operations keyed by a client- or event-supplied token.
///
/// `begin` is atomic (unique-constraint insert or compare-and-set):
/// concurrent callers with the same key race to `Fresh`, losers observe
/// `InProgress` until the winner commits, then `Replayed`. Keys expire
/// after the retention window; an expired key is claimable again.
#[async_trait]
pub trait IdempotencyGuard: Send + Sync {
    /// Claims a key for an operation, or returns the prior outcome.
    ///
    /// Fails with `KeyReuse` when the key is already claimed for a
    /// different operation type or fingerprint.
    async fn begin(
        &self,
        key: &IdempotencyKey,
        operation: &str,
        fingerprint: &str,
    ) -> Result<Begin>;

    /// Stores the operation's result for replay.
    async fn commit(&self, key: &IdempotencyKey, result: serde_json::Value) -> Result<()>;

    /// Drops an uncommitted claim so a failed attempt can be retried.
    /// Committed records are left untouched.
    async fn release(&self, key: &IdempotencyKey) -> Result<()>;

    /// Looks up the current record for a key, expired or not.
    async fn get(&self, key: &IdempotencyKey) -> Result<Option<IdempotencyRecord>>;

    /// Bounded poll for a racing winner's result.
    ///
    /// Returns the stored result as soon as it appears, or `None` after
    /// `attempts` polls `delay` apart.
    async fn wait_for_result(
        &self,
        key: &IdempotencyKey,
        attempts: u32,
        delay: Duration,
    ) -> Result<Option<serde_json::Value>> {
        for _ in 0..attempts {
            tokio::time::sleep(delay).await;
            if let Some(record) = self.get(key).await? {
                if let Some(result) = record.result {
                    return Ok(Some(result));
                }
            } else {
                // Claim released without a commit; the caller may retry.
                return Ok(None);
            }
        }
        Ok(None)
    }
}
