//! PostgreSQL integration tests
//!
//! These tests share one PostgreSQL container and run serially: each
//! test truncates the claims table for isolation.

use std::sync::Arc;
use std::time::Duration;

use common::IdempotencyKey;
use idempotency::{Begin, IdempotencyError, IdempotencyGuard, PostgresGuard};
use serde_json::json;
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!(
                "../../../migrations/002_create_idempotency_table.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

async fn get_test_guard(retention: Duration) -> PostgresGuard {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE idempotency_records")
        .execute(&pool)
        .await
        .unwrap();

    PostgresGuard::with_retention(pool, retention)
}

#[tokio::test]
#[serial]
async fn claim_commit_replay() {
    let guard = get_test_guard(Duration::from_secs(3600)).await;
    let key = IdempotencyKey::new("k1");

    assert_eq!(
        guard.begin(&key, "checkout", "fp").await.unwrap(),
        Begin::Fresh
    );
    assert_eq!(
        guard.begin(&key, "checkout", "fp").await.unwrap(),
        Begin::InProgress
    );

    guard.commit(&key, json!({"order": "o1"})).await.unwrap();

    assert_eq!(
        guard.begin(&key, "checkout", "fp").await.unwrap(),
        Begin::Replayed(json!({"order": "o1"}))
    );
}

#[tokio::test]
#[serial]
async fn concurrent_claims_produce_one_winner() {
    let guard = get_test_guard(Duration::from_secs(3600)).await;
    let key = IdempotencyKey::new("k-race");

    let g1 = guard.clone();
    let g2 = guard.clone();
    let k1 = key.clone();
    let k2 = key.clone();
    let (r1, r2) = tokio::join!(
        async move { g1.begin(&k1, "checkout", "fp").await.unwrap() },
        async move { g2.begin(&k2, "checkout", "fp").await.unwrap() },
    );

    let fresh = [&r1, &r2]
        .into_iter()
        .filter(|r| matches!(r, Begin::Fresh))
        .count();
    assert_eq!(fresh, 1);
    for result in [r1, r2] {
        assert!(matches!(result, Begin::Fresh | Begin::InProgress));
    }
}

#[tokio::test]
#[serial]
async fn fingerprint_mismatch_is_key_reuse() {
    let guard = get_test_guard(Duration::from_secs(3600)).await;
    let key = IdempotencyKey::new("k1");

    guard.begin(&key, "checkout", "fp-a").await.unwrap();
    let result = guard.begin(&key, "checkout", "fp-b").await;
    assert!(matches!(result, Err(IdempotencyError::KeyReuse { .. })));
}

#[tokio::test]
#[serial]
async fn release_reopens_uncommitted_claim() {
    let guard = get_test_guard(Duration::from_secs(3600)).await;
    let key = IdempotencyKey::new("k1");

    guard.begin(&key, "checkout", "fp").await.unwrap();
    guard.release(&key).await.unwrap();
    assert_eq!(
        guard.begin(&key, "checkout", "fp").await.unwrap(),
        Begin::Fresh
    );

    // A committed record survives release.
    guard.commit(&key, json!(1)).await.unwrap();
    guard.release(&key).await.unwrap();
    assert_eq!(
        guard.begin(&key, "checkout", "fp").await.unwrap(),
        Begin::Replayed(json!(1))
    );
}

#[tokio::test]
#[serial]
async fn expired_record_is_reaped_and_reclaimed() {
    let guard = get_test_guard(Duration::from_millis(20)).await;
    let key = IdempotencyKey::new("k1");

    guard.begin(&key, "checkout", "fp").await.unwrap();
    guard.commit(&key, json!(1)).await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(
        guard.begin(&key, "checkout", "fp").await.unwrap(),
        Begin::Fresh
    );
}
