//! Integration tests against a real Postgres instance. Ignored by default —
//! run with `DATABASE_URL=postgres://... cargo test -- --ignored` once a
//! database is available.

use orchestrator_db::{connect, migrate, JobRepo};
use uuid::Uuid;

async fn test_pool() -> sqlx::PgPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for integration tests");
    let pool = connect(&url, 5).await.expect("connect");
    migrate(&pool).await.expect("migrate");
    pool
}

#[tokio::test]
#[ignore]
async fn claim_returns_none_when_queue_empty() {
    let pool = test_pool().await;
    let repo = JobRepo::new(pool);
    let claimed = repo
        .claim("worker-1", &["nonexistent_type".to_string()], chrono::Duration::seconds(30))
        .await
        .unwrap();
    assert!(claimed.is_none());
}

#[tokio::test]
#[ignore]
async fn enqueue_then_claim_round_trips() {
    let pool = test_pool().await;
    let repo = JobRepo::new(pool);
    let owner = Uuid::new_v4();
    let enqueued = repo
        .enqueue("ingest_chunks", owner, None, serde_json::json!({}), 3)
        .await
        .unwrap();

    let claimed = repo
        .claim("worker-1", &["ingest_chunks".to_string()], chrono::Duration::seconds(30))
        .await
        .unwrap()
        .expect("job claimable");
    assert_eq!(claimed.id, enqueued.id);
    assert_eq!(claimed.attempts, 1);
}

#[tokio::test]
#[ignore]
async fn expired_lease_is_reclaimed() {
    let pool = test_pool().await;
    let repo = JobRepo::new(pool);
    let owner = Uuid::new_v4();
    repo.enqueue("embed_chunks", owner, None, serde_json::json!({}), 3).await.unwrap();

    let first = repo
        .claim("worker-1", &["embed_chunks".to_string()], chrono::Duration::milliseconds(1))
        .await
        .unwrap()
        .expect("claimed once");

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let second = repo
        .claim("worker-2", &["embed_chunks".to_string()], chrono::Duration::seconds(30))
        .await
        .unwrap()
        .expect("lease expired, reclaimable");
    assert_eq!(second.id, first.id);
    assert_eq!(second.attempts, 2);
}
