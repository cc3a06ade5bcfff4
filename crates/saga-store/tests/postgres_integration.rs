//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p saga-store --test postgres_integration
//! ```

use std::sync::Arc;

use chrono::Duration;
use saga_store::{
    Checkpoint, CorrelationId, PostgresSagaStore, SagaId, SagaStatus, SagaStore, StepResult,
    StoreError, Version,
};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

/// Global shared container
static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            // Create a temporary pool just for migrations
            let temp_pool = PgPool::connect(&connection_string).await.unwrap();

            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_saga_checkpoints.sql"
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

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store() -> PostgresSagaStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    // Clear tables for test isolation
    sqlx::query("TRUNCATE TABLE saga_checkpoints")
        .execute(&pool)
        .await
        .unwrap();

    PostgresSagaStore::new(pool)
}

async fn create_saga(store: &PostgresSagaStore) -> saga_store::SagaInstance {
    store
        .create(
            SagaId::new(),
            "project_creation",
            CorrelationId::new(),
            serde_json::json!({"owner_id": "u1", "org_id": "org-1"}),
        )
        .await
        .unwrap()
}

#[tokio::test]
#[serial]
async fn create_and_load_roundtrip() {
    let store = get_test_store().await;
    let saga = create_saga(&store).await;

    let loaded = store.load(saga.saga_id).await.unwrap();
    assert_eq!(loaded.saga_id, saga.saga_id);
    assert_eq!(loaded.definition_name, "project_creation");
    assert_eq!(loaded.correlation_id, saga.correlation_id);
    assert_eq!(loaded.status, SagaStatus::Running);
    assert_eq!(loaded.current_step_index, 0);
    assert_eq!(loaded.version, Version::first());
    assert_eq!(loaded.payload["owner_id"], "u1");
}

#[tokio::test]
#[serial]
async fn create_twice_returns_existing_instance() {
    let store = get_test_store().await;
    let saga = create_saga(&store).await;

    store
        .checkpoint(
            saga.saga_id,
            saga.version,
            Checkpoint::step_ok(
                StepResult::ok("validate_owner", 1),
                serde_json::json!({"owner_ref": "acct-1"}),
                1,
            ),
        )
        .await
        .unwrap();

    let replayed = store
        .create(
            saga.saga_id,
            "project_creation",
            saga.correlation_id,
            serde_json::json!({"owner_id": "u1"}),
        )
        .await
        .unwrap();

    assert_eq!(replayed.version, Version::new(2));
    assert_eq!(replayed.current_step_index, 1);
}

#[tokio::test]
#[serial]
async fn checkpoint_advances_version_and_persists_results() {
    let store = get_test_store().await;
    let saga = create_saga(&store).await;

    let v2 = store
        .checkpoint(
            saga.saga_id,
            saga.version,
            Checkpoint::step_ok(
                StepResult::ok("validate_owner", 2),
                serde_json::json!({"owner_ref": "acct-1"}),
                1,
            ),
        )
        .await
        .unwrap();
    assert_eq!(v2.version, Version::new(2));

    let loaded = store.load(saga.saga_id).await.unwrap();
    assert_eq!(loaded.version, Version::new(2));
    assert_eq!(loaded.step_results.len(), 1);
    assert_eq!(loaded.step_results[0].step_name, "validate_owner");
    assert_eq!(loaded.step_results[0].attempt, 2);
    assert_eq!(loaded.payload["owner_ref"], "acct-1");
}

#[tokio::test]
#[serial]
async fn stale_checkpoint_conflicts() {
    let store = get_test_store().await;
    let saga = create_saga(&store).await;

    store
        .checkpoint(
            saga.saga_id,
            saga.version,
            Checkpoint::step_ok(
                StepResult::ok("validate_owner", 1),
                serde_json::json!({}),
                1,
            ),
        )
        .await
        .unwrap();

    let result = store
        .checkpoint(
            saga.saga_id,
            saga.version,
            Checkpoint::step_ok(
                StepResult::ok("validate_owner", 1),
                serde_json::json!({}),
                1,
            ),
        )
        .await;

    assert!(matches!(
        result,
        Err(StoreError::OptimisticConflict { .. })
    ));
}

#[tokio::test]
#[serial]
async fn terminal_saga_rejects_further_checkpoints() {
    let store = get_test_store().await;
    let saga = create_saga(&store).await;
    let done = store
        .checkpoint(saga.saga_id, saga.version, Checkpoint::completed())
        .await
        .unwrap();

    // Even with the current version, a completed saga is sealed.
    let result = store
        .checkpoint(
            done.saga_id,
            done.version,
            Checkpoint::step_ok(
                StepResult::ok("validate_owner", 1),
                serde_json::json!({}),
                1,
            ),
        )
        .await;

    assert!(matches!(
        result,
        Err(StoreError::Terminal { status: SagaStatus::Completed, .. })
    ));
    let loaded = store.load(saga.saga_id).await.unwrap();
    assert_eq!(loaded.version, done.version);
}

#[tokio::test]
#[serial]
async fn list_incomplete_returns_only_active_sagas_oldest_first() {
    let store = get_test_store().await;
    let first = create_saga(&store).await;
    let second = create_saga(&store).await;
    let done = create_saga(&store).await;

    store
        .checkpoint(done.saga_id, done.version, Checkpoint::completed())
        .await
        .unwrap();

    // Touch the first saga so it becomes the most recently updated.
    store
        .checkpoint(
            first.saga_id,
            first.version,
            Checkpoint::step_ok(
                StepResult::ok("validate_owner", 1),
                serde_json::json!({}),
                1,
            ),
        )
        .await
        .unwrap();

    let incomplete = store.list_incomplete().await.unwrap();
    assert_eq!(incomplete.len(), 2);
    assert_eq!(incomplete[0].saga_id, second.saga_id);
    assert_eq!(incomplete[1].saga_id, first.saga_id);
}

#[tokio::test]
#[serial]
async fn purge_terminal_respects_retention() {
    let store = get_test_store().await;
    let running = create_saga(&store).await;
    let done = create_saga(&store).await;
    store
        .checkpoint(done.saga_id, done.version, Checkpoint::completed())
        .await
        .unwrap();

    // A day of retention keeps the fresh terminal saga.
    let purged = store.purge_terminal(Duration::days(1)).await.unwrap();
    assert_eq!(purged, 0);

    // Zero retention removes it, leaving the running saga untouched.
    let purged = store.purge_terminal(Duration::zero()).await.unwrap();
    assert_eq!(purged, 1);
    assert!(store.load(running.saga_id).await.is_ok());
    assert!(matches!(
        store.load(done.saga_id).await,
        Err(StoreError::NotFound(_))
    ));
}

#[tokio::test]
#[serial]
async fn compensation_checkpoints_roundtrip() {
    let store = get_test_store().await;
    let saga = create_saga(&store).await;

    let v2 = store
        .checkpoint(
            saga.saga_id,
            saga.version,
            Checkpoint::step_ok(
                StepResult::ok("validate_owner", 1),
                serde_json::json!({}),
                1,
            ),
        )
        .await
        .unwrap();
    let v3 = store
        .checkpoint(
            saga.saga_id,
            v2.version,
            Checkpoint::step_fatal(StepResult::fatal("reserve_org_quota", 1), 0),
        )
        .await
        .unwrap();
    assert_eq!(v3.status, SagaStatus::Compensating);

    let v4 = store
        .checkpoint(
            saga.saga_id,
            v3.version,
            Checkpoint::compensated("validate_owner", -1),
        )
        .await
        .unwrap();
    let v5 = store
        .checkpoint(saga.saga_id, v4.version, Checkpoint::failed(false))
        .await
        .unwrap();

    let loaded = store.load(saga.saga_id).await.unwrap();
    assert_eq!(loaded.version, v5.version);
    assert_eq!(loaded.status, SagaStatus::Failed);
    assert_eq!(loaded.current_step_index, -1);
    assert!(loaded.step_results[0].compensated);
    assert!(!loaded.unresolved_compensation);
}
