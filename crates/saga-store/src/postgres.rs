use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use common::{CorrelationId, SagaId};

use crate::instance::{Checkpoint, SagaInstance, SagaStatus, StepResult, Version};
use crate::store::SagaStore;
use crate::{Result, StoreError};

/// PostgreSQL-backed saga instance store.
///
/// Checkpoints are append-only rows in `saga_checkpoints`; the
/// `UNIQUE (saga_id, version)` constraint is what turns a lost
/// optimistic race into an `OptimisticConflict` instead of a lost write.
#[derive(Clone)]
pub struct PostgresSagaStore {
    pool: PgPool,
}

const LATEST_CHECKPOINTS: &str = r#"
    SELECT DISTINCT ON (saga_id)
        saga_id, version, definition_name, correlation_id, status,
        step_index, step_results, payload, unresolved_compensation,
        created_at, updated_at
    FROM saga_checkpoints
    ORDER BY saga_id, version DESC
"#;

impl PostgresSagaStore {
    /// Creates a new PostgreSQL saga store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects to the database and creates a store over a fresh pool.
    pub async fn connect(database_url: &str) -> std::result::Result<Self, sqlx::Error> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await
    }

    fn row_to_instance(row: PgRow) -> Result<SagaInstance> {
        let step_results_json: serde_json::Value = row.try_get("step_results")?;
        let step_results: Vec<StepResult> = serde_json::from_value(step_results_json)?;
        let status_str: String = row.try_get("status")?;
        let status = SagaStatus::parse(&status_str).ok_or_else(|| {
            StoreError::Serialization(serde_json::Error::io(std::io::Error::other(format!(
                "unknown saga status '{status_str}'"
            ))))
        })?;

        Ok(SagaInstance {
            saga_id: SagaId::from_uuid(row.try_get::<Uuid, _>("saga_id")?),
            definition_name: row.try_get("definition_name")?,
            correlation_id: CorrelationId::from_uuid(row.try_get::<Uuid, _>("correlation_id")?),
            status,
            current_step_index: row.try_get("step_index")?,
            step_results,
            payload: row.try_get("payload")?,
            unresolved_compensation: row.try_get("unresolved_compensation")?,
            version: Version::new(row.try_get("version")?),
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn insert_checkpoint<'e, E>(executor: E, instance: &SagaInstance) -> Result<()>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let step_results = serde_json::to_value(&instance.step_results)?;

        sqlx::query(
            r#"
            INSERT INTO saga_checkpoints
                (saga_id, version, definition_name, correlation_id, status,
                 step_index, step_results, payload, unresolved_compensation,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(instance.saga_id.as_uuid())
        .bind(instance.version.as_i64())
        .bind(&instance.definition_name)
        .bind(instance.correlation_id.as_uuid())
        .bind(instance.status.as_str())
        .bind(instance.current_step_index)
        .bind(step_results)
        .bind(&instance.payload)
        .bind(instance.unresolved_compensation)
        .bind(instance.created_at)
        .bind(instance.updated_at)
        .execute(executor)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("unique_saga_version")
            {
                return StoreError::OptimisticConflict {
                    saga_id: instance.saga_id,
                    expected: Version::new(instance.version.as_i64() - 1),
                    actual: instance.version,
                };
            }
            StoreError::Database(e)
        })?;

        Ok(())
    }
}

#[async_trait]
impl SagaStore for PostgresSagaStore {
    async fn create(
        &self,
        saga_id: SagaId,
        definition_name: &str,
        correlation_id: CorrelationId,
        payload: serde_json::Value,
    ) -> Result<SagaInstance> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query(
            r#"
            SELECT saga_id, version, definition_name, correlation_id, status,
                   step_index, step_results, payload, unresolved_compensation,
                   created_at, updated_at
            FROM saga_checkpoints
            WHERE saga_id = $1
            ORDER BY version DESC
            LIMIT 1
            "#,
        )
        .bind(saga_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(row) = existing {
            tx.commit().await?;
            return Self::row_to_instance(row);
        }

        let instance = SagaInstance::new(saga_id, definition_name, correlation_id, payload);
        Self::insert_checkpoint(&mut *tx, &instance).await?;
        tx.commit().await?;

        metrics::counter!("sagas_created").increment(1);
        Ok(instance)
    }

    async fn checkpoint(
        &self,
        saga_id: SagaId,
        expected_version: Version,
        checkpoint: Checkpoint,
    ) -> Result<SagaInstance> {
        let current = self.load(saga_id).await?;

        if current.version != expected_version {
            return Err(StoreError::OptimisticConflict {
                saga_id,
                expected: expected_version,
                actual: current.version,
            });
        }
        // Terminal states are sealed; the status machine never re-enters
        // Running or Compensating.
        if current.status.is_terminal() {
            return Err(StoreError::Terminal {
                saga_id,
                status: current.status,
            });
        }

        // The unique constraint catches the race where another worker
        // checkpointed between the load above and this insert.
        let next = current.with_checkpoint(checkpoint);
        Self::insert_checkpoint(&self.pool, &next).await?;

        metrics::counter!("checkpoints_written").increment(1);
        Ok(next)
    }

    async fn load(&self, saga_id: SagaId) -> Result<SagaInstance> {
        let row = sqlx::query(
            r#"
            SELECT saga_id, version, definition_name, correlation_id, status,
                   step_index, step_results, payload, unresolved_compensation,
                   created_at, updated_at
            FROM saga_checkpoints
            WHERE saga_id = $1
            ORDER BY version DESC
            LIMIT 1
            "#,
        )
        .bind(saga_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Self::row_to_instance(row),
            None => Err(StoreError::NotFound(saga_id)),
        }
    }

    async fn list_incomplete(&self) -> Result<Vec<SagaInstance>> {
        let sql = format!(
            r#"
            SELECT * FROM ({LATEST_CHECKPOINTS}) latest
            WHERE status IN ('Running', 'Compensating')
            ORDER BY updated_at ASC
            "#
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::row_to_instance).collect()
    }

    async fn purge_terminal(&self, retention: chrono::Duration) -> Result<u64> {
        let cutoff = Utc::now() - retention;
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            r#"
            SELECT saga_id FROM ({LATEST_CHECKPOINTS}) latest
            WHERE status IN ('Completed', 'Failed') AND updated_at < $1
            "#
        );
        let victims: Vec<Uuid> = sqlx::query_scalar(&sql)
            .bind(cutoff)
            .fetch_all(&mut *tx)
            .await?;

        if victims.is_empty() {
            tx.commit().await?;
            return Ok(0);
        }

        sqlx::query("DELETE FROM saga_checkpoints WHERE saga_id = ANY($1)")
            .bind(&victims)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(victims.len() as u64)
    }
}
