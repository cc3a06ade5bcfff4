use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::RwLock;

use common::{CorrelationId, SagaId};

use crate::instance::{Checkpoint, SagaInstance, SagaStatus, Version};
use crate::store::SagaStore;
use crate::{Result, StoreError};

/// In-memory saga store implementation.
///
/// Keeps the full append-only checkpoint history per saga, the same shape
/// the PostgreSQL implementation persists; `load` returns the latest
/// checkpoint. Used by tests and single-node runs.
#[derive(Clone, Default)]
pub struct InMemorySagaStore {
    sagas: Arc<RwLock<HashMap<SagaId, Vec<SagaInstance>>>>,
}

impl InMemorySagaStore {
    /// Creates a new empty in-memory saga store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of saga instances stored.
    pub async fn instance_count(&self) -> usize {
        self.sagas.read().await.len()
    }

    /// Returns the number of checkpoints written for a saga.
    pub async fn checkpoint_count(&self, saga_id: SagaId) -> usize {
        self.sagas
            .read()
            .await
            .get(&saga_id)
            .map_or(0, Vec::len)
    }

    /// Returns the full checkpoint history of a saga, oldest first.
    pub async fn history(&self, saga_id: SagaId) -> Vec<SagaInstance> {
        self.sagas
            .read()
            .await
            .get(&saga_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl SagaStore for InMemorySagaStore {
    async fn create(
        &self,
        saga_id: SagaId,
        definition_name: &str,
        correlation_id: CorrelationId,
        payload: serde_json::Value,
    ) -> Result<SagaInstance> {
        let mut sagas = self.sagas.write().await;
        if let Some(history) = sagas.get(&saga_id) {
            // Redelivered trigger: hand back the existing instance.
            return Ok(history.last().cloned().expect("history is never empty"));
        }

        let instance = SagaInstance::new(saga_id, definition_name, correlation_id, payload);
        sagas.insert(saga_id, vec![instance.clone()]);
        metrics::counter!("sagas_created").increment(1);
        Ok(instance)
    }

    async fn checkpoint(
        &self,
        saga_id: SagaId,
        expected_version: Version,
        checkpoint: Checkpoint,
    ) -> Result<SagaInstance> {
        let mut sagas = self.sagas.write().await;
        let history = sagas
            .get_mut(&saga_id)
            .ok_or(StoreError::NotFound(saga_id))?;
        let current = history.last().expect("history is never empty");

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

        let next = current.with_checkpoint(checkpoint);
        history.push(next.clone());
        metrics::counter!("checkpoints_written").increment(1);
        Ok(next)
    }

    async fn load(&self, saga_id: SagaId) -> Result<SagaInstance> {
        let sagas = self.sagas.read().await;
        sagas
            .get(&saga_id)
            .and_then(|history| history.last().cloned())
            .ok_or(StoreError::NotFound(saga_id))
    }

    async fn list_incomplete(&self) -> Result<Vec<SagaInstance>> {
        let sagas = self.sagas.read().await;
        let mut incomplete: Vec<SagaInstance> = sagas
            .values()
            .filter_map(|history| history.last())
            .filter(|instance| !instance.status.is_terminal())
            .cloned()
            .collect();
        incomplete.sort_by_key(|instance| instance.updated_at);
        Ok(incomplete)
    }

    async fn purge_terminal(&self, retention: Duration) -> Result<u64> {
        let cutoff = Utc::now() - retention;
        let mut sagas = self.sagas.write().await;
        let before = sagas.len();
        sagas.retain(|_, history| {
            let last = history.last().expect("history is never empty");
            !(last.status.is_terminal() && last.updated_at < cutoff)
        });
        Ok((before - sagas.len()) as u64)
    }
}
