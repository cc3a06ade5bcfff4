use async_trait::async_trait;
use chrono::Duration;

use common::{CorrelationId, SagaId};

use crate::instance::{Checkpoint, SagaInstance, Version};
use crate::{Result, StoreError};

/// Core trait for saga instance store implementations.
///
/// The store is the only shared mutable resource of the orchestrator;
/// all mutation goes through `checkpoint`, which is version-guarded.
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait SagaStore: Send + Sync {
    /// Creates a new instance in `Running` state at step 0.
    ///
    /// Creation is idempotent for a given `saga_id`: if an instance
    /// already exists it is returned unchanged. Trigger handlers derive
    /// the saga ID from the trigger event ID, so at-least-once
    /// redelivery of a trigger never spawns a duplicate saga.
    async fn create(
        &self,
        saga_id: SagaId,
        definition_name: &str,
        correlation_id: CorrelationId,
        payload: serde_json::Value,
    ) -> Result<SagaInstance>;

    /// Atomically applies a checkpoint to the instance.
    ///
    /// Fails with `OptimisticConflict` if `expected_version` no longer
    /// matches the stored version, signaling that a concurrent worker
    /// advanced the saga. Returns the instance as of the new checkpoint.
    async fn checkpoint(
        &self,
        saga_id: SagaId,
        expected_version: Version,
        checkpoint: Checkpoint,
    ) -> Result<SagaInstance>;

    /// Loads the latest checkpoint of an instance.
    ///
    /// Fails with `NotFound` if the saga does not exist.
    async fn load(&self, saga_id: SagaId) -> Result<SagaInstance>;

    /// Lists instances still in `Running` or `Compensating` state,
    /// oldest first. Used by the startup/periodic crash-recovery scan.
    async fn list_incomplete(&self) -> Result<Vec<SagaInstance>>;

    /// Archives terminal instances whose last update is older than the
    /// retention window. Returns the number of sagas purged.
    async fn purge_terminal(&self, retention: Duration) -> Result<u64>;
}

/// Extension trait providing convenience methods for saga stores.
#[async_trait]
pub trait SagaStoreExt: SagaStore {
    /// Loads an instance, returning None instead of `NotFound`.
    async fn try_load(&self, saga_id: SagaId) -> Result<Option<SagaInstance>> {
        match self.load(saga_id).await {
            Ok(instance) => Ok(Some(instance)),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

impl<T: SagaStore + ?Sized> SagaStoreExt for T {}
