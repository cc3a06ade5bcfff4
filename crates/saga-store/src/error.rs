use thiserror::Error;

use common::SagaId;

use crate::instance::{SagaStatus, Version};

/// Errors that can occur when interacting with the saga instance store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A concurrent checkpoint already advanced the instance.
    /// The caller should reload and retry, or abandon the attempt.
    #[error(
        "Optimistic conflict for saga {saga_id}: expected version {expected}, found {actual}"
    )]
    OptimisticConflict {
        saga_id: SagaId,
        expected: Version,
        actual: Version,
    },

    /// The saga instance was not found in the store.
    #[error("Saga not found: {0}")]
    NotFound(SagaId),

    /// The instance already reached a terminal status; it accepts no
    /// further checkpoints.
    #[error("Saga {saga_id} is already {status} and cannot be checkpointed")]
    Terminal {
        saga_id: SagaId,
        status: SagaStatus,
    },

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for saga store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
