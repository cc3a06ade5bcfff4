//! Saga error types.

use common::SagaId;
use event_bus::BusError;
use saga_store::StoreError;
use thiserror::Error;

/// Errors that can occur during saga orchestration.
#[derive(Debug, Error)]
pub enum SagaError {
    /// No saga definition registered under that name.
    #[error("Unknown saga definition: {0}")]
    UnknownDefinition(String),

    /// A definition with that name is already registered.
    #[error("Duplicate saga definition: {0}")]
    DuplicateDefinition(String),

    /// A step references a bounded context with no registered adapter.
    #[error("No adapter registered for context '{context}' (step '{step}')")]
    UnknownContext { context: String, step: String },

    /// A concurrent worker checkpointed the saga first; this attempt
    /// was abandoned. Not a business failure.
    #[error("Checkpoint conflict on saga {0}, attempt abandoned")]
    CheckpointConflict(SagaId),

    /// The worker pool has shut down and no longer accepts sagas.
    #[error("Worker queue is closed")]
    QueueClosed,

    /// Saga store error.
    #[error("Saga store error: {0}")]
    Store(#[from] StoreError),

    /// Event bus error.
    #[error("Event bus error: {0}")]
    Bus(#[from] BusError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
