//! Durable storage for saga instances.
//!
//! A saga instance is mutated only through append-only checkpoint writes
//! guarded by a version counter, which serializes concurrent workers and
//! makes resume-after-crash a matter of re-reading the latest checkpoint.

pub mod error;
pub mod instance;
pub mod memory;
pub mod postgres;
pub mod store;

pub use common::{CorrelationId, SagaId};
pub use error::{Result, StoreError};
pub use instance::{Checkpoint, SagaInstance, SagaStatus, StepOutcome, StepResult, Version};
pub use memory::InMemorySagaStore;
pub use postgres::PostgresSagaStore;
pub use store::{SagaStore, SagaStoreExt};
