//! Shared identifier types used across the saga orchestration crates.

pub mod types;

pub use types::{CorrelationId, EventId, SagaId};
