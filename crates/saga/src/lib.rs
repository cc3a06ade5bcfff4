//! Saga orchestration for cross-context consistency.
//!
//! This crate coordinates multi-step, compensable business transactions
//! spanning the Account, Organization and Project bounded contexts.
//! A saga runs its forward steps in order, checkpointing after each one;
//! a fatal step failure runs the compensations of every completed step
//! in reverse order, restoring each touched context to its prior state.
//!
//! Two sagas ship with the platform:
//! 1. `project.create` — project creation with owner assignment
//! 2. `user.delete` — user deletion with project-ownership transfer
//!
//! Steps execute at least once, never exactly once: crash recovery
//! re-reads the last checkpoint and may re-run a step whose effect was
//! already applied, so every forward and compensating operation is
//! idempotent.

pub mod contexts;
pub mod definition;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod project_creation;
pub mod registry;
pub mod user_deletion;
pub mod worker;

pub use contexts::{
    ContextAdapter, InMemoryAccountContext, InMemoryOrganizationContext, InMemoryProjectContext,
    StepError,
};
pub use definition::{SagaDefinition, StepSpec};
pub use error::SagaError;
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use registry::StepRegistry;
pub use worker::{SagaQueue, WorkerConfig, WorkerPool};
