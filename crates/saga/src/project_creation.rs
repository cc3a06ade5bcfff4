//! The `project.create` saga.
//!
//! Creates a project for an organization and assigns its owner, keeping
//! the Account, Organization and Project contexts consistent. Triggered
//! by `project.create.requested` events whose payload carries `owner_id`,
//! `org_id` and `project_id`.

use crate::contexts::{ACCOUNT, ORGANIZATION, PROJECT};
use crate::definition::{SagaDefinition, StepSpec};

/// Definition name; lifecycle topics derive from it.
pub const SAGA_NAME: &str = "project.create";

/// Confirms the prospective owner exists and is active.
pub const STEP_VALIDATE_OWNER: &str = "validate_owner";
/// Consumes one project slot of the organization's quota.
pub const STEP_RESERVE_ORG_QUOTA: &str = "reserve_org_quota";
/// Creates the project record.
pub const STEP_CREATE_PROJECT: &str = "create_project";
/// Makes the validated owner the project owner.
pub const STEP_ASSIGN_OWNER: &str = "assign_owner";

/// Builds the `project.create` saga definition.
pub fn definition() -> SagaDefinition {
    SagaDefinition::new(SAGA_NAME)
        .step(StepSpec::new(STEP_VALIDATE_OWNER, ACCOUNT))
        .step(StepSpec::new(STEP_RESERVE_ORG_QUOTA, ORGANIZATION))
        .step(StepSpec::new(STEP_CREATE_PROJECT, PROJECT))
        .step(StepSpec::new(STEP_ASSIGN_OWNER, PROJECT))
}
