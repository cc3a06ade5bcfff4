//! The `user.delete` saga.
//!
//! Removes a user from the platform while handing their projects, tasks
//! and documents over to successors. Triggered by `user.delete.requested`
//! events whose payload carries `user_id` and optionally
//! `fallback_owner_id` for projects with no other member.

use crate::contexts::{ACCOUNT, ORGANIZATION, PROJECT};
use crate::definition::{SagaDefinition, StepSpec};

/// Definition name; lifecycle topics derive from it.
pub const SAGA_NAME: &str = "user.delete";

/// Deactivates the account so no new activity lands on it mid-saga.
pub const STEP_DEACTIVATE_ACCOUNT: &str = "deactivate_account";
/// Removes the user from every organization they belong to.
pub const STEP_REMOVE_ORG_MEMBERSHIPS: &str = "remove_org_memberships";
/// Hands every project the user owns to a successor owner.
pub const STEP_TRANSFER_PROJECT_OWNERSHIP: &str = "transfer_project_ownership";
/// Reassigns the user's open tasks to each project's owner.
pub const STEP_REASSIGN_TASKS: &str = "reassign_tasks";
/// Hands the user's documents to each project's owner.
pub const STEP_TRANSFER_DOCUMENT_OWNERSHIP: &str = "transfer_document_ownership";

/// Builds the `user.delete` saga definition.
pub fn definition() -> SagaDefinition {
    SagaDefinition::new(SAGA_NAME)
        .step(StepSpec::new(STEP_DEACTIVATE_ACCOUNT, ACCOUNT))
        .step(StepSpec::new(STEP_REMOVE_ORG_MEMBERSHIPS, ORGANIZATION))
        .step(StepSpec::new(STEP_TRANSFER_PROJECT_OWNERSHIP, PROJECT))
        .step(StepSpec::new(STEP_REASSIGN_TASKS, PROJECT))
        .step(StepSpec::new(STEP_TRANSFER_DOCUMENT_OWNERSHIP, PROJECT))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ownership_transfers_before_task_reassignment() {
        let definition = definition();
        assert_eq!(definition.name, "user.delete");
        assert_eq!(definition.failed_topic(), "user.delete.failed");

        let names: Vec<&str> = definition.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                STEP_DEACTIVATE_ACCOUNT,
                STEP_REMOVE_ORG_MEMBERSHIPS,
                STEP_TRANSFER_PROJECT_OWNERSHIP,
                STEP_REASSIGN_TASKS,
                STEP_TRANSFER_DOCUMENT_OWNERSHIP,
            ]
        );
    }
}
