//! Project bounded context.
//!
//! Owns projects plus their tasks and documents, so it serves steps in
//! both the project-creation and user-deletion workflows.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::json;

use crate::contexts::{ContextAdapter, FailureInjector, PROJECT, StepError, require_str};
use crate::project_creation::{STEP_ASSIGN_OWNER, STEP_CREATE_PROJECT};
use crate::user_deletion::{
    STEP_REASSIGN_TASKS, STEP_TRANSFER_DOCUMENT_OWNERSHIP, STEP_TRANSFER_PROJECT_OWNERSHIP,
};

#[derive(Debug, Clone)]
pub struct ProjectRecord {
    pub project_id: String,
    pub org_id: String,
    pub owner_id: Option<String>,
    pub members: Vec<String>,
}

#[derive(Debug, Clone)]
struct TaskRecord {
    project_id: String,
    assignee: String,
}

#[derive(Debug, Clone)]
struct DocumentRecord {
    project_id: String,
    owner_id: String,
}

#[derive(Debug, Default)]
struct ProjectState {
    projects: HashMap<String, ProjectRecord>,
    tasks: HashMap<String, TaskRecord>,
    documents: HashMap<String, DocumentRecord>,
}

/// In-memory Project context backed by its own project repository.
#[derive(Debug, Default, Clone)]
pub struct InMemoryProjectContext {
    state: Arc<RwLock<ProjectState>>,
    injector: FailureInjector,
}

impl InMemoryProjectContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a project with an owner and member list.
    pub fn add_project(&self, project_id: &str, org_id: &str, owner_id: &str, members: &[&str]) {
        self.state.write().unwrap().projects.insert(
            project_id.to_string(),
            ProjectRecord {
                project_id: project_id.to_string(),
                org_id: org_id.to_string(),
                owner_id: Some(owner_id.to_string()),
                members: members.iter().map(|m| m.to_string()).collect(),
            },
        );
    }

    pub fn add_task(&self, task_id: &str, project_id: &str, assignee: &str) {
        self.state.write().unwrap().tasks.insert(
            task_id.to_string(),
            TaskRecord {
                project_id: project_id.to_string(),
                assignee: assignee.to_string(),
            },
        );
    }

    pub fn add_document(&self, document_id: &str, project_id: &str, owner_id: &str) {
        self.state.write().unwrap().documents.insert(
            document_id.to_string(),
            DocumentRecord {
                project_id: project_id.to_string(),
                owner_id: owner_id.to_string(),
            },
        );
    }

    pub fn project(&self, project_id: &str) -> Option<ProjectRecord> {
        self.state.read().unwrap().projects.get(project_id).cloned()
    }

    pub fn project_owner(&self, project_id: &str) -> Option<String> {
        self.state
            .read()
            .unwrap()
            .projects
            .get(project_id)
            .and_then(|p| p.owner_id.clone())
    }

    pub fn task_assignee(&self, task_id: &str) -> Option<String> {
        self.state
            .read()
            .unwrap()
            .tasks
            .get(task_id)
            .map(|t| t.assignee.clone())
    }

    pub fn document_owner(&self, document_id: &str) -> Option<String> {
        self.state
            .read()
            .unwrap()
            .documents
            .get(document_id)
            .map(|d| d.owner_id.clone())
    }

    pub fn injector(&self) -> &FailureInjector {
        &self.injector
    }

    /// Picks the successor owner for a project when its owner leaves:
    /// the first remaining member, falling back to the payload-supplied
    /// `fallback_owner_id`.
    fn successor_for(
        project: &ProjectRecord,
        departing: &str,
        fallback: Option<&str>,
    ) -> Result<String, StepError> {
        project
            .members
            .iter()
            .find(|m| m.as_str() != departing)
            .cloned()
            .or_else(|| fallback.map(str::to_string))
            .ok_or_else(|| {
                StepError::Fatal(format!(
                    "project '{}' has no successor owner and no fallback was supplied",
                    project.project_id
                ))
            })
    }
}

#[async_trait]
impl ContextAdapter for InMemoryProjectContext {
    fn context(&self) -> &'static str {
        PROJECT
    }

    async fn forward(
        &self,
        step_name: &str,
        mut payload: serde_json::Value,
    ) -> Result<serde_json::Value, StepError> {
        self.injector.check(step_name)?;
        match step_name {
            STEP_CREATE_PROJECT => {
                let project_id = require_str(&payload, "project_id")?.to_string();
                let org_id = require_str(&payload, "org_id")?.to_string();
                // The marker is only ever written after a successful
                // insert, so its presence means a redelivered attempt.
                let created_here = payload
                    .get("project_created")
                    .is_some_and(|v| v.as_bool() == Some(true));

                let mut state = self.state.write().unwrap();
                if state.projects.contains_key(&project_id) {
                    if !created_here {
                        return Err(StepError::Fatal(format!(
                            "project '{project_id}' already exists"
                        )));
                    }
                } else {
                    state.projects.insert(
                        project_id.clone(),
                        ProjectRecord {
                            project_id,
                            org_id,
                            owner_id: None,
                            members: Vec::new(),
                        },
                    );
                }
                drop(state);

                payload["project_created"] = json!(true);
                Ok(payload)
            }
            STEP_ASSIGN_OWNER => {
                let project_id = require_str(&payload, "project_id")?.to_string();
                let owner_id = require_str(&payload, "owner_id")?.to_string();

                let mut state = self.state.write().unwrap();
                let project = state.projects.get_mut(&project_id).ok_or_else(|| {
                    StepError::Fatal(format!("unknown project '{project_id}'"))
                })?;
                project.owner_id = Some(owner_id.clone());
                if !project.members.contains(&owner_id) {
                    project.members.push(owner_id);
                }
                drop(state);

                payload["owner_assigned"] = json!(true);
                Ok(payload)
            }
            STEP_TRANSFER_PROJECT_OWNERSHIP => {
                if payload.get("transferred_projects").is_some() {
                    return Ok(payload);
                }
                let user_id = require_str(&payload, "user_id")?.to_string();
                let fallback = payload
                    .get("fallback_owner_id")
                    .and_then(|v| v.as_str())
                    .map(str::to_string);

                let mut state = self.state.write().unwrap();
                let mut owned: Vec<String> = state
                    .projects
                    .values()
                    .filter(|p| p.owner_id.as_deref() == Some(&user_id))
                    .map(|p| p.project_id.clone())
                    .collect();
                owned.sort();

                let mut transfers = Vec::new();
                for project_id in owned {
                    if let Some(project) = state.projects.get_mut(&project_id) {
                        let successor =
                            Self::successor_for(project, &user_id, fallback.as_deref())?;
                        transfers.push(json!({
                            "project_id": project_id,
                            "new_owner_id": successor.clone(),
                        }));
                        project.owner_id = Some(successor);
                    }
                }
                drop(state);

                payload["transferred_projects"] = json!(transfers);
                Ok(payload)
            }
            STEP_REASSIGN_TASKS => {
                if payload.get("reassigned_task_ids").is_some() {
                    return Ok(payload);
                }
                let user_id = require_str(&payload, "user_id")?.to_string();

                let mut state = self.state.write().unwrap();
                let mut reassigned: Vec<String> = Vec::new();
                let owners: HashMap<String, String> = state
                    .projects
                    .values()
                    .filter_map(|p| {
                        p.owner_id
                            .clone()
                            .map(|o| (p.project_id.clone(), o))
                    })
                    .collect();
                for (task_id, task) in state.tasks.iter_mut() {
                    if task.assignee == user_id {
                        let successor = owners.get(&task.project_id).ok_or_else(|| {
                            StepError::Fatal(format!(
                                "task '{task_id}' belongs to an ownerless project"
                            ))
                        })?;
                        task.assignee = successor.clone();
                        reassigned.push(task_id.clone());
                    }
                }
                drop(state);
                reassigned.sort();

                payload["reassigned_task_ids"] = json!(reassigned);
                Ok(payload)
            }
            STEP_TRANSFER_DOCUMENT_OWNERSHIP => {
                if payload.get("transferred_document_ids").is_some() {
                    return Ok(payload);
                }
                let user_id = require_str(&payload, "user_id")?.to_string();

                let mut state = self.state.write().unwrap();
                let mut transferred: Vec<String> = Vec::new();
                let owners: HashMap<String, String> = state
                    .projects
                    .values()
                    .filter_map(|p| {
                        p.owner_id
                            .clone()
                            .map(|o| (p.project_id.clone(), o))
                    })
                    .collect();
                for (document_id, document) in state.documents.iter_mut() {
                    if document.owner_id == user_id {
                        let successor = owners.get(&document.project_id).ok_or_else(|| {
                            StepError::Fatal(format!(
                                "document '{document_id}' belongs to an ownerless project"
                            ))
                        })?;
                        document.owner_id = successor.clone();
                        transferred.push(document_id.clone());
                    }
                }
                drop(state);
                transferred.sort();

                payload["transferred_document_ids"] = json!(transferred);
                Ok(payload)
            }
            other => Err(StepError::Fatal(format!(
                "project context does not implement step '{other}'"
            ))),
        }
    }

    async fn compensate(
        &self,
        step_name: &str,
        payload: &serde_json::Value,
    ) -> Result<(), StepError> {
        self.injector.check_compensation(step_name)?;
        match step_name {
            STEP_CREATE_PROJECT => {
                // Only remove what this workflow inserted; a project that
                // predates the saga is not ours to delete.
                if payload
                    .get("project_created")
                    .is_some_and(|v| v.as_bool() == Some(true))
                {
                    let project_id = require_str(payload, "project_id")?;
                    self.state.write().unwrap().projects.remove(project_id);
                }
                Ok(())
            }
            STEP_ASSIGN_OWNER => {
                let project_id = require_str(payload, "project_id")?;
                if let Some(project) =
                    self.state.write().unwrap().projects.get_mut(project_id)
                {
                    project.owner_id = None;
                }
                Ok(())
            }
            STEP_TRANSFER_PROJECT_OWNERSHIP => {
                let user_id = require_str(payload, "user_id")?;
                let transfers = payload
                    .get("transferred_projects")
                    .and_then(|v| v.as_array())
                    .cloned()
                    .unwrap_or_default();

                let mut state = self.state.write().unwrap();
                for transfer in &transfers {
                    if let Some(project_id) = transfer.get("project_id").and_then(|v| v.as_str())
                        && let Some(project) = state.projects.get_mut(project_id)
                    {
                        project.owner_id = Some(user_id.to_string());
                    }
                }
                Ok(())
            }
            STEP_REASSIGN_TASKS => {
                let user_id = require_str(payload, "user_id")?;
                let reassigned = payload
                    .get("reassigned_task_ids")
                    .and_then(|v| v.as_array())
                    .cloned()
                    .unwrap_or_default();

                let mut state = self.state.write().unwrap();
                for task_id in reassigned.iter().filter_map(|v| v.as_str()) {
                    if let Some(task) = state.tasks.get_mut(task_id) {
                        task.assignee = user_id.to_string();
                    }
                }
                Ok(())
            }
            STEP_TRANSFER_DOCUMENT_OWNERSHIP => {
                let user_id = require_str(payload, "user_id")?;
                let transferred = payload
                    .get("transferred_document_ids")
                    .and_then(|v| v.as_array())
                    .cloned()
                    .unwrap_or_default();

                let mut state = self.state.write().unwrap();
                for document_id in transferred.iter().filter_map(|v| v.as_str()) {
                    if let Some(document) = state.documents.get_mut(document_id) {
                        document.owner_id = user_id.to_string();
                    }
                }
                Ok(())
            }
            other => Err(StepError::Fatal(format!(
                "project context does not implement step '{other}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_assign_then_undo() {
        let ctx = InMemoryProjectContext::new();

        let payload = json!({"project_id": "p-1", "org_id": "acme", "owner_id": "alice"});
        let payload = ctx.forward(STEP_CREATE_PROJECT, payload).await.unwrap();
        let payload = ctx.forward(STEP_ASSIGN_OWNER, payload).await.unwrap();
        assert_eq!(ctx.project_owner("p-1").as_deref(), Some("alice"));

        ctx.compensate(STEP_ASSIGN_OWNER, &payload).await.unwrap();
        assert_eq!(ctx.project_owner("p-1"), None);
        ctx.compensate(STEP_CREATE_PROJECT, &payload).await.unwrap();
        assert!(ctx.project("p-1").is_none());
        // Compensating an already-deleted project is a no-op.
        ctx.compensate(STEP_CREATE_PROJECT, &payload).await.unwrap();
    }

    #[tokio::test]
    async fn creating_over_an_existing_project_fails_without_deleting_it() {
        let ctx = InMemoryProjectContext::new();
        ctx.add_project("p-1", "acme", "bob", &["bob"]);

        let payload = json!({"project_id": "p-1", "org_id": "acme"});
        let err = ctx
            .forward(STEP_CREATE_PROJECT, payload.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::Fatal(_)));

        // Without the creation marker, compensation leaves the
        // pre-existing project untouched.
        ctx.compensate(STEP_CREATE_PROJECT, &payload).await.unwrap();
        assert_eq!(ctx.project_owner("p-1").as_deref(), Some("bob"));

        // A redelivered attempt that did create the project is still
        // accepted and still compensable.
        let payload = ctx
            .forward(STEP_CREATE_PROJECT, json!({"project_id": "p-2", "org_id": "acme"}))
            .await
            .unwrap();
        let again = ctx
            .forward(STEP_CREATE_PROJECT, payload.clone())
            .await
            .unwrap();
        assert_eq!(again, payload);
        ctx.compensate(STEP_CREATE_PROJECT, &payload).await.unwrap();
        assert!(ctx.project("p-2").is_none());
    }

    #[tokio::test]
    async fn ownership_transfers_to_remaining_member() {
        let ctx = InMemoryProjectContext::new();
        ctx.add_project("p-1", "acme", "carol", &["carol", "erin"]);
        ctx.add_project("p-2", "acme", "carol", &["carol"]);

        let payload = json!({"user_id": "carol", "fallback_owner_id": "admin"});
        let payload = ctx
            .forward(STEP_TRANSFER_PROJECT_OWNERSHIP, payload)
            .await
            .unwrap();

        assert_eq!(ctx.project_owner("p-1").as_deref(), Some("erin"));
        // No other member, so the fallback takes over.
        assert_eq!(ctx.project_owner("p-2").as_deref(), Some("admin"));
        assert_eq!(
            payload["transferred_projects"],
            json!([
                {"project_id": "p-1", "new_owner_id": "erin"},
                {"project_id": "p-2", "new_owner_id": "admin"},
            ])
        );

        ctx.compensate(STEP_TRANSFER_PROJECT_OWNERSHIP, &payload)
            .await
            .unwrap();
        assert_eq!(ctx.project_owner("p-1").as_deref(), Some("carol"));
        assert_eq!(ctx.project_owner("p-2").as_deref(), Some("carol"));
    }

    #[tokio::test]
    async fn tasks_and_documents_follow_the_project_owner() {
        let ctx = InMemoryProjectContext::new();
        ctx.add_project("p-1", "acme", "erin", &["erin"]);
        ctx.add_task("t-1", "p-1", "carol");
        ctx.add_task("t-2", "p-1", "erin");
        ctx.add_document("d-1", "p-1", "carol");

        let payload = json!({"user_id": "carol"});
        let payload = ctx.forward(STEP_REASSIGN_TASKS, payload).await.unwrap();
        let payload = ctx
            .forward(STEP_TRANSFER_DOCUMENT_OWNERSHIP, payload)
            .await
            .unwrap();

        assert_eq!(ctx.task_assignee("t-1").as_deref(), Some("erin"));
        assert_eq!(ctx.task_assignee("t-2").as_deref(), Some("erin"));
        assert_eq!(ctx.document_owner("d-1").as_deref(), Some("erin"));
        assert_eq!(payload["reassigned_task_ids"], json!(["t-1"]));
        assert_eq!(payload["transferred_document_ids"], json!(["d-1"]));

        ctx.compensate(STEP_TRANSFER_DOCUMENT_OWNERSHIP, &payload)
            .await
            .unwrap();
        ctx.compensate(STEP_REASSIGN_TASKS, &payload).await.unwrap();
        assert_eq!(ctx.task_assignee("t-1").as_deref(), Some("carol"));
        assert_eq!(ctx.document_owner("d-1").as_deref(), Some("carol"));
    }

    #[tokio::test]
    async fn redelivered_transfer_is_idempotent() {
        let ctx = InMemoryProjectContext::new();
        ctx.add_project("p-1", "acme", "carol", &["carol", "erin"]);

        let payload = json!({"user_id": "carol"});
        let payload = ctx
            .forward(STEP_TRANSFER_PROJECT_OWNERSHIP, payload)
            .await
            .unwrap();
        let again = ctx
            .forward(STEP_TRANSFER_PROJECT_OWNERSHIP, payload.clone())
            .await
            .unwrap();
        assert_eq!(again, payload);
        assert_eq!(ctx.project_owner("p-1").as_deref(), Some("erin"));
    }
}
