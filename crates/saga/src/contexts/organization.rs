//! Organization bounded context.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::json;

use crate::contexts::{ContextAdapter, FailureInjector, ORGANIZATION, StepError, require_str};
use crate::project_creation::STEP_RESERVE_ORG_QUOTA;
use crate::user_deletion::STEP_REMOVE_ORG_MEMBERSHIPS;

#[derive(Debug, Clone)]
struct OrgRecord {
    /// Maximum number of projects the organization may hold.
    project_quota: usize,
    /// Project ids holding a quota slot, keyed so re-reserving the
    /// same project consumes nothing.
    reservations: HashSet<String>,
    members: HashSet<String>,
}

/// In-memory Organization context backed by its own org repository.
#[derive(Debug, Default, Clone)]
pub struct InMemoryOrganizationContext {
    orgs: Arc<RwLock<HashMap<String, OrgRecord>>>,
    injector: FailureInjector,
}

impl InMemoryOrganizationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an organization with the given project quota.
    pub fn add_org(&self, org_id: &str, project_quota: usize) {
        self.orgs.write().unwrap().insert(
            org_id.to_string(),
            OrgRecord {
                project_quota,
                reservations: HashSet::new(),
                members: HashSet::new(),
            },
        );
    }

    pub fn add_member(&self, org_id: &str, user_id: &str) {
        if let Some(org) = self.orgs.write().unwrap().get_mut(org_id) {
            org.members.insert(user_id.to_string());
        }
    }

    pub fn is_member(&self, org_id: &str, user_id: &str) -> bool {
        self.orgs
            .read()
            .unwrap()
            .get(org_id)
            .is_some_and(|o| o.members.contains(user_id))
    }

    pub fn reservation_count(&self, org_id: &str) -> usize {
        self.orgs
            .read()
            .unwrap()
            .get(org_id)
            .map_or(0, |o| o.reservations.len())
    }

    pub fn injector(&self) -> &FailureInjector {
        &self.injector
    }
}

#[async_trait]
impl ContextAdapter for InMemoryOrganizationContext {
    fn context(&self) -> &'static str {
        ORGANIZATION
    }

    async fn forward(
        &self,
        step_name: &str,
        mut payload: serde_json::Value,
    ) -> Result<serde_json::Value, StepError> {
        self.injector.check(step_name)?;
        match step_name {
            STEP_RESERVE_ORG_QUOTA => {
                let org_id = require_str(&payload, "org_id")?.to_string();
                let project_id = require_str(&payload, "project_id")?.to_string();

                let mut orgs = self.orgs.write().unwrap();
                let org = orgs
                    .get_mut(&org_id)
                    .ok_or_else(|| StepError::Fatal(format!("unknown organization '{org_id}'")))?;
                if !org.reservations.contains(&project_id) {
                    if org.reservations.len() >= org.project_quota {
                        return Err(StepError::Fatal(format!(
                            "organization '{org_id}' has no remaining project quota"
                        )));
                    }
                    org.reservations.insert(project_id);
                }
                drop(orgs);

                payload["quota_reserved"] = json!(true);
                Ok(payload)
            }
            STEP_REMOVE_ORG_MEMBERSHIPS => {
                if payload.get("removed_org_ids").is_some() {
                    return Ok(payload);
                }
                let user_id = require_str(&payload, "user_id")?.to_string();

                let mut removed: Vec<String> = Vec::new();
                let mut orgs = self.orgs.write().unwrap();
                for (org_id, org) in orgs.iter_mut() {
                    if org.members.remove(&user_id) {
                        removed.push(org_id.clone());
                    }
                }
                drop(orgs);
                removed.sort();

                payload["removed_org_ids"] = json!(removed);
                Ok(payload)
            }
            other => Err(StepError::Fatal(format!(
                "organization context does not implement step '{other}'"
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
            STEP_RESERVE_ORG_QUOTA => {
                let org_id = require_str(payload, "org_id")?;
                let project_id = require_str(payload, "project_id")?;
                if let Some(org) = self.orgs.write().unwrap().get_mut(org_id) {
                    org.reservations.remove(project_id);
                }
                Ok(())
            }
            STEP_REMOVE_ORG_MEMBERSHIPS => {
                let user_id = require_str(payload, "user_id")?;
                let removed = payload
                    .get("removed_org_ids")
                    .and_then(|v| v.as_array())
                    .cloned()
                    .unwrap_or_default();

                let mut orgs = self.orgs.write().unwrap();
                for org_id in removed.iter().filter_map(|v| v.as_str()) {
                    if let Some(org) = orgs.get_mut(org_id) {
                        org.members.insert(user_id.to_string());
                    }
                }
                Ok(())
            }
            other => Err(StepError::Fatal(format!(
                "organization context does not implement step '{other}'"
            ))),
        }
    }
}
