//! Bounded-context adapters.
//!
//! Each adapter implements the step contract for one bounded context
//! (Account, Organization, Project) against that context's own
//! repository. Adapters never call another context's repository; all
//! cross-context effects happen through further saga steps.
//!
//! Every forward and compensating operation is idempotent: re-invoking
//! it with the same payload produces the same observable effect as
//! invoking it once. Adapters achieve this by recording markers in the
//! payload on first execution and short-circuiting when the marker is
//! already present.

pub mod account;
pub mod organization;
pub mod project;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use thiserror::Error;

pub use account::InMemoryAccountContext;
pub use organization::InMemoryOrganizationContext;
pub use project::InMemoryProjectContext;

/// Context name for the Account bounded context.
pub const ACCOUNT: &str = "account";
/// Context name for the Organization bounded context.
pub const ORGANIZATION: &str = "organization";
/// Context name for the Project bounded context.
pub const PROJECT: &str = "project";

/// Errors a step operation can return.
#[derive(Debug, Clone, Error)]
pub enum StepError {
    /// Network/timeout-class failure; retried per the step policy.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Business-rule violation; triggers compensation immediately.
    #[error("fatal failure: {0}")]
    Fatal(String),
}

/// The narrow contract every bounded context implements for its steps.
///
/// Adapters receive only the saga payload, never the saga instance;
/// a forward op returns the transformed payload, which the orchestrator
/// snapshots in the next checkpoint.
#[async_trait]
pub trait ContextAdapter: Send + Sync {
    /// The context name steps are routed by.
    fn context(&self) -> &'static str;

    /// Executes a forward operation, returning the new payload.
    async fn forward(
        &self,
        step_name: &str,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, StepError>;

    /// Semantically undoes a previously completed forward operation.
    async fn compensate(&self, step_name: &str, payload: &serde_json::Value)
    -> Result<(), StepError>;
}

/// Scripted failure injection shared by the in-memory adapters.
///
/// Tests (and the chaos tooling) use this to force transient or fatal
/// failures on specific steps.
#[derive(Debug, Default, Clone)]
pub struct FailureInjector {
    plan: Arc<RwLock<FailurePlan>>,
}

#[derive(Debug, Default)]
struct FailurePlan {
    /// Steps whose forward op fails fatally on every invocation.
    fatal: HashMap<String, String>,
    /// Steps whose forward op fails transiently for the next N invocations.
    transient: HashMap<String, u32>,
    /// Steps whose compensation fails fatally on every invocation.
    compensation_fatal: HashMap<String, String>,
}

impl FailureInjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the given step fail fatally with the given reason.
    pub fn fail_fatal(&self, step_name: &str, reason: &str) {
        self.plan
            .write()
            .unwrap()
            .fatal
            .insert(step_name.to_string(), reason.to_string());
    }

    /// Makes the given step fail transiently for the next `times` calls.
    pub fn fail_transient(&self, step_name: &str, times: u32) {
        self.plan
            .write()
            .unwrap()
            .transient
            .insert(step_name.to_string(), times);
    }

    /// Makes the given step's compensation fail fatally.
    pub fn fail_fatal_compensation(&self, step_name: &str, reason: &str) {
        self.plan
            .write()
            .unwrap()
            .compensation_fatal
            .insert(step_name.to_string(), reason.to_string());
    }

    /// Clears all scripted failures.
    pub fn reset(&self) {
        let mut plan = self.plan.write().unwrap();
        plan.fatal.clear();
        plan.transient.clear();
        plan.compensation_fatal.clear();
    }

    /// Returns the scripted failure for this step, if any.
    pub fn check(&self, step_name: &str) -> Result<(), StepError> {
        let mut plan = self.plan.write().unwrap();
        if let Some(reason) = plan.fatal.get(step_name) {
            return Err(StepError::Fatal(reason.clone()));
        }
        if let Some(remaining) = plan.transient.get_mut(step_name) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(StepError::Transient("injected transient failure".to_string()));
            }
        }
        Ok(())
    }

    /// Returns the scripted compensation failure for this step, if any.
    pub fn check_compensation(&self, step_name: &str) -> Result<(), StepError> {
        let plan = self.plan.read().unwrap();
        match plan.compensation_fatal.get(step_name) {
            Some(reason) => Err(StepError::Fatal(reason.clone())),
            None => Ok(()),
        }
    }
}

/// Reads a required string field from the payload.
pub(crate) fn require_str<'a>(
    payload: &'a serde_json::Value,
    field: &str,
) -> Result<&'a str, StepError> {
    payload
        .get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| StepError::Fatal(format!("payload is missing required field '{field}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn injector_fatal_persists() {
        let injector = FailureInjector::new();
        injector.fail_fatal("create_project", "quota exceeded");

        assert!(matches!(
            injector.check("create_project"),
            Err(StepError::Fatal(_))
        ));
        // Fatal failures do not decay.
        assert!(injector.check("create_project").is_err());
        assert!(injector.check("assign_owner").is_ok());
    }

    #[test]
    fn injector_transient_decays() {
        let injector = FailureInjector::new();
        injector.fail_transient("create_project", 2);

        assert!(matches!(
            injector.check("create_project"),
            Err(StepError::Transient(_))
        ));
        assert!(injector.check("create_project").is_err());
        assert!(injector.check("create_project").is_ok());
    }

    #[test]
    fn require_str_missing_field_is_fatal() {
        let payload = serde_json::json!({"present": "yes"});
        assert_eq!(require_str(&payload, "present").unwrap(), "yes");
        assert!(matches!(
            require_str(&payload, "absent"),
            Err(StepError::Fatal(_))
        ));
    }
}
