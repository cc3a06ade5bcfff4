//! Account bounded context.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde_json::json;

use crate::contexts::{ACCOUNT, ContextAdapter, FailureInjector, StepError, require_str};
use crate::project_creation::STEP_VALIDATE_OWNER;
use crate::user_deletion::STEP_DEACTIVATE_ACCOUNT;

/// A user account as the Account context sees it.
#[derive(Debug, Clone)]
pub struct AccountRecord {
    pub user_id: String,
    pub active: bool,
}

/// In-memory Account context backed by its own account repository.
#[derive(Debug, Default, Clone)]
pub struct InMemoryAccountContext {
    accounts: Arc<RwLock<HashMap<String, AccountRecord>>>,
    injector: FailureInjector,
}

impl InMemoryAccountContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an active account.
    pub fn add_account(&self, user_id: &str) {
        self.insert_account(user_id, true);
    }

    /// Seeds an account that is already deactivated.
    pub fn add_inactive_account(&self, user_id: &str) {
        self.insert_account(user_id, false);
    }

    fn insert_account(&self, user_id: &str, active: bool) {
        self.accounts.write().unwrap().insert(
            user_id.to_string(),
            AccountRecord {
                user_id: user_id.to_string(),
                active,
            },
        );
    }

    pub fn is_active(&self, user_id: &str) -> bool {
        self.accounts
            .read()
            .unwrap()
            .get(user_id)
            .is_some_and(|a| a.active)
    }

    pub fn injector(&self) -> &FailureInjector {
        &self.injector
    }

    fn set_active(&self, user_id: &str, active: bool) -> Result<(), StepError> {
        let mut accounts = self.accounts.write().unwrap();
        match accounts.get_mut(user_id) {
            Some(account) => {
                account.active = active;
                Ok(())
            }
            None => Err(StepError::Fatal(format!("unknown account '{user_id}'"))),
        }
    }
}

#[async_trait]
impl ContextAdapter for InMemoryAccountContext {
    fn context(&self) -> &'static str {
        ACCOUNT
    }

    async fn forward(
        &self,
        step_name: &str,
        mut payload: serde_json::Value,
    ) -> Result<serde_json::Value, StepError> {
        self.injector.check(step_name)?;
        match step_name {
            STEP_VALIDATE_OWNER => {
                let owner_id = require_str(&payload, "owner_id")?;
                if !self.is_active(owner_id) {
                    return Err(StepError::Fatal(format!(
                        "owner '{owner_id}' does not exist or is inactive"
                    )));
                }
                payload["owner_validated"] = json!(true);
                Ok(payload)
            }
            STEP_DEACTIVATE_ACCOUNT => {
                // The marker is present once this step has run; its value
                // records whether the account was active beforehand.
                if payload.get("account_deactivated").is_some() {
                    return Ok(payload);
                }
                let user_id = require_str(&payload, "user_id")?.to_string();

                let mut accounts = self.accounts.write().unwrap();
                let account = accounts
                    .get_mut(&user_id)
                    .ok_or_else(|| StepError::Fatal(format!("unknown account '{user_id}'")))?;
                let was_active = account.active;
                account.active = false;
                drop(accounts);

                payload["account_deactivated"] = json!(was_active);
                Ok(payload)
            }
            other => Err(StepError::Fatal(format!(
                "account context does not implement step '{other}'"
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
            // Validation has no side effects to undo.
            STEP_VALIDATE_OWNER => Ok(()),
            STEP_DEACTIVATE_ACCOUNT => {
                // Only reactivate if this workflow did the deactivation;
                // an account that was already inactive stays inactive.
                if payload
                    .get("account_deactivated")
                    .is_some_and(|v| v.as_bool() == Some(true))
                {
                    let user_id = require_str(payload, "user_id")?;
                    self.set_active(user_id, true)?;
                }
                Ok(())
            }
            other => Err(StepError::Fatal(format!(
                "account context does not implement step '{other}'"
            ))),
        }
    }
}
