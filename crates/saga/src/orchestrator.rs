//! The saga orchestrator state machine.
//!
//! The orchestrator drives one saga instance at a time through its
//! definition: forward steps in order while `Running`, compensations in
//! reverse order while `Compensating`. Every transition is written as a
//! version-guarded checkpoint, so a crashed run resumes from the latest
//! checkpoint and a concurrent run loses the version race and abandons
//! its attempt.
//!
//! Lifecycle events are published before the terminal checkpoint is
//! written. A crash between the two re-publishes the event on resume,
//! which at-least-once consumers must tolerate; the reverse order would
//! silently lose the outcome.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use common::{CorrelationId, SagaId};
use event_bus::{EventBus, RetryPolicy};
use metrics::{counter, histogram};
use saga_store::{Checkpoint, SagaInstance, SagaStatus, SagaStore, StepResult, StoreError};

use crate::contexts::{ContextAdapter, StepError};
use crate::definition::{SagaDefinition, StepSpec};
use crate::error::{Result, SagaError};
use crate::events;
use crate::registry::StepRegistry;

/// Tuning knobs for the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Retry policy for transient compensation failures. Once exhausted
    /// the saga is marked failed with `unresolved_compensation` set and
    /// left for manual intervention.
    pub compensation_retry: RetryPolicy,
    /// Wall-clock budget for a whole saga, measured from creation.
    /// A `Running` saga past its deadline switches to compensation.
    pub saga_deadline: Option<chrono::Duration>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            compensation_retry: RetryPolicy::default(),
            saga_deadline: None,
        }
    }
}

/// Drives saga instances against a store, a bus and the context adapters.
pub struct Orchestrator<S: SagaStore, B: EventBus> {
    store: Arc<S>,
    bus: Arc<B>,
    registry: Arc<StepRegistry>,
    adapters: HashMap<String, Arc<dyn ContextAdapter>>,
    config: OrchestratorConfig,
}

impl<S: SagaStore, B: EventBus> Orchestrator<S, B> {
    pub fn new(
        store: Arc<S>,
        bus: Arc<B>,
        registry: Arc<StepRegistry>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            bus,
            registry,
            adapters: HashMap::new(),
            config,
        }
    }

    /// Registers the adapter for one bounded context.
    pub fn register_adapter(mut self, adapter: Arc<dyn ContextAdapter>) -> Self {
        self.adapters.insert(adapter.context().to_string(), adapter);
        self
    }

    pub fn registry(&self) -> &Arc<StepRegistry> {
        &self.registry
    }

    /// Creates (or re-joins) a saga instance without running it.
    ///
    /// Creation is idempotent per `saga_id`, so a redelivered trigger
    /// joins the existing instance instead of starting a second one.
    /// Trigger handlers call this and hand the ID to the worker pool.
    #[tracing::instrument(skip(self, payload), fields(saga_id = %saga_id, definition = definition_name))]
    pub async fn accept(
        &self,
        saga_id: SagaId,
        definition_name: &str,
        correlation_id: CorrelationId,
        payload: serde_json::Value,
    ) -> Result<SagaInstance> {
        // Fail fast on unregistered definitions before touching the store.
        self.registry.lookup(definition_name)?;

        let instance = self
            .store
            .create(saga_id, definition_name, correlation_id, payload)
            .await?;
        counter!("saga_started_total", "definition" => definition_name.to_string()).increment(1);
        tracing::info!(version = %instance.version, "saga instance created");
        Ok(instance)
    }

    /// Creates (or re-joins) a saga instance and runs it to a terminal
    /// state or a checkpoint conflict.
    pub async fn start(
        &self,
        saga_id: SagaId,
        definition_name: &str,
        correlation_id: CorrelationId,
        payload: serde_json::Value,
    ) -> Result<SagaInstance> {
        let instance = self
            .accept(saga_id, definition_name, correlation_id, payload)
            .await?;
        self.run(instance.saga_id).await
    }

    /// Returns the IDs of every saga still in a non-terminal state,
    /// oldest first. The worker pool feeds these back into its queue on
    /// startup and on each recovery sweep.
    pub async fn incomplete_sagas(&self) -> Result<Vec<SagaId>> {
        let incomplete = self.store.list_incomplete().await?;
        Ok(incomplete.into_iter().map(|i| i.saga_id).collect())
    }

    /// Resumes a saga from its latest checkpoint and drives it until it
    /// reaches a terminal state.
    ///
    /// Safe to call from multiple workers: whichever loses the version
    /// race gets `SagaError::CheckpointConflict` and abandons its attempt.
    #[tracing::instrument(skip(self), fields(saga_id = %saga_id))]
    pub async fn run(&self, saga_id: SagaId) -> Result<SagaInstance> {
        let mut failure_reason: Option<String> = None;

        loop {
            let instance = self.store.load(saga_id).await?;
            let definition = self.registry.lookup(&instance.definition_name)?;

            match instance.status {
                SagaStatus::Completed | SagaStatus::Failed => return Ok(instance),
                SagaStatus::Running => {
                    if let Some(deadline) = self.config.saga_deadline
                        && Utc::now() - instance.created_at > deadline
                    {
                        tracing::warn!(
                            started_at = %instance.created_at,
                            "saga deadline exceeded, compensating"
                        );
                        failure_reason.get_or_insert_with(|| "saga deadline exceeded".to_string());
                        self.apply(
                            &instance,
                            Checkpoint::deadline_exceeded(instance.current_step_index - 1),
                        )
                        .await?;
                        continue;
                    }
                    match self.run_forward(&instance, &definition).await? {
                        Forward::Advanced => {}
                        Forward::Finished(done) => return Ok(done),
                        Forward::Fatal(reason) => failure_reason = Some(reason),
                    }
                }
                SagaStatus::Compensating => {
                    if let Some(done) = self
                        .run_compensation(&instance, &definition, &mut failure_reason)
                        .await?
                    {
                        return Ok(done);
                    }
                }
            }
        }
    }

    /// Executes the next forward step (or completes the saga).
    async fn run_forward(
        &self,
        instance: &SagaInstance,
        definition: &SagaDefinition,
    ) -> Result<Forward> {
        let index = instance.current_step_index;
        let Some(step) = usize::try_from(index).ok().and_then(|i| definition.steps.get(i)) else {
            // Every step is done. Announce, then seal.
            let event = events::completed_event(definition.completed_topic(), instance)?;
            self.bus.publish(event).await?;
            let done = self.apply(instance, Checkpoint::completed()).await?;

            counter!("saga_completed_total", "definition" => definition.name.clone()).increment(1);
            histogram!("saga_duration_seconds", "definition" => definition.name.clone())
                .record((done.updated_at - done.created_at).as_seconds_f64());
            tracing::info!(definition = %definition.name, "saga completed");
            return Ok(Forward::Finished(done));
        };

        let adapter = self.adapter_for(step)?;
        tracing::debug!(step = %step.name, context = %step.context, index, "executing forward step");

        match self.execute_forward(step, adapter.as_ref(), instance.payload.clone()).await {
            Ok((payload, attempts)) => {
                self.apply(
                    instance,
                    Checkpoint::step_ok(StepResult::ok(&step.name, attempts), payload, index + 1),
                )
                .await?;
                Ok(Forward::Advanced)
            }
            Err((reason, result)) => {
                tracing::warn!(step = %step.name, attempts = result.attempt, %reason, "step failed, compensating");
                counter!(
                    "saga_step_failed_total",
                    "definition" => definition.name.clone(),
                    "step" => step.name.clone()
                )
                .increment(1);
                self.apply(instance, Checkpoint::step_fatal(result, index - 1))
                    .await?;
                Ok(Forward::Fatal(reason))
            }
        }
    }

    /// Runs one forward step to success or a failure verdict, retrying
    /// transient failures per the step's policy. Each attempt is bounded
    /// by the step timeout; a timeout counts as a transient failure.
    /// The error carries the step result to checkpoint, so exhausted
    /// retries stay distinguishable from business-rule failures.
    async fn execute_forward(
        &self,
        step: &StepSpec,
        adapter: &dyn ContextAdapter,
        payload: serde_json::Value,
    ) -> std::result::Result<(serde_json::Value, u32), (String, StepResult)> {
        let mut attempt: u32 = 1;
        loop {
            let outcome =
                match tokio::time::timeout(step.timeout, adapter.forward(&step.name, payload.clone()))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(StepError::Transient(format!(
                        "step timed out after {:?}",
                        step.timeout
                    ))),
                };

            match outcome {
                Ok(new_payload) => return Ok((new_payload, attempt)),
                Err(StepError::Fatal(reason)) => {
                    return Err((reason, StepResult::fatal(&step.name, attempt)));
                }
                Err(StepError::Transient(reason)) => match step.retry.delay_for(attempt) {
                    Some(delay) => {
                        tracing::debug!(step = %step.name, attempt, %reason, "transient step failure, retrying");
                        counter!("saga_step_retries_total", "step" => step.name.clone())
                            .increment(1);
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    None => {
                        return Err((
                            format!("retries exhausted: {reason}"),
                            StepResult::retries_exhausted(&step.name, attempt),
                        ));
                    }
                },
            }
        }
    }

    /// Compensates the step at the current index, or finishes the saga
    /// when the rewind is complete. Returns the terminal instance once
    /// the saga is failed.
    async fn run_compensation(
        &self,
        instance: &SagaInstance,
        definition: &SagaDefinition,
        failure_reason: &mut Option<String>,
    ) -> Result<Option<SagaInstance>> {
        // After a crash the in-flight reason is gone; reconstruct it
        // from the recorded fatal step.
        let reason = failure_reason
            .get_or_insert_with(|| match instance.failed_step() {
                Some(result) => format!("step '{}' failed", result.step_name),
                None => "saga deadline exceeded".to_string(),
            })
            .clone();

        let index = instance.current_step_index;
        let Some(step) = usize::try_from(index).ok().and_then(|i| definition.steps.get(i)) else {
            // Rewind finished. Announce, then seal.
            let event = events::failed_event(definition.failed_topic(), instance, &reason, false)?;
            self.bus.publish(event).await?;
            let done = self.apply(instance, Checkpoint::failed(false)).await?;

            counter!("saga_failed_total", "definition" => definition.name.clone()).increment(1);
            tracing::info!(definition = %definition.name, %reason, "saga failed, compensation complete");
            return Ok(Some(done));
        };

        let adapter = self.adapter_for(step)?;
        tracing::debug!(step = %step.name, index, "compensating step");

        match self.execute_compensation(step, adapter.as_ref(), &instance.payload).await {
            Ok(()) => {
                self.apply(instance, Checkpoint::compensated(&step.name, index - 1))
                    .await?;
                Ok(None)
            }
            Err(comp_reason) => {
                // Manual intervention required; stop rewinding.
                tracing::error!(
                    step = %step.name,
                    reason = %comp_reason,
                    "compensation failed, saga left unresolved"
                );
                counter!(
                    "saga_unresolved_total",
                    "definition" => definition.name.clone(),
                    "step" => step.name.clone()
                )
                .increment(1);

                let event = events::failed_event(definition.failed_topic(), instance, &reason, true)?;
                self.bus.publish(event).await?;
                let done = self.apply(instance, Checkpoint::failed(true)).await?;
                Ok(Some(done))
            }
        }
    }

    /// Runs one compensation to success or exhaustion. Compensations use
    /// the orchestrator-wide retry policy rather than the step's own.
    async fn execute_compensation(
        &self,
        step: &StepSpec,
        adapter: &dyn ContextAdapter,
        payload: &serde_json::Value,
    ) -> std::result::Result<(), String> {
        let mut attempt: u32 = 1;
        loop {
            let outcome =
                match tokio::time::timeout(step.timeout, adapter.compensate(&step.name, payload))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(StepError::Transient(format!(
                        "compensation timed out after {:?}",
                        step.timeout
                    ))),
                };

            match outcome {
                Ok(()) => return Ok(()),
                Err(StepError::Fatal(reason)) => return Err(reason),
                Err(StepError::Transient(reason)) => {
                    match self.config.compensation_retry.delay_for(attempt) {
                        Some(delay) => {
                            tokio::time::sleep(delay).await;
                            attempt += 1;
                        }
                        None => return Err(format!("compensation retries exhausted: {reason}")),
                    }
                }
            }
        }
    }

    fn adapter_for(&self, step: &StepSpec) -> Result<Arc<dyn ContextAdapter>> {
        self.adapters
            .get(&step.context)
            .cloned()
            .ok_or_else(|| SagaError::UnknownContext {
                context: step.context.clone(),
                step: step.name.clone(),
            })
    }

    /// Writes a version-guarded checkpoint, translating a lost version
    /// race into `CheckpointConflict`.
    async fn apply(&self, instance: &SagaInstance, checkpoint: Checkpoint) -> Result<SagaInstance> {
        match self
            .store
            .checkpoint(instance.saga_id, instance.version, checkpoint)
            .await
        {
            Ok(next) => Ok(next),
            Err(StoreError::OptimisticConflict { .. }) => {
                tracing::debug!(saga_id = %instance.saga_id, "lost checkpoint race, abandoning attempt");
                Err(SagaError::CheckpointConflict(instance.saga_id))
            }
            Err(err) => Err(err.into()),
        }
    }
}

enum Forward {
    /// A step succeeded and the index advanced.
    Advanced,
    /// The saga reached `Completed`.
    Finished(SagaInstance),
    /// A step failed fatally; the saga is now `Compensating`.
    Fatal(String),
}
