use chrono::{DateTime, Utc};
use common::{CorrelationId, SagaId};
use serde::{Deserialize, Serialize};

/// Checkpoint counter for a saga instance, used for optimistic
/// concurrency control.
///
/// Versions start at 1 for the creation checkpoint and increment by 1 for
/// each subsequent checkpoint.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Creates a version from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the version of the creation checkpoint.
    pub fn first() -> Self {
        Self(1)
    }

    /// Returns the next version.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw version value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// The lifecycle status of a saga instance.
///
/// Status transitions:
/// ```text
/// Running ──┬──► Completed
///           └──► Compensating ──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SagaStatus {
    /// Forward steps are being executed.
    Running,

    /// A step failed fatally and compensations run in reverse order.
    Compensating,

    /// All steps completed successfully (terminal).
    Completed,

    /// Compensation finished after a failure (terminal).
    Failed,
}

impl SagaStatus {
    /// Returns true if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaStatus::Completed | SagaStatus::Failed)
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStatus::Running => "Running",
            SagaStatus::Compensating => "Compensating",
            SagaStatus::Completed => "Completed",
            SagaStatus::Failed => "Failed",
        }
    }

    /// Parses a status from its string name.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Running" => Some(SagaStatus::Running),
            "Compensating" => Some(SagaStatus::Compensating),
            "Completed" => Some(SagaStatus::Completed),
            "Failed" => Some(SagaStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The outcome of one attempt series at a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepOutcome {
    /// The step succeeded.
    Ok,
    /// The step failed transiently; it was or will be retried.
    RetryableFailure,
    /// The step failed on a business rule; compensation follows.
    FatalFailure,
}

/// Record of one executed step within a saga instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    /// The step name from the saga definition.
    pub step_name: String,
    /// Number of attempts the step took (1 for a first-try success).
    pub attempt: u32,
    /// How the step ended.
    pub outcome: StepOutcome,
    /// Whether the step's effect has been compensated.
    pub compensated: bool,
    /// When the result was recorded.
    pub timestamp: DateTime<Utc>,
}

impl StepResult {
    /// Records a successful step execution.
    pub fn ok(step_name: impl Into<String>, attempt: u32) -> Self {
        Self {
            step_name: step_name.into(),
            attempt,
            outcome: StepOutcome::Ok,
            compensated: false,
            timestamp: Utc::now(),
        }
    }

    /// Records a fatal step failure.
    pub fn fatal(step_name: impl Into<String>, attempt: u32) -> Self {
        Self {
            step_name: step_name.into(),
            attempt,
            outcome: StepOutcome::FatalFailure,
            compensated: false,
            timestamp: Utc::now(),
        }
    }

    /// Records a step whose transient-failure retries were exhausted.
    /// Treated like a fatal failure for control flow, but the audit trail
    /// keeps the distinction.
    pub fn retries_exhausted(step_name: impl Into<String>, attempt: u32) -> Self {
        Self {
            step_name: step_name.into(),
            attempt,
            outcome: StepOutcome::RetryableFailure,
            compensated: false,
            timestamp: Utc::now(),
        }
    }
}

/// A durable record of saga progress.
///
/// Owned exclusively by the orchestrator and mutated only through
/// [`Checkpoint`] writes; every checkpoint produces a new version of the
/// instance, so a crashed worker resumes from the latest version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaInstance {
    /// Unique saga identifier. Derived from the trigger event ID so that
    /// bus redeliveries of the trigger create the same instance.
    pub saga_id: SagaId,
    /// Name of the saga definition this instance executes.
    pub definition_name: String,
    /// Correlation ID of the originating business transaction.
    pub correlation_id: CorrelationId,
    /// Current lifecycle status.
    pub status: SagaStatus,
    /// Index of the next forward step while `Running`, or of the next
    /// compensation while `Compensating`. Strictly increases during
    /// `Running` and strictly decreases during `Compensating`; reaches -1
    /// when every completed step has been compensated.
    pub current_step_index: i64,
    /// Results of every executed step, in execution order.
    pub step_results: Vec<StepResult>,
    /// The saga payload snapshot as of the latest checkpoint.
    pub payload: serde_json::Value,
    /// Set when a compensation exhausted its retries and the saga needs
    /// manual intervention.
    pub unresolved_compensation: bool,
    /// Optimistic concurrency counter.
    pub version: Version,
    /// When the instance was created.
    pub created_at: DateTime<Utc>,
    /// When the latest checkpoint was written.
    pub updated_at: DateTime<Utc>,
}

impl SagaInstance {
    /// Creates the initial (version 1) instance record.
    pub fn new(
        saga_id: SagaId,
        definition_name: impl Into<String>,
        correlation_id: CorrelationId,
        payload: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            saga_id,
            definition_name: definition_name.into(),
            correlation_id,
            status: SagaStatus::Running,
            current_step_index: 0,
            step_results: Vec::new(),
            payload,
            unresolved_compensation: false,
            version: Version::first(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns the names of steps that completed successfully, in order.
    pub fn completed_steps(&self) -> Vec<&str> {
        self.step_results
            .iter()
            .filter(|r| r.outcome == StepOutcome::Ok)
            .map(|r| r.step_name.as_str())
            .collect()
    }

    /// Returns the latest failed step result, fatal or retries-exhausted.
    pub fn failed_step(&self) -> Option<&StepResult> {
        self.step_results
            .iter()
            .rev()
            .find(|r| r.outcome != StepOutcome::Ok)
    }

    /// Applies a checkpoint, producing the next version of the instance.
    pub fn with_checkpoint(&self, checkpoint: Checkpoint) -> Self {
        let mut next = self.clone();
        if let Some(result) = checkpoint.step_result {
            next.step_results.push(result);
        }
        if let Some(payload) = checkpoint.payload {
            next.payload = payload;
        }
        if let Some(status) = checkpoint.status {
            next.status = status;
        }
        if let Some(index) = checkpoint.step_index {
            next.current_step_index = index;
        }
        if let Some(step_name) = checkpoint.mark_compensated {
            for result in next.step_results.iter_mut() {
                if result.step_name == step_name && result.outcome == StepOutcome::Ok {
                    result.compensated = true;
                }
            }
        }
        if checkpoint.unresolved_compensation {
            next.unresolved_compensation = true;
        }
        next.version = self.version.next();
        next.updated_at = Utc::now();
        next
    }
}

/// One atomic transition of a saga instance.
///
/// A checkpoint may append a step result, replace the payload snapshot,
/// move the step index and change the status, all in a single versioned
/// write.
#[derive(Debug, Clone, Default)]
pub struct Checkpoint {
    /// Step result to append, if any.
    pub step_result: Option<StepResult>,
    /// New payload snapshot, if the step transformed it.
    pub payload: Option<serde_json::Value>,
    /// New status, if transitioning.
    pub status: Option<SagaStatus>,
    /// New step index, if advancing or rewinding.
    pub step_index: Option<i64>,
    /// Step name to mark as compensated, if any.
    pub mark_compensated: Option<String>,
    /// Flag the saga as needing manual compensation cleanup.
    pub unresolved_compensation: bool,
}

impl Checkpoint {
    /// A forward step succeeded: record it, advance, snapshot the payload.
    pub fn step_ok(result: StepResult, payload: serde_json::Value, next_index: i64) -> Self {
        Self {
            step_result: Some(result),
            payload: Some(payload),
            step_index: Some(next_index),
            ..Default::default()
        }
    }

    /// A forward step failed for good, either on a business rule or by
    /// exhausting its retries: record it and rewind to the last completed
    /// step for compensation.
    pub fn step_fatal(result: StepResult, compensate_from: i64) -> Self {
        Self {
            step_result: Some(result),
            status: Some(SagaStatus::Compensating),
            step_index: Some(compensate_from),
            ..Default::default()
        }
    }

    /// A compensation succeeded: mark the step and keep rewinding.
    pub fn compensated(step_name: impl Into<String>, next_index: i64) -> Self {
        Self {
            step_index: Some(next_index),
            mark_compensated: Some(step_name.into()),
            ..Default::default()
        }
    }

    /// All steps completed.
    pub fn completed() -> Self {
        Self {
            status: Some(SagaStatus::Completed),
            ..Default::default()
        }
    }

    /// Compensation finished (or was abandoned); the saga is failed.
    pub fn failed(unresolved_compensation: bool) -> Self {
        Self {
            status: Some(SagaStatus::Failed),
            unresolved_compensation,
            ..Default::default()
        }
    }

    /// The saga deadline passed; force the switch to compensation.
    pub fn deadline_exceeded(compensate_from: i64) -> Self {
        Self {
            status: Some(SagaStatus::Compensating),
            step_index: Some(compensate_from),
            ..Default::default()
        }
    }
}
