//! Static saga definitions.

use std::time::Duration;

use event_bus::RetryPolicy;

/// Descriptor for one saga step.
///
/// A step is a pure descriptor: a name, the bounded context whose
/// adapter executes it, and its retry/timeout policy. The forward and
/// compensating operations are resolved by `(context, name)` against the
/// orchestrator's adapter map at execution time.
#[derive(Debug, Clone)]
pub struct StepSpec {
    /// Step name, unique within its definition.
    pub name: String,
    /// Name of the bounded context that owns this step.
    pub context: String,
    /// Retry policy for transient forward failures.
    pub retry: RetryPolicy,
    /// Per-attempt timeout; a timeout counts as a transient failure.
    pub timeout: Duration,
}

impl StepSpec {
    /// Creates a step with the default retry policy and a 30s timeout.
    pub fn new(name: impl Into<String>, context: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            context: context.into(),
            retry: RetryPolicy::default(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Overrides the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Overrides the per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// An ordered, immutable list of saga steps.
///
/// Definitions are created at process start, registered once and never
/// mutated at runtime. The definition name doubles as the topic family
/// for its lifecycle events: `{name}.requested` triggers the saga,
/// `{name}.completed` / `{name}.failed` announce its outcome.
#[derive(Debug, Clone)]
pub struct SagaDefinition {
    /// Definition name (e.g. "project.create").
    pub name: String,
    /// Forward steps in execution order.
    pub steps: Vec<StepSpec>,
}

impl SagaDefinition {
    /// Creates an empty definition.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    /// Appends a step.
    pub fn step(mut self, step: StepSpec) -> Self {
        self.steps.push(step);
        self
    }

    /// The inbound topic whose events trigger this saga.
    pub fn trigger_topic(&self) -> String {
        format!("{}.requested", self.name)
    }

    /// The topic announcing successful completion.
    pub fn completed_topic(&self) -> String {
        format!("{}.completed", self.name)
    }

    /// The topic announcing terminal failure.
    pub fn failed_topic(&self) -> String {
        format!("{}.failed", self.name)
    }
}
