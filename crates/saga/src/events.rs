//! Outbound saga lifecycle events.
//!
//! Callers must treat "saga accepted" and "saga succeeded" as distinct
//! facts: triggering a saga returns immediately, and the outcome is
//! observed on these topics, never as a synchronous return value.

use common::SagaId;
use event_bus::EventEnvelope;
use saga_store::SagaInstance;
use serde::{Deserialize, Serialize};

/// Payload of a `{saga}.completed` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaCompletedData {
    /// The saga instance that finished.
    pub saga_id: SagaId,
    /// Correlation ID of the originating trigger.
    pub correlation_id: common::CorrelationId,
    /// The payload as of the final step.
    pub final_payload: serde_json::Value,
}

/// Payload of a `{saga}.failed` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaFailedData {
    /// The saga instance that failed.
    pub saga_id: SagaId,
    /// Correlation ID of the originating trigger.
    pub correlation_id: common::CorrelationId,
    /// Human-readable reason, from the fatally failed step.
    pub failure_reason: String,
    /// True when a compensation exhausted its retries and the saga
    /// requires manual intervention.
    pub unresolved_compensation: bool,
}

/// Builds the completion event for a finished saga.
pub fn completed_event(
    topic: String,
    instance: &SagaInstance,
) -> Result<EventEnvelope, serde_json::Error> {
    let data = SagaCompletedData {
        saga_id: instance.saga_id,
        correlation_id: instance.correlation_id,
        final_payload: instance.payload.clone(),
    };
    Ok(EventEnvelope::builder()
        .topic(topic)
        .payload(&data)?
        .correlation_id(instance.correlation_id)
        .build())
}

/// Builds the failure event for a failed saga.
pub fn failed_event(
    topic: String,
    instance: &SagaInstance,
    failure_reason: impl Into<String>,
    unresolved_compensation: bool,
) -> Result<EventEnvelope, serde_json::Error> {
    let data = SagaFailedData {
        saga_id: instance.saga_id,
        correlation_id: instance.correlation_id,
        failure_reason: failure_reason.into(),
        unresolved_compensation,
    };
    Ok(EventEnvelope::builder()
        .topic(topic)
        .payload(&data)?
        .correlation_id(instance.correlation_id)
        .build())
}
