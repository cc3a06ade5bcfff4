//! Saga inspection and trigger endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{CorrelationId, SagaId};
use event_bus::{EventBus, EventEnvelope, TopicPattern};
use saga_store::{SagaInstance, SagaStore, SagaStoreExt};
use serde::Serialize;

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<S: SagaStore, B: EventBus> {
    pub store: Arc<S>,
    pub bus: Arc<B>,
}

// -- Response types --

#[derive(Serialize)]
pub struct SagaResponse {
    pub saga_id: String,
    pub definition: String,
    pub correlation_id: String,
    pub status: String,
    pub current_step_index: i64,
    pub steps: Vec<StepResultResponse>,
    pub payload: serde_json::Value,
    pub unresolved_compensation: bool,
    pub version: i64,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Serialize)]
pub struct StepResultResponse {
    pub step_name: String,
    pub attempt: u32,
    pub outcome: String,
    pub compensated: bool,
}

#[derive(Serialize)]
pub struct TriggerAcceptedResponse {
    pub event_id: String,
    pub topic: String,
    pub correlation_id: String,
}

impl From<SagaInstance> for SagaResponse {
    fn from(instance: SagaInstance) -> Self {
        Self {
            saga_id: instance.saga_id.to_string(),
            definition: instance.definition_name,
            correlation_id: instance.correlation_id.to_string(),
            status: instance.status.to_string(),
            current_step_index: instance.current_step_index,
            steps: instance
                .step_results
                .into_iter()
                .map(|r| StepResultResponse {
                    step_name: r.step_name,
                    attempt: r.attempt,
                    outcome: format!("{:?}", r.outcome),
                    compensated: r.compensated,
                })
                .collect(),
            payload: instance.payload,
            unresolved_compensation: instance.unresolved_compensation,
            version: instance.version.as_i64(),
            created_at: instance.created_at,
            updated_at: instance.updated_at,
        }
    }
}

// -- Handlers --

/// GET /sagas/{id} — returns the latest checkpoint of a saga instance.
#[tracing::instrument(skip(state))]
pub async fn get<S: SagaStore, B: EventBus>(
    State(state): State<Arc<AppState<S, B>>>,
    Path(id): Path<String>,
) -> Result<Json<SagaResponse>, ApiError> {
    let uuid = uuid::Uuid::parse_str(&id)
        .map_err(|e| ApiError::BadRequest(format!("Invalid saga id: {e}")))?;
    let saga_id = SagaId::from_uuid(uuid);

    let instance = state
        .store
        .try_load(saga_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Saga {saga_id} not found")))?;
    Ok(Json(instance.into()))
}

/// POST /triggers/{topic} — publishes a trigger event carrying the
/// request body as payload.
///
/// Returns 202: the event was accepted onto the bus, not executed.
/// The saga outcome is announced on `{name}.completed` / `{name}.failed`
/// and can be polled via `GET /sagas/{id}`.
#[tracing::instrument(skip(state, payload))]
pub async fn trigger<S: SagaStore, B: EventBus>(
    State(state): State<Arc<AppState<S, B>>>,
    Path(topic): Path<String>,
    Json(payload): Json<serde_json::Value>,
) -> Result<(StatusCode, Json<TriggerAcceptedResponse>), ApiError> {
    // Publishing requires a concrete topic, not a pattern.
    TopicPattern::parse(&topic)?;
    if topic.split('.').any(|s| s == "*") {
        return Err(ApiError::BadRequest(format!(
            "Cannot publish to a wildcard topic: {topic}"
        )));
    }

    let event = EventEnvelope::builder()
        .topic(&topic)
        .payload_raw(payload)
        .correlation_id(CorrelationId::new())
        .build();
    let event_id = event.event_id;
    let correlation_id = event.correlation_id;

    state.bus.publish(event).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(TriggerAcceptedResponse {
            event_id: event_id.to_string(),
            topic,
            correlation_id: correlation_id.to_string(),
        }),
    ))
}
