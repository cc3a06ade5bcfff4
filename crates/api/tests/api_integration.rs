//! Integration tests for the admin API server.

use std::sync::{Arc, OnceLock};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{CorrelationId, SagaId};
use event_bus::{EventBus, EventEnvelope, InMemoryEventBus, TopicPattern};
use metrics_exporter_prometheus::PrometheusHandle;
use saga_store::{Checkpoint, InMemorySagaStore, SagaStore, StepResult};
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            metrics_exporter_prometheus::PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

type TestState = api::AppState<InMemorySagaStore, InMemoryEventBus>;

fn setup() -> (axum::Router, Arc<TestState>) {
    let state = Arc::new(api::AppState {
        store: Arc::new(InMemorySagaStore::new()),
        bus: Arc::new(InMemoryEventBus::new()),
    });
    let app = api::create_app(state.clone(), get_metrics_handle());
    (app, state)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let (app, _state) = setup();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let (app, _state) = setup();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_get_saga_returns_latest_checkpoint() {
    let (app, state) = setup();

    let saga_id = SagaId::new();
    let created = state
        .store
        .create(
            saga_id,
            "project.create",
            CorrelationId::new(),
            serde_json::json!({"project_id": "p-1"}),
        )
        .await
        .unwrap();
    state
        .store
        .checkpoint(
            saga_id,
            created.version,
            Checkpoint::step_ok(
                StepResult::ok("validate_owner", 1),
                created.payload.clone(),
                1,
            ),
        )
        .await
        .unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/sagas/{saga_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["saga_id"], saga_id.to_string());
    assert_eq!(json["definition"], "project.create");
    assert_eq!(json["status"], "Running");
    assert_eq!(json["version"], 2);
    assert_eq!(json["steps"][0]["step_name"], "validate_owner");
    assert_eq!(json["steps"][0]["outcome"], "Ok");
}

#[tokio::test]
async fn test_get_unknown_saga_returns_404() {
    let (app, _state) = setup();

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/sagas/{}", SagaId::new()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_get_saga_with_malformed_id_returns_400() {
    let (app, _state) = setup();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/sagas/not-a-uuid")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_trigger_publishes_and_returns_202() {
    let (app, state) = setup();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/triggers/project.create.requested")
                .header("content-type", "application/json")
                .body(Body::from(
                    serde_json::json!({
                        "owner_id": "alice", "org_id": "acme", "project_id": "p-1"
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = body_json(response).await;
    assert_eq!(json["topic"], "project.create.requested");
    assert!(json["event_id"].is_string());
    assert!(json["correlation_id"].is_string());

    let published = state.bus.events_on("project.create.requested").await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].payload["owner_id"], "alice");
}

#[tokio::test]
async fn test_trigger_rejects_wildcard_topics() {
    let (app, _state) = setup();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/triggers/project.*")
                .header("content-type", "application/json")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_trigger_reaches_subscribers() {
    let (app, state) = setup();

    struct Recorder(tokio::sync::mpsc::UnboundedSender<EventEnvelope>);

    #[async_trait::async_trait]
    impl event_bus::EventHandler for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }
        async fn handle(
            &self,
            event: &EventEnvelope,
        ) -> Result<(), event_bus::HandlerError> {
            self.0
                .send(event.clone())
                .map_err(|e| event_bus::HandlerError::new(e.to_string()))
        }
    }

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    state
        .bus
        .subscribe(
            TopicPattern::parse("user.delete.requested").unwrap(),
            Arc::new(Recorder(tx)),
        )
        .await
        .unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/triggers/user.delete.requested")
                .header("content-type", "application/json")
                .body(Body::from(
                    serde_json::json!({"user_id": "carol"}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let delivered = rx.recv().await.unwrap();
    assert_eq!(delivered.topic, "user.delete.requested");
    assert_eq!(delivered.payload["user_id"], "carol");
}
