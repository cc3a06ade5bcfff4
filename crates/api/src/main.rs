//! Admin server entry point.

use std::sync::Arc;
use std::time::Duration;

use api::routes::sagas::AppState;
use api::{Config, create_app};
use event_bus::{InMemoryEventBus, RetryPolicy};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::contexts::{
    InMemoryAccountContext, InMemoryOrganizationContext, InMemoryProjectContext,
};
use saga::worker::{WorkerConfig, WorkerPool};
use saga::{
    Orchestrator, OrchestratorConfig, StepRegistry, project_creation, user_deletion,
};
use saga_store::{InMemorySagaStore, PostgresSagaStore, SagaStore};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    match config.database_url.clone() {
        Some(url) => {
            let store = PostgresSagaStore::connect(&url)
                .await
                .expect("failed to connect to database");
            store.run_migrations().await.expect("migrations failed");
            tracing::info!("using Postgres saga store");
            serve(Arc::new(store), config, metrics_handle).await;
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory saga store");
            serve(Arc::new(InMemorySagaStore::new()), config, metrics_handle).await;
        }
    }
}

async fn serve<S: SagaStore + 'static>(
    store: Arc<S>,
    config: Config,
    metrics_handle: PrometheusHandle,
) {
    let bus = Arc::new(InMemoryEventBus::new());

    let mut registry = StepRegistry::new();
    for mut definition in [project_creation::definition(), user_deletion::definition()] {
        for step in &mut definition.steps {
            step.timeout = config.step_timeout;
        }
        registry
            .register(definition)
            .expect("duplicate saga definition");
    }

    let orchestrator = Arc::new(
        Orchestrator::new(
            store.clone(),
            bus.clone(),
            Arc::new(registry),
            OrchestratorConfig {
                compensation_retry: RetryPolicy::new(
                    config.max_compensation_retries,
                    Duration::from_millis(100),
                    Duration::from_secs(5),
                ),
                saga_deadline: None,
            },
        )
        .register_adapter(Arc::new(InMemoryAccountContext::new()))
        .register_adapter(Arc::new(InMemoryOrganizationContext::new()))
        .register_adapter(Arc::new(InMemoryProjectContext::new())),
    );

    let pool = WorkerPool::spawn(
        orchestrator.clone(),
        WorkerConfig {
            workers: config.saga_workers,
            resume_interval: config.resume_interval,
        },
    );
    pool.register_triggers(orchestrator, bus.as_ref())
        .await
        .expect("failed to subscribe saga triggers");

    // Hourly retention sweep over terminal sagas.
    let purger = {
        let store = store.clone();
        let retention =
            chrono::Duration::from_std(config.saga_retention).expect("retention out of range");
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(3600));
            loop {
                ticker.tick().await;
                match store.purge_terminal(retention).await {
                    Ok(0) => {}
                    Ok(purged) => tracing::info!(purged, "purged terminal sagas"),
                    Err(err) => tracing::error!(error = %err, "retention purge failed"),
                }
            }
        })
    };

    let state = Arc::new(AppState {
        store,
        bus: bus.clone(),
    });
    let app = create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting admin server");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    purger.abort();
    pool.shutdown().await;
    bus.shutdown().await;
    tracing::info!("server shut down gracefully");
}
