//! Worker pool executing sagas off an in-process queue.
//!
//! Trigger events enqueue saga IDs; a fixed set of workers pops them and
//! drives each saga through the orchestrator. A periodic recovery sweep
//! re-enqueues every non-terminal saga found in the store, so sagas
//! stranded by a crash (or left behind at shutdown) are picked up by the
//! next process that runs the sweep.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::SagaId;
use event_bus::{EventBus, EventEnvelope, EventHandler, HandlerError, TopicPattern};
use metrics::counter;
use saga_store::SagaStore;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::error::{Result, SagaError};
use crate::orchestrator::Orchestrator;

/// Worker pool tuning.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of concurrent saga workers.
    pub workers: usize,
    /// Interval between crash-recovery sweeps of the store.
    pub resume_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            resume_interval: Duration::from_secs(30),
        }
    }
}

/// Cloneable handle for enqueuing sagas onto the pool.
#[derive(Debug, Clone)]
pub struct SagaQueue {
    tx: mpsc::UnboundedSender<SagaId>,
}

impl SagaQueue {
    /// Enqueues a saga for execution.
    pub fn enqueue(&self, saga_id: SagaId) -> Result<()> {
        self.tx.send(saga_id).map_err(|_| SagaError::QueueClosed)
    }
}

/// A fixed pool of saga workers plus the periodic recovery sweep.
pub struct WorkerPool {
    queue: SagaQueue,
    workers: Vec<JoinHandle<()>>,
    sweeper: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl WorkerPool {
    /// Spawns the workers and the recovery sweeper. The first sweep
    /// runs immediately, resuming sagas stranded by a previous process.
    pub fn spawn<S, B>(orchestrator: Arc<Orchestrator<S, B>>, config: WorkerConfig) -> Self
    where
        S: SagaStore + 'static,
        B: EventBus + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let (shutdown, _) = watch::channel(false);
        let queue = SagaQueue { tx };

        let workers = (0..config.workers.max(1))
            .map(|worker_id| {
                let orchestrator = orchestrator.clone();
                let rx = rx.clone();
                let mut shutdown_rx = shutdown.subscribe();
                tokio::spawn(async move {
                    loop {
                        let next = {
                            let mut rx = rx.lock().await;
                            tokio::select! {
                                saga_id = rx.recv() => saga_id,
                                _ = shutdown_rx.changed() => None,
                            }
                        };
                        let Some(saga_id) = next else { break };
                        run_one(&orchestrator, worker_id, saga_id).await;
                    }
                    tracing::debug!(worker_id, "saga worker stopped");
                })
            })
            .collect();

        let sweeper = {
            let orchestrator = orchestrator.clone();
            let queue = queue.clone();
            let mut shutdown_rx = shutdown.subscribe();
            let interval = config.resume_interval;
            tokio::spawn(async move {
                loop {
                    sweep(&orchestrator, &queue).await;
                    tokio::select! {
                        _ = tokio::time::sleep(interval) => {}
                        _ = shutdown_rx.changed() => break,
                    }
                }
            })
        };

        Self {
            queue,
            workers,
            sweeper,
            shutdown,
        }
    }

    /// Returns a handle for enqueuing sagas.
    pub fn queue(&self) -> SagaQueue {
        self.queue.clone()
    }

    /// Subscribes a trigger handler for every registered definition, so
    /// `{name}.requested` events start (or resume) the matching saga.
    pub async fn register_triggers<S, B>(
        &self,
        orchestrator: Arc<Orchestrator<S, B>>,
        bus: &B,
    ) -> Result<()>
    where
        S: SagaStore + 'static,
        B: EventBus + 'static,
    {
        for definition in orchestrator.registry().definitions() {
            let pattern = TopicPattern::parse(&definition.trigger_topic())?;
            let handler = SagaTrigger {
                definition_name: definition.name.clone(),
                handler_name: format!("saga-trigger.{}", definition.name),
                orchestrator: orchestrator.clone(),
                queue: self.queue.clone(),
            };
            bus.subscribe(pattern, Arc::new(handler)).await?;
            tracing::info!(definition = %definition.name, topic = %definition.trigger_topic(), "saga trigger subscribed");
        }
        Ok(())
    }

    /// Stops the pool: workers finish their in-flight saga and exit.
    /// Sagas still queued are not lost, the next recovery sweep finds
    /// them in the store.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for worker in self.workers {
            let _ = worker.await;
        }
        let _ = self.sweeper.await;
        tracing::info!("saga worker pool stopped");
    }
}

async fn run_one<S: SagaStore, B: EventBus>(
    orchestrator: &Orchestrator<S, B>,
    worker_id: usize,
    saga_id: SagaId,
) {
    match orchestrator.run(saga_id).await {
        Ok(instance) => {
            tracing::debug!(worker_id, %saga_id, status = %instance.status, "saga run finished");
        }
        // Another worker advanced this saga; nothing to do.
        Err(SagaError::CheckpointConflict(_)) => {
            counter!("saga_checkpoint_conflicts_total").increment(1);
            tracing::debug!(worker_id, %saga_id, "saga taken over by another worker");
        }
        Err(err) => {
            tracing::error!(worker_id, %saga_id, error = %err, "saga run errored");
        }
    }
}

async fn sweep<S: SagaStore, B: EventBus>(
    orchestrator: &Orchestrator<S, B>,
    queue: &SagaQueue,
) {
    match orchestrator.incomplete_sagas().await {
        Ok(saga_ids) => {
            if !saga_ids.is_empty() {
                tracing::info!(count = saga_ids.len(), "resuming incomplete sagas");
            }
            for saga_id in saga_ids {
                if queue.enqueue(saga_id).is_err() {
                    return;
                }
            }
        }
        Err(err) => {
            tracing::error!(error = %err, "recovery sweep failed");
        }
    }
}

/// Bus handler that turns a `{name}.requested` event into a saga run.
///
/// The saga ID is derived from the trigger's event ID; combined with
/// idempotent instance creation this makes trigger redelivery join the
/// existing saga rather than spawn a duplicate.
struct SagaTrigger<S: SagaStore, B: EventBus> {
    definition_name: String,
    handler_name: String,
    orchestrator: Arc<Orchestrator<S, B>>,
    queue: SagaQueue,
}

#[async_trait]
impl<S: SagaStore + 'static, B: EventBus + 'static> EventHandler for SagaTrigger<S, B> {
    fn name(&self) -> &str {
        &self.handler_name
    }

    async fn handle(&self, event: &EventEnvelope) -> std::result::Result<(), HandlerError> {
        let saga_id = SagaId::from_uuid(event.event_id.as_uuid());
        self.orchestrator
            .accept(
                saga_id,
                &self.definition_name,
                event.correlation_id,
                event.payload.clone(),
            )
            .await
            .map_err(|err| HandlerError::new(err.to_string()))?;
        self.queue
            .enqueue(saga_id)
            .map_err(|err| HandlerError::new(err.to_string()))
    }
}
