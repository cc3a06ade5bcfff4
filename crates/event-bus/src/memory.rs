use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;

use crate::bus::{EventBus, EventHandler, TopicPattern};
use crate::envelope::EventEnvelope;
use crate::error::{BusError, Result};
use crate::retry::RetryPolicy;
use crate::{DEAD_LETTER_PREFIX, DELIVERY_EXHAUSTED_TOPIC};

struct Subscription {
    pattern: TopicPattern,
    tx: mpsc::UnboundedSender<EventEnvelope>,
}

struct Inner {
    log: RwLock<Vec<EventEnvelope>>,
    subscriptions: RwLock<Vec<Subscription>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
    retry: RetryPolicy,
}

/// In-memory event bus implementation.
///
/// Each subscriber gets a dedicated delivery task fed from an unbounded
/// queue in publish order, which makes the per-correlation ordering
/// guarantee trivial: a subscriber sees all events in publish order.
/// Handler failures are retried with the bus-wide backoff policy; once
/// exhausted the event is republished on `dlq.{topic}` together with a
/// `bus.delivery.exhausted` notice.
///
/// The production deployment fronts a broker with the same contract; this
/// implementation backs the worker pool in tests and single-node runs.
#[derive(Clone)]
pub struct InMemoryEventBus {
    inner: Arc<Inner>,
}

impl InMemoryEventBus {
    /// Creates a bus with the default delivery retry policy.
    pub fn new() -> Self {
        Self::with_retry(RetryPolicy::default())
    }

    /// Creates a bus with an explicit delivery retry policy.
    pub fn with_retry(retry: RetryPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                log: RwLock::new(Vec::new()),
                subscriptions: RwLock::new(Vec::new()),
                tasks: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
                retry,
            }),
        }
    }

    /// Returns the total number of events published so far.
    pub async fn published_count(&self) -> usize {
        self.inner.log.read().await.len()
    }

    /// Returns all published events on the given topic, in publish order.
    pub async fn events_on(&self, topic: &str) -> Vec<EventEnvelope> {
        self.inner
            .log
            .read()
            .await
            .iter()
            .filter(|e| e.topic == topic)
            .cloned()
            .collect()
    }

    /// Stops accepting publishes and drains in-flight deliveries.
    pub async fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);

        // Dropping the senders lets each delivery task drain and exit.
        self.inner.subscriptions.write().await.clear();

        let tasks: Vec<_> = self.inner.tasks.lock().await.drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
        tracing::info!("event bus shut down");
    }

    async fn publish_inner(inner: &Arc<Inner>, event: EventEnvelope) -> Result<()> {
        if inner.closed.load(Ordering::SeqCst) {
            return Err(BusError::Unavailable("bus is shut down".to_string()));
        }

        inner.log.write().await.push(event.clone());
        metrics::counter!("bus_events_published").increment(1);
        tracing::debug!(topic = %event.topic, event_id = %event.event_id, "event published");

        let subscriptions = inner.subscriptions.read().await;
        for sub in subscriptions.iter() {
            if sub.pattern.matches(&event.topic) {
                // A closed receiver means the task is gone; nothing to do.
                let _ = sub.tx.send(event.clone());
            }
        }
        Ok(())
    }

    async fn deliver(inner: &Arc<Inner>, handler: &Arc<dyn EventHandler>, event: EventEnvelope) {
        let mut attempts: u32 = 1;
        let last_error = loop {
            match handler.handle(&event).await {
                Ok(()) => {
                    metrics::counter!("bus_deliveries_succeeded").increment(1);
                    return;
                }
                Err(err) => {
                    tracing::warn!(
                        topic = %event.topic,
                        event_id = %event.event_id,
                        handler = handler.name(),
                        attempt = attempts,
                        error = %err,
                        "event delivery failed"
                    );
                    match inner.retry.delay_for(attempts) {
                        Some(delay) => {
                            tokio::time::sleep(delay).await;
                            attempts += 1;
                        }
                        None => break err,
                    }
                }
            }
        };

        metrics::counter!("bus_deliveries_dead_lettered").increment(1);

        // An exhausted dead letter or exhaustion notice is dropped, not
        // re-parked; otherwise a broken dlq consumer loops forever.
        if event.topic.split('.').next() == Some(DEAD_LETTER_PREFIX)
            || event.topic == DELIVERY_EXHAUSTED_TOPIC
        {
            tracing::error!(
                topic = %event.topic,
                event_id = %event.event_id,
                handler = handler.name(),
                "dead-letter delivery exhausted, dropping event"
            );
            return;
        }

        let reason = last_error.reason;
        let exhausted = EventEnvelope::builder()
            .topic(DELIVERY_EXHAUSTED_TOPIC)
            .payload_raw(serde_json::json!({
                "topic": event.topic.clone(),
                "event_id": event.event_id,
                "handler": handler.name(),
                "attempts": attempts,
                "last_error": reason.clone(),
            }))
            .correlation_id(event.correlation_id)
            .build();

        let dead_letter = event.into_dead_letter(attempts, reason);
        if let Err(err) = Self::publish_inner(inner, dead_letter).await {
            tracing::error!(error = %err, "failed to park dead letter");
        }
        if let Err(err) = Self::publish_inner(inner, exhausted).await {
            tracing::error!(error = %err, "failed to publish delivery-exhausted notice");
        }
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, event: EventEnvelope) -> Result<()> {
        Self::publish_inner(&self.inner, event).await
    }

    async fn subscribe(
        &self,
        pattern: TopicPattern,
        handler: Arc<dyn EventHandler>,
    ) -> Result<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(BusError::Unavailable("bus is shut down".to_string()));
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<EventEnvelope>();
        self.inner
            .subscriptions
            .write()
            .await
            .push(Subscription { pattern, tx });

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                Self::deliver(&inner, &handler, event).await;
            }
        });
        self.inner.tasks.lock().await.push(task);
        Ok(())
    }
}
