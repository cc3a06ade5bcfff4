use async_trait::async_trait;

use crate::envelope::EventEnvelope;
use crate::error::{BusError, Result};

/// Error returned by an event handler.
///
/// A handler failure triggers redelivery per the bus retry policy; the
/// reason is recorded in the dead letter once retries are exhausted.
#[derive(Debug, Clone)]
pub struct HandlerError {
    pub reason: String,
}

impl HandlerError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.reason)
    }
}

impl std::error::Error for HandlerError {}

/// A subscriber callback invoked for every matching event, at least once.
///
/// Handlers must be idempotent: the bus does not deduplicate redeliveries,
/// it only guarantees the redelivered envelope carries the same `event_id`.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handler name, used in logs and dead-letter records.
    fn name(&self) -> &str;

    /// Handles one event. Returning an error schedules a redelivery.
    async fn handle(&self, event: &EventEnvelope) -> std::result::Result<(), HandlerError>;
}

/// A dotted topic pattern for subscriptions.
///
/// Segments match literally; a `*` segment matches exactly one topic
/// segment, except in final position where it matches one or more
/// (so `dlq.*` matches every dead-letter topic).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicPattern {
    segments: Vec<String>,
}

impl TopicPattern {
    /// Parses a pattern, rejecting empty patterns and empty segments.
    pub fn parse(pattern: &str) -> Result<Self> {
        if pattern.is_empty() {
            return Err(BusError::InvalidTopic {
                topic: pattern.to_string(),
                reason: "pattern is empty".to_string(),
            });
        }
        let segments: Vec<String> = pattern.split('.').map(str::to_string).collect();
        if segments.iter().any(String::is_empty) {
            return Err(BusError::InvalidTopic {
                topic: pattern.to_string(),
                reason: "pattern contains an empty segment".to_string(),
            });
        }
        Ok(Self { segments })
    }

    /// Returns true if the given topic matches this pattern.
    pub fn matches(&self, topic: &str) -> bool {
        let topic_segments: Vec<&str> = topic.split('.').collect();

        for (i, pattern_segment) in self.segments.iter().enumerate() {
            let is_last = i == self.segments.len() - 1;
            match topic_segments.get(i) {
                None => return false,
                Some(topic_segment) => {
                    if pattern_segment == "*" {
                        if is_last {
                            // Trailing wildcard swallows the rest.
                            return true;
                        }
                        continue;
                    }
                    if pattern_segment != topic_segment {
                        return false;
                    }
                    if is_last {
                        return topic_segments.len() == self.segments.len();
                    }
                }
            }
        }
        false
    }
}

impl std::fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.segments.join("."))
    }
}

/// Core trait for event bus implementations.
///
/// `publish` returns once the event is accepted into the bus's durable
/// log, not once it is delivered. Delivery is asynchronous, at-least-once,
/// and ordered per correlation ID for a given subscriber.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publishes an event, returning once it is persisted.
    ///
    /// Fails with `BusError::Unavailable` if the bus is shut down.
    async fn publish(&self, event: EventEnvelope) -> Result<()>;

    /// Registers a handler for every event matching the pattern.
    async fn subscribe(&self, pattern: TopicPattern, handler: std::sync::Arc<dyn EventHandler>)
    -> Result<()>;
}
