use chrono::{DateTime, Utc};
use common::{CorrelationId, EventId};
use serde::{Deserialize, Serialize};

/// An immutable event envelope carrying a domain event on the bus.
///
/// The envelope wraps a JSON payload with the routing and deduplication
/// metadata consumers need: a unique event ID (stable across redeliveries)
/// and the correlation ID of the business transaction it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique identifier for this event. Redeliveries reuse it.
    pub event_id: EventId,

    /// Dotted topic name (e.g. "project.create.requested").
    pub topic: String,

    /// The event payload as JSON.
    pub payload: serde_json::Value,

    /// When the event was produced.
    pub produced_at: DateTime<Utc>,

    /// The business transaction this event belongs to.
    ///
    /// Events sharing a correlation ID are delivered to a given
    /// subscriber in publish order.
    pub correlation_id: CorrelationId,
}

impl EventEnvelope {
    /// Creates a new event envelope builder.
    pub fn builder() -> EventEnvelopeBuilder {
        EventEnvelopeBuilder::default()
    }

    /// Wraps this event as a dead letter destined for `dlq.{topic}`.
    ///
    /// The dead-letter payload carries the original envelope plus the
    /// attempt count and the last delivery error.
    pub fn into_dead_letter(self, attempts: u32, last_error: impl Into<String>) -> EventEnvelope {
        let dlq_topic = format!("{}.{}", crate::DEAD_LETTER_PREFIX, self.topic);
        let correlation_id = self.correlation_id;
        EventEnvelope {
            event_id: EventId::new(),
            topic: dlq_topic,
            payload: serde_json::json!({
                "original": self,
                "attempts": attempts,
                "last_error": last_error.into(),
            }),
            produced_at: Utc::now(),
            correlation_id,
        }
    }
}

/// Builder for constructing event envelopes.
#[derive(Debug, Default)]
pub struct EventEnvelopeBuilder {
    event_id: Option<EventId>,
    topic: Option<String>,
    payload: Option<serde_json::Value>,
    produced_at: Option<DateTime<Utc>>,
    correlation_id: Option<CorrelationId>,
}

impl EventEnvelopeBuilder {
    /// Sets the event ID. If not set, a new ID will be generated.
    pub fn event_id(mut self, id: EventId) -> Self {
        self.event_id = Some(id);
        self
    }

    /// Sets the topic.
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Sets the payload from a serializable value.
    pub fn payload<T: Serialize>(mut self, payload: &T) -> Result<Self, serde_json::Error> {
        self.payload = Some(serde_json::to_value(payload)?);
        Ok(self)
    }

    /// Sets the payload from a raw JSON value.
    pub fn payload_raw(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Sets the production timestamp. If not set, the current time is used.
    pub fn produced_at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.produced_at = Some(timestamp);
        self
    }

    /// Sets the correlation ID.
    pub fn correlation_id(mut self, id: CorrelationId) -> Self {
        self.correlation_id = Some(id);
        self
    }

    /// Builds the event envelope.
    ///
    /// # Panics
    ///
    /// Panics if required fields (topic, payload, correlation_id) are not set.
    pub fn build(self) -> EventEnvelope {
        EventEnvelope {
            event_id: self.event_id.unwrap_or_default(),
            topic: self.topic.expect("topic is required"),
            payload: self.payload.expect("payload is required"),
            produced_at: self.produced_at.unwrap_or_else(Utc::now),
            correlation_id: self.correlation_id.expect("correlation_id is required"),
        }
    }

    /// Tries to build the event envelope, returning None if required fields are missing.
    pub fn try_build(self) -> Option<EventEnvelope> {
        Some(EventEnvelope {
            event_id: self.event_id.unwrap_or_default(),
            topic: self.topic?,
            payload: self.payload?,
            produced_at: self.produced_at.unwrap_or_else(Utc::now),
            correlation_id: self.correlation_id?,
        })
    }
}
