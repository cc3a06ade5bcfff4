//! At-least-once domain event bus connecting the bounded contexts.
//!
//! Events are immutable envelopes routed by dotted topic names
//! (e.g. `project.create.requested`). Subscribers receive matching events
//! at least once; redeliveries carry the same event ID so handlers can
//! deduplicate. Failed deliveries are retried with exponential backoff and
//! eventually parked on a `dlq.{topic}` dead-letter topic.

pub mod bus;
pub mod envelope;
pub mod error;
pub mod memory;
pub mod retry;

pub use bus::{EventBus, EventHandler, HandlerError, TopicPattern};
pub use envelope::{EventEnvelope, EventEnvelopeBuilder};
pub use error::{BusError, Result};
pub use memory::InMemoryEventBus;
pub use retry::RetryPolicy;

/// Topic prefix under which exhausted deliveries are parked.
pub const DEAD_LETTER_PREFIX: &str = "dlq";

/// Observability topic published when a delivery exhausts its retries.
pub const DELIVERY_EXHAUSTED_TOPIC: &str = "bus.delivery.exhausted";
