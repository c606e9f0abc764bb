//! Event router: the single publish entry point for every producer.
//!
//! [`EventRouter`] resolves an event type to its transport and hands the
//! serialized envelope to the matching client. The contract is a boolean:
//! `publish` never fails the caller, whatever the transport state.
//! Failures are logged and reported as `false`, and a globally disabled
//! transport is a deliberate `true` no-op so business logic never breaks
//! because messaging is turned off in an environment.

use std::sync::Arc;
use std::time::Duration;

use crate::domain::{EventEnvelope, EventType, TopicMap, Transport};
use crate::transport::{QueueClient, StreamProducer};

/// Routes events to the stream or queue transport by event type.
///
/// Owns the stream producer and a shared reference to the process-wide
/// queue client, both injected at startup. Makes exactly one delivery
/// attempt per call; retry belongs to the transports and consumers.
#[derive(Debug)]
pub struct EventRouter {
    producer: StreamProducer,
    queue: Arc<QueueClient>,
    topics: TopicMap,
    stream_enabled: bool,
    queue_enabled: bool,
}

impl EventRouter {
    /// Creates a router over the injected transport clients.
    #[must_use]
    pub fn new(
        producer: StreamProducer,
        queue: Arc<QueueClient>,
        topics: TopicMap,
        stream_enabled: bool,
        queue_enabled: bool,
    ) -> Self {
        Self {
            producer,
            queue,
            topics,
            stream_enabled,
            queue_enabled,
        }
    }

    /// Publishes an event by its raw wire name.
    ///
    /// Unknown event types fail open: a warning is logged and the event
    /// goes to the default stream topic, so a typo in an out-of-process
    /// producer never loses an event.
    pub async fn publish(
        &self,
        event_type: &str,
        data: serde_json::Map<String, serde_json::Value>,
    ) -> bool {
        match event_type.parse::<EventType>() {
            Ok(event) => self.publish_event(event, data).await,
            Err(_) => {
                tracing::warn!(event_type, "unknown event type, defaulting to stream");
                self.publish_stream(event_type, &self.topics.default, data)
            }
        }
    }

    /// Publishes a known event type to its bound transport.
    pub async fn publish_event(
        &self,
        event: EventType,
        data: serde_json::Map<String, serde_json::Value>,
    ) -> bool {
        match event.transport() {
            Transport::Stream => {
                self.publish_stream(event.as_str(), self.topics.stream_topic(event), data)
            }
            Transport::Queue => self.publish_queue(event, data).await,
        }
    }

    /// Drains the stream producer's in-flight records, returning how many
    /// were left unflushed. Called once at shutdown; idempotent.
    pub async fn flush(&self, timeout: Duration) -> usize {
        self.producer.flush(timeout).await
    }

    fn publish_stream(
        &self,
        event_type: &str,
        topic: &str,
        data: serde_json::Map<String, serde_json::Value>,
    ) -> bool {
        if !self.stream_enabled {
            tracing::debug!(event_type, "stream transport disabled, skipping");
            return true;
        }
        let envelope = EventEnvelope::new(event_type, data);
        let bytes = match envelope.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(event_type, error = %e, "failed to serialize event");
                return false;
            }
        };
        // Accepted-for-send, not confirmed-delivered: the producer's
        // delivery task logs the eventual outcome.
        match self.producer.send(topic, bytes) {
            Ok(_handle) => {
                tracing::debug!(event_type, topic, "event queued for stream delivery");
                true
            }
            Err(e) => {
                tracing::error!(event_type, topic, error = %e, "failed to queue stream event");
                false
            }
        }
    }

    async fn publish_queue(
        &self,
        event: EventType,
        data: serde_json::Map<String, serde_json::Value>,
    ) -> bool {
        if !self.queue_enabled {
            tracing::debug!(event_type = %event, "queue transport disabled, skipping");
            return true;
        }
        let queue = event.as_str();
        let envelope = EventEnvelope::new(queue, data);
        let bytes = match envelope.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(event_type = %event, error = %e, "failed to serialize event");
                return false;
            }
        };
        match self.queue.publish(queue, &bytes).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(event_type = %event, error = %e, "failed to publish to queue");
                false
            }
        }
    }
}
