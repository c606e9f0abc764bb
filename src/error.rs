//! Error types for the messaging subsystem.
//!
//! [`EventError`] is the central error type for transports, routing, and
//! storage. [`HandlerError`] classifies state-mutation handler failures
//! into permanent and transient so the queue consumer can apply one
//! uniform acknowledge/requeue policy.

/// Server-side error enum covering transports, serialization, and storage.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    /// Broker connect, publish, or consume failure.
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    /// Connection attempt exceeded the configured timeout.
    #[error("connect timed out after {0} s")]
    ConnectTimeout(u64),

    /// Outbound payload could not be serialized for the wire.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Inbound message body is not valid UTF-8 JSON.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// The stream producer's outbound buffer is full.
    #[error("outbound buffer full for topic {0}")]
    BufferFull(String),

    /// The stream producer's delivery task has shut down.
    #[error("producer closed")]
    ProducerClosed,

    /// Event type string does not name a known event type.
    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    /// A message handler failed while a delivery was in flight.
    #[error("handler failure: {0}")]
    Handler(String),

    /// Durable store failure.
    #[error("storage error: {0}")]
    Storage(String),
}

/// Outcome classification for state-mutation handlers.
///
/// The queue consumer acknowledges-and-drops on [`HandlerError::Permanent`]
/// and negative-acknowledges with requeue on [`HandlerError::Transient`],
/// so redelivery is reserved for failures that a retry can actually fix.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Non-retriable failure: the message can never be processed
    /// (malformed body, missing or invalid `user_id`).
    #[error("permanent handler failure: {0}")]
    Permanent(String),

    /// Retriable failure: a dependency was unavailable and redelivery
    /// may succeed (store or connectivity errors).
    #[error("transient handler failure: {0}")]
    Transient(String),
}

impl HandlerError {
    /// Builds a permanent (ack-and-drop) failure.
    #[must_use]
    pub fn permanent(reason: impl Into<String>) -> Self {
        Self::Permanent(reason.into())
    }

    /// Builds a transient (nack-and-requeue) failure.
    #[must_use]
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient(reason.into())
    }

    /// Returns `true` if redelivery may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<EventError> for HandlerError {
    /// Storage and transport failures are worth a redelivery; everything
    /// else is wrong with the message itself.
    fn from(err: EventError) -> Self {
        match err {
            EventError::Storage(_)
            | EventError::TransportUnavailable(_)
            | EventError::ConnectTimeout(_) => Self::Transient(err.to_string()),
            _ => Self::Permanent(err.to_string()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_are_transient() {
        let err = HandlerError::from(EventError::Storage("db down".to_string()));
        assert!(err.is_transient());
    }

    #[test]
    fn malformed_errors_are_permanent() {
        let err = HandlerError::from(EventError::Malformed("not json".to_string()));
        assert!(!err.is_transient());
    }

    #[test]
    fn display_includes_reason() {
        let err = HandlerError::permanent("missing user_id");
        assert!(err.to_string().contains("missing user_id"));
    }
}
