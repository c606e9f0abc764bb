//! Consumer layer: stream and queue subscription loops.
//!
//! Both consumers dispatch inbound messages to an [`EventHandler`]; the
//! stream side skips past malformed messages and auto-commits offsets,
//! the queue side applies the permanent/transient acknowledge policy and
//! reconnects with exponential backoff.

use async_trait::async_trait;

use crate::error::HandlerError;

pub mod queue;
pub mod stream;

pub use queue::{QueueConsumer, QueueSubscription};
pub use stream::{StreamConsumer, SubscriptionSpec};

/// Business callback invoked for each inbound event.
///
/// Implementations must not fail for business-logic conditions they can
/// absorb; a returned [`HandlerError`] drives the transport's policy
/// (log-and-continue on the stream path, ack-or-requeue on the queue
/// path).
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Applies one inbound event.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::Permanent`] when the message can never be
    /// processed, [`HandlerError::Transient`] when a retry may succeed.
    async fn handle(
        &self,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> Result<(), HandlerError>;
}
