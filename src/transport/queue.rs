//! Queue transport: broker seam, deliveries, and the lazy client.
//!
//! [`QueueBroker`] abstracts a point-to-point broker with per-message
//! acknowledge/requeue. [`QueueClient`] owns the process-wide lazy
//! connection: established with a timeout on first use, reused across
//! publishes and consumers until closed or detected closed.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::EventError;

/// Seam over a queue broker.
#[async_trait]
pub trait QueueBroker: Send + Sync {
    /// Establishes a connection.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::TransportUnavailable`] if the broker is
    /// unreachable.
    async fn connect(&self) -> Result<Arc<dyn QueueConnection>, EventError>;
}

/// An open connection to a queue broker.
#[async_trait]
pub trait QueueConnection: Send + Sync {
    /// Returns `true` once the connection is no longer usable.
    fn is_closed(&self) -> bool;

    /// Declares a queue idempotently; durable queues survive broker
    /// restarts.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::TransportUnavailable`] on a closed
    /// connection or broker failure.
    async fn declare_queue(&self, queue: &str, durable: bool) -> Result<(), EventError>;

    /// Publishes a message with the queue name as routing key.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::TransportUnavailable`] on a closed
    /// connection or broker failure.
    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<(), EventError>;

    /// Waits up to `timeout` for the next delivery; `Ok(None)` when no
    /// message arrived in time.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::TransportUnavailable`] on a closed
    /// connection or broker failure.
    async fn next_delivery(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> Result<Option<QueueDelivery>, EventError>;

    /// Closes the connection. Idempotent.
    async fn close(&self);
}

/// Acknowledgement backend for one delivery.
#[async_trait]
pub trait DeliveryAck: Send + Sync {
    /// Removes the message from the queue.
    async fn ack(self: Box<Self>);

    /// Rejects the message; `requeue` puts it back at the head of the
    /// queue for redelivery (at-least-once).
    async fn nack(self: Box<Self>, requeue: bool);
}

/// One in-flight delivery from a queue.
///
/// Must be settled exactly once via [`QueueDelivery::ack`] or
/// [`QueueDelivery::nack`].
pub struct QueueDelivery {
    /// Queue the message was consumed from.
    pub queue: String,
    /// Raw message body (UTF-8 JSON for platform events).
    pub payload: Vec<u8>,
    acker: Box<dyn DeliveryAck>,
}

impl QueueDelivery {
    /// Wraps a payload with its acknowledgement backend.
    #[must_use]
    pub fn new(queue: String, payload: Vec<u8>, acker: Box<dyn DeliveryAck>) -> Self {
        Self {
            queue,
            payload,
            acker,
        }
    }

    /// Acknowledges the delivery, removing it from the queue.
    pub async fn ack(self) {
        self.acker.ack().await;
    }

    /// Negatively acknowledges the delivery, optionally requeueing it.
    pub async fn nack(self, requeue: bool) {
        self.acker.nack(requeue).await;
    }
}

impl fmt::Debug for QueueDelivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueDelivery")
            .field("queue", &self.queue)
            .field("payload_len", &self.payload.len())
            .finish_non_exhaustive()
    }
}

/// Process-wide queue client with a lazy, timeout-guarded connection.
///
/// The connection is established on first use and reused by every
/// publisher and consumer in the process; [`QueueClient::reset`] drops
/// the reference so the next use reconnects (the consumer's recovery
/// path).
pub struct QueueClient {
    broker: Arc<dyn QueueBroker>,
    connection: Mutex<Option<Arc<dyn QueueConnection>>>,
    connect_timeout: Duration,
}

impl QueueClient {
    /// Creates a client over the given broker. No connection is made
    /// until first use.
    #[must_use]
    pub fn new(broker: Arc<dyn QueueBroker>, connect_timeout: Duration) -> Self {
        Self {
            broker,
            connection: Mutex::new(None),
            connect_timeout,
        }
    }

    /// Returns the shared connection, establishing it if absent or
    /// detected closed. The attempt is guarded by the configured timeout
    /// so startup can never hang indefinitely.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::ConnectTimeout`] when the attempt exceeds
    /// the timeout, or the broker's connect error.
    pub async fn connection(&self) -> Result<Arc<dyn QueueConnection>, EventError> {
        let mut guard = self.connection.lock().await;
        if let Some(conn) = guard.as_ref()
            && !conn.is_closed()
        {
            return Ok(Arc::clone(conn));
        }
        let conn = tokio::time::timeout(self.connect_timeout, self.broker.connect())
            .await
            .map_err(|_| EventError::ConnectTimeout(self.connect_timeout.as_secs()))??;
        tracing::info!("connected to queue broker");
        *guard = Some(Arc::clone(&conn));
        Ok(conn)
    }

    /// Declares the queue durable and publishes the message.
    ///
    /// Unlike the stream path, failures propagate to the caller; the
    /// event router converts them to its boolean contract.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::ConnectTimeout`] or
    /// [`EventError::TransportUnavailable`] when the broker cannot be
    /// reached or the publish fails.
    pub async fn publish(&self, queue: &str, payload: &[u8]) -> Result<(), EventError> {
        let conn = self.connection().await?;
        conn.declare_queue(queue, true).await?;
        conn.publish(queue, payload).await?;
        tracing::debug!(queue, "message published to queue");
        Ok(())
    }

    /// Drops the connection reference so the next use reconnects.
    pub async fn reset(&self) {
        *self.connection.lock().await = None;
    }

    /// Closes the connection if one was ever established. Idempotent.
    pub async fn close(&self) {
        if let Some(conn) = self.connection.lock().await.take() {
            conn.close().await;
            tracing::info!("queue connection closed");
        }
    }
}

impl fmt::Debug for QueueClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueClient")
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}
