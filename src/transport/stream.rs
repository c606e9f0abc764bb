//! Log-structured stream transport: broker seam and buffered producer.
//!
//! [`StreamBroker`] abstracts an append-only, replayable topic log with
//! per-(topic, consumer-group) committed offsets. [`StreamProducer`] is
//! the publish client: a bounded outbound channel drained by a dedicated
//! delivery task, so callers never block on a broker round-trip but every
//! delivery outcome is still observed and logged.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, mpsc, oneshot};
use tokio::time::Instant;

use crate::error::EventError;

/// A record read from a topic log.
#[derive(Debug, Clone)]
pub struct StreamRecord {
    /// Topic the record was read from.
    pub topic: String,
    /// Partition within the topic.
    pub partition: u32,
    /// Offset within the partition.
    pub offset: u64,
    /// Raw message value (UTF-8 JSON for platform events).
    pub payload: Vec<u8>,
}

/// Seam over a log-structured broker.
///
/// Implementations provide durable, ordered, replayable topic logs; the
/// in-process implementation lives in [`super::memory`].
#[async_trait]
pub trait StreamBroker: Send + Sync {
    /// Appends a record to the topic log, returning its offset.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::TransportUnavailable`] if the broker cannot
    /// accept the record.
    async fn append(&self, topic: &str, payload: &[u8]) -> Result<u64, EventError>;

    /// Opens a subscription for `(topic, group)`, resuming from the
    /// group's committed offset.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::TransportUnavailable`] if the subscription
    /// cannot be established.
    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
    ) -> Result<Box<dyn StreamSubscription>, EventError>;
}

/// One logical (topic, consumer-group) subscription.
#[async_trait]
pub trait StreamSubscription: Send {
    /// Waits up to `timeout` for the next record; `Ok(None)` when no
    /// record arrived in time.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::TransportUnavailable`] on broker failure.
    async fn poll(&mut self, timeout: Duration) -> Result<Option<StreamRecord>, EventError>;

    /// Commits the consumed position for this group.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::TransportUnavailable`] on broker failure.
    async fn commit(&mut self) -> Result<(), EventError>;
}

/// Delivery outcome for one queued record.
#[derive(Debug)]
pub struct DeliveryReport {
    /// Topic the record was destined for.
    pub topic: String,
    /// Assigned offset on success, transport error on failure.
    pub outcome: Result<u64, EventError>,
}

/// Handle returned by [`StreamProducer::send`].
///
/// Callers may await the delivery report or drop the handle; delivery
/// proceeds either way (fire-and-forget with observability).
#[derive(Debug)]
pub struct DeliveryHandle {
    rx: oneshot::Receiver<DeliveryReport>,
}

impl DeliveryHandle {
    /// Waits for the delivery report.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::ProducerClosed`] if the delivery task shut
    /// down before reporting.
    pub async fn wait(self) -> Result<DeliveryReport, EventError> {
        self.rx.await.map_err(|_| EventError::ProducerClosed)
    }
}

struct Outbound {
    topic: String,
    payload: Vec<u8>,
    report: oneshot::Sender<DeliveryReport>,
}

/// Buffered fire-and-forget publisher for the stream transport.
///
/// `send` queues the record on a bounded channel and returns immediately;
/// a dedicated delivery task appends records to the broker and logs each
/// outcome. [`StreamProducer::flush`] drains in-flight records on
/// shutdown.
#[derive(Debug)]
pub struct StreamProducer {
    tx: mpsc::Sender<Outbound>,
    pending: Arc<AtomicUsize>,
    drained: Arc<Notify>,
}

impl StreamProducer {
    /// Creates a producer over the given broker with a bounded outbound
    /// buffer, and spawns its delivery task.
    #[must_use]
    pub fn new(broker: Arc<dyn StreamBroker>, buffer: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<Outbound>(buffer.max(1));
        let pending = Arc::new(AtomicUsize::new(0));
        let drained = Arc::new(Notify::new());

        let task_pending = Arc::clone(&pending);
        let task_drained = Arc::clone(&drained);
        tokio::spawn(async move {
            while let Some(outbound) = rx.recv().await {
                let outcome = broker.append(&outbound.topic, &outbound.payload).await;
                match &outcome {
                    Ok(offset) => {
                        tracing::debug!(topic = %outbound.topic, offset, "record delivered");
                    }
                    Err(e) => {
                        tracing::error!(topic = %outbound.topic, error = %e, "record delivery failed");
                    }
                }
                let _ = outbound.report.send(DeliveryReport {
                    topic: outbound.topic,
                    outcome,
                });
                task_pending.fetch_sub(1, Ordering::AcqRel);
                task_drained.notify_waiters();
            }
        });

        Self {
            tx,
            pending,
            drained,
        }
    }

    /// Queues a record for asynchronous delivery.
    ///
    /// Non-blocking: a full buffer is an error, not a stall.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::BufferFull`] when the outbound buffer is at
    /// capacity, [`EventError::ProducerClosed`] when the delivery task
    /// has shut down.
    pub fn send(&self, topic: &str, payload: Vec<u8>) -> Result<DeliveryHandle, EventError> {
        let (report_tx, report_rx) = oneshot::channel();
        let outbound = Outbound {
            topic: topic.to_string(),
            payload,
            report: report_tx,
        };
        self.pending.fetch_add(1, Ordering::AcqRel);
        match self.tx.try_send(outbound) {
            Ok(()) => Ok(DeliveryHandle { rx: report_rx }),
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.pending.fetch_sub(1, Ordering::AcqRel);
                Err(EventError::BufferFull(topic.to_string()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.pending.fetch_sub(1, Ordering::AcqRel);
                Err(EventError::ProducerClosed)
            }
        }
    }

    /// Number of records queued or in delivery.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Blocks up to `timeout` draining in-flight records, returning how
    /// many were left unflushed.
    ///
    /// Never errors; idempotent and instant when nothing is pending.
    pub async fn flush(&self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.drained.notified();
            let remaining = self.pending.load(Ordering::Acquire);
            if remaining == 0 {
                tracing::info!("all stream messages flushed");
                return 0;
            }
            let now = Instant::now();
            if now >= deadline
                || tokio::time::timeout(deadline - now, notified).await.is_err()
            {
                let remaining = self.pending.load(Ordering::Acquire);
                if remaining > 0 {
                    tracing::warn!(remaining, "stream messages not flushed within timeout");
                }
                return remaining;
            }
        }
    }
}
