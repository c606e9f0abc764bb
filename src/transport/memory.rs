//! In-process broker implementations of the transport seams.
//!
//! [`MemoryStreamBroker`] keeps append-only topic logs with per-group
//! committed offsets (replayable, at-least-once). [`MemoryQueueBroker`]
//! keeps FIFO queues with requeue-on-nack redelivery. Both back the
//! standalone service mode and the test suite; a networked broker is one
//! more implementation of the same traits.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use super::queue::{DeliveryAck, QueueBroker, QueueConnection, QueueDelivery};
use super::stream::{StreamBroker, StreamRecord, StreamSubscription};
use crate::error::EventError;

#[derive(Debug, Default)]
struct StreamState {
    /// Append-only log per topic.
    topics: HashMap<String, Vec<Vec<u8>>>,
    /// Committed position per (group, topic).
    committed: HashMap<(String, String), u64>,
}

/// In-process log-structured broker.
#[derive(Debug, Default)]
pub struct MemoryStreamBroker {
    inner: Arc<Mutex<StreamState>>,
    arrivals: Arc<Notify>,
}

impl MemoryStreamBroker {
    /// Creates an empty broker with no topics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records appended to a topic, for assertions.
    pub async fn topic_len(&self, topic: &str) -> usize {
        self.inner
            .lock()
            .await
            .topics
            .get(topic)
            .map_or(0, Vec::len)
    }
}

#[async_trait]
impl StreamBroker for MemoryStreamBroker {
    async fn append(&self, topic: &str, payload: &[u8]) -> Result<u64, EventError> {
        let offset = {
            let mut state = self.inner.lock().await;
            let log = state.topics.entry(topic.to_string()).or_default();
            log.push(payload.to_vec());
            log.len().saturating_sub(1) as u64
        };
        self.arrivals.notify_waiters();
        Ok(offset)
    }

    async fn subscribe(
        &self,
        topic: &str,
        group: &str,
    ) -> Result<Box<dyn StreamSubscription>, EventError> {
        let position = self
            .inner
            .lock()
            .await
            .committed
            .get(&(group.to_string(), topic.to_string()))
            .copied()
            .unwrap_or(0);
        Ok(Box::new(MemoryStreamSubscription {
            inner: Arc::clone(&self.inner),
            arrivals: Arc::clone(&self.arrivals),
            topic: topic.to_string(),
            group: group.to_string(),
            position,
        }))
    }
}

/// Subscription cursor over one topic log.
#[derive(Debug)]
struct MemoryStreamSubscription {
    inner: Arc<Mutex<StreamState>>,
    arrivals: Arc<Notify>,
    topic: String,
    group: String,
    position: u64,
}

#[async_trait]
impl StreamSubscription for MemoryStreamSubscription {
    async fn poll(&mut self, timeout: Duration) -> Result<Option<StreamRecord>, EventError> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.arrivals.notified();
            {
                let state = self.inner.lock().await;
                if let Some(log) = state.topics.get(&self.topic)
                    && let Some(payload) = log.get(self.position as usize)
                {
                    let record = StreamRecord {
                        topic: self.topic.clone(),
                        partition: 0,
                        offset: self.position,
                        payload: payload.clone(),
                    };
                    self.position = self.position.saturating_add(1);
                    return Ok(Some(record));
                }
            }
            let now = Instant::now();
            if now >= deadline
                || tokio::time::timeout(deadline - now, notified).await.is_err()
            {
                return Ok(None);
            }
        }
    }

    async fn commit(&mut self) -> Result<(), EventError> {
        self.inner
            .lock()
            .await
            .committed
            .insert((self.group.clone(), self.topic.clone()), self.position);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct QueueState {
    /// Ready messages per queue, FIFO.
    ready: HashMap<String, VecDeque<Vec<u8>>>,
    /// Durability flag recorded at declaration.
    declared: HashMap<String, bool>,
}

/// In-process queue broker.
#[derive(Debug, Default)]
pub struct MemoryQueueBroker {
    inner: Arc<Mutex<QueueState>>,
    arrivals: Arc<Notify>,
}

impl MemoryQueueBroker {
    /// Creates an empty broker with no queues.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Durability flag a queue was declared with, for assertions.
    pub async fn declared_durable(&self, queue: &str) -> Option<bool> {
        self.inner.lock().await.declared.get(queue).copied()
    }

    /// Number of ready (undelivered or requeued) messages in a queue.
    pub async fn ready_len(&self, queue: &str) -> usize {
        self.inner
            .lock()
            .await
            .ready
            .get(queue)
            .map_or(0, VecDeque::len)
    }
}

#[async_trait]
impl QueueBroker for MemoryQueueBroker {
    async fn connect(&self) -> Result<Arc<dyn QueueConnection>, EventError> {
        Ok(Arc::new(MemoryQueueConnection {
            inner: Arc::clone(&self.inner),
            arrivals: Arc::clone(&self.arrivals),
            closed: AtomicBool::new(false),
        }))
    }
}

/// One connection to the in-process queue broker.
#[derive(Debug)]
struct MemoryQueueConnection {
    inner: Arc<Mutex<QueueState>>,
    arrivals: Arc<Notify>,
    closed: AtomicBool,
}

impl MemoryQueueConnection {
    fn ensure_open(&self) -> Result<(), EventError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EventError::TransportUnavailable(
                "queue connection closed".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl QueueConnection for MemoryQueueConnection {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn declare_queue(&self, queue: &str, durable: bool) -> Result<(), EventError> {
        self.ensure_open()?;
        let mut state = self.inner.lock().await;
        state.ready.entry(queue.to_string()).or_default();
        state.declared.insert(queue.to_string(), durable);
        Ok(())
    }

    async fn publish(&self, queue: &str, payload: &[u8]) -> Result<(), EventError> {
        self.ensure_open()?;
        self.inner
            .lock()
            .await
            .ready
            .entry(queue.to_string())
            .or_default()
            .push_back(payload.to_vec());
        self.arrivals.notify_waiters();
        Ok(())
    }

    async fn next_delivery(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> Result<Option<QueueDelivery>, EventError> {
        let deadline = Instant::now() + timeout;
        loop {
            self.ensure_open()?;
            let notified = self.arrivals.notified();
            let popped = self
                .inner
                .lock()
                .await
                .ready
                .get_mut(queue)
                .and_then(VecDeque::pop_front);
            if let Some(payload) = popped {
                let acker = Box::new(MemoryAck {
                    inner: Arc::clone(&self.inner),
                    arrivals: Arc::clone(&self.arrivals),
                    queue: queue.to_string(),
                    payload: payload.clone(),
                });
                return Ok(Some(QueueDelivery::new(queue.to_string(), payload, acker)));
            }
            let now = Instant::now();
            if now >= deadline
                || tokio::time::timeout(deadline - now, notified).await.is_err()
            {
                return Ok(None);
            }
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.arrivals.notify_waiters();
    }
}

/// Acknowledgement backend: a nack with requeue puts the message back at
/// the head of the queue (redelivery-next semantics).
struct MemoryAck {
    inner: Arc<Mutex<QueueState>>,
    arrivals: Arc<Notify>,
    queue: String,
    payload: Vec<u8>,
}

#[async_trait]
impl DeliveryAck for MemoryAck {
    async fn ack(self: Box<Self>) {}

    async fn nack(self: Box<Self>, requeue: bool) {
        if requeue {
            self.inner
                .lock()
                .await
                .ready
                .entry(self.queue)
                .or_default()
                .push_front(self.payload);
            self.arrivals.notify_waiters();
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stream_subscription_resumes_from_committed_offset() {
        let broker = MemoryStreamBroker::new();
        let _ = broker.append("t", b"a").await;
        let _ = broker.append("t", b"b").await;

        let Ok(mut sub) = broker.subscribe("t", "g").await else {
            panic!("subscribe failed");
        };
        let first = sub.poll(Duration::from_millis(10)).await;
        assert!(matches!(first, Ok(Some(ref r)) if r.payload == b"a"));
        let committed = sub.commit().await;
        assert!(committed.is_ok());
        drop(sub);

        // A new subscription in the same group resumes past "a".
        let Ok(mut resumed) = broker.subscribe("t", "g").await else {
            panic!("subscribe failed");
        };
        let next = resumed.poll(Duration::from_millis(10)).await;
        assert!(matches!(next, Ok(Some(ref r)) if r.payload == b"b"));
    }

    #[tokio::test]
    async fn uncommitted_records_are_redelivered_to_a_new_subscription() {
        let broker = MemoryStreamBroker::new();
        let _ = broker.append("t", b"a").await;

        let Ok(mut sub) = broker.subscribe("t", "g").await else {
            panic!("subscribe failed");
        };
        let first = sub.poll(Duration::from_millis(10)).await;
        assert!(matches!(first, Ok(Some(_))));
        drop(sub); // no commit

        let Ok(mut again) = broker.subscribe("t", "g").await else {
            panic!("subscribe failed");
        };
        let redelivered = again.poll(Duration::from_millis(10)).await;
        assert!(matches!(redelivered, Ok(Some(ref r)) if r.payload == b"a"));
    }

    #[tokio::test]
    async fn groups_consume_independently() {
        let broker = MemoryStreamBroker::new();
        let _ = broker.append("t", b"a").await;

        let Ok(mut g1) = broker.subscribe("t", "g1").await else {
            panic!("subscribe failed");
        };
        let Ok(mut g2) = broker.subscribe("t", "g2").await else {
            panic!("subscribe failed");
        };
        assert!(matches!(g1.poll(Duration::from_millis(10)).await, Ok(Some(_))));
        assert!(matches!(g2.poll(Duration::from_millis(10)).await, Ok(Some(_))));
    }

    #[tokio::test]
    async fn queue_is_fifo_and_ack_removes() {
        let broker = MemoryQueueBroker::new();
        let Ok(conn) = broker.connect().await else {
            panic!("connect failed");
        };
        let _ = conn.publish("q", b"1").await;
        let _ = conn.publish("q", b"2").await;

        let Ok(Some(first)) = conn.next_delivery("q", Duration::from_millis(10)).await else {
            panic!("no delivery");
        };
        assert_eq!(first.payload, b"1");
        first.ack().await;
        assert_eq!(broker.ready_len("q").await, 1);
    }

    #[tokio::test]
    async fn nack_with_requeue_redelivers_at_the_head() {
        let broker = MemoryQueueBroker::new();
        let Ok(conn) = broker.connect().await else {
            panic!("connect failed");
        };
        let _ = conn.publish("q", b"1").await;
        let _ = conn.publish("q", b"2").await;

        let Ok(Some(first)) = conn.next_delivery("q", Duration::from_millis(10)).await else {
            panic!("no delivery");
        };
        first.nack(true).await;

        let Ok(Some(redelivered)) = conn.next_delivery("q", Duration::from_millis(10)).await
        else {
            panic!("no redelivery");
        };
        assert_eq!(redelivered.payload, b"1");
    }

    #[tokio::test]
    async fn nack_without_requeue_drops() {
        let broker = MemoryQueueBroker::new();
        let Ok(conn) = broker.connect().await else {
            panic!("connect failed");
        };
        let _ = conn.publish("q", b"1").await;

        let Ok(Some(delivery)) = conn.next_delivery("q", Duration::from_millis(10)).await else {
            panic!("no delivery");
        };
        delivery.nack(false).await;
        assert_eq!(broker.ready_len("q").await, 0);
    }

    #[tokio::test]
    async fn closed_connection_rejects_operations() {
        let broker = MemoryQueueBroker::new();
        let Ok(conn) = broker.connect().await else {
            panic!("connect failed");
        };
        conn.close().await;
        assert!(conn.is_closed());
        let result = conn.publish("q", b"1").await;
        assert!(matches!(result, Err(EventError::TransportUnavailable(_))));
    }
}
