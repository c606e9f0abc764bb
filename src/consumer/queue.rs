//! Queue consumer: resilient per-queue loops with ack/nack policy.
//!
//! Each queue subscription runs inside a retry loop with exponential
//! backoff (1s doubling to a 60s cap): reconnect through the shared
//! [`QueueClient`], declare the queue durable, pull deliveries, and on
//! any transport or handler failure tear down the connection reference
//! and retry after the current backoff. Handler outcomes drive the
//! acknowledge policy: success and permanent failures ack (permanent
//! failures are logged and dropped), transient failures nack with
//! requeue for at-least-once redelivery.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::EventHandler;
use crate::error::{EventError, HandlerError};
use crate::transport::{QueueClient, QueueDelivery};

/// Wait per delivery poll, bounding cancellation latency.
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(1);
/// First retry delay after a failure.
const BACKOFF_FLOOR: Duration = Duration::from_secs(1);
/// Upper bound on the retry delay.
const BACKOFF_CAP: Duration = Duration::from_secs(60);

/// Exponential backoff schedule: 1s, 2s, 4s, ... capped at 60s.
#[derive(Debug)]
pub struct Backoff {
    current: Duration,
}

impl Backoff {
    /// Starts the schedule at the floor.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            current: BACKOFF_FLOOR,
        }
    }

    /// Returns the delay to sleep before the next attempt and doubles
    /// the schedule, saturating at the cap.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(BACKOFF_CAP);
        delay
    }

    /// Resets the schedule to the floor after a success.
    pub fn reset(&mut self) {
        self.current = BACKOFF_FLOOR;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

/// One (queue, handler) subscription.
pub struct QueueSubscription {
    /// Queue to consume.
    pub queue: String,
    /// Callback for each delivery.
    pub handler: Arc<dyn EventHandler>,
}

impl fmt::Debug for QueueSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueSubscription")
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

/// Orchestrates the queue subscription tasks for one service instance.
pub struct QueueConsumer {
    client: Arc<QueueClient>,
    tasks: Vec<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
}

impl fmt::Debug for QueueConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueConsumer")
            .field("tasks", &self.tasks.len())
            .finish_non_exhaustive()
    }
}

impl QueueConsumer {
    /// Creates a consumer over the shared queue client.
    #[must_use]
    pub fn new(client: Arc<QueueClient>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            client,
            tasks: Vec::new(),
            shutdown,
        }
    }

    /// Starts one resilience loop per subscription.
    pub fn start(&mut self, subscriptions: Vec<QueueSubscription>) {
        for subscription in subscriptions {
            let client = Arc::clone(&self.client);
            let shutdown = self.shutdown.subscribe();
            tracing::info!(queue = %subscription.queue, "starting queue consumer task");
            self.tasks
                .push(tokio::spawn(run_queue_loop(client, subscription, shutdown)));
        }
    }

    /// Signals all loops to stop and waits for them to exit.
    pub async fn stop(&mut self) {
        let _ = self.shutdown.send(true);
        let tasks = std::mem::take(&mut self.tasks);
        for result in join_all(tasks).await {
            if let Err(e) = result
                && !e.is_cancelled()
            {
                tracing::error!(error = %e, "queue consumer task panicked");
            }
        }
        tracing::info!("queue consumers stopped");
    }
}

async fn run_queue_loop(
    client: Arc<QueueClient>,
    subscription: QueueSubscription,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut backoff = Backoff::new();
    loop {
        if *shutdown.borrow() {
            break;
        }
        match consume_queue(&client, &subscription, &mut shutdown, &mut backoff).await {
            Ok(()) => break, // shutdown requested inside the consume loop
            Err(e) => {
                client.reset().await;
                let delay = backoff.next_delay();
                tracing::warn!(
                    queue = %subscription.queue,
                    error = %e,
                    delay_secs = delay.as_secs(),
                    "queue consume failed, retrying after backoff"
                );
                tokio::select! {
                    _ = shutdown.changed() => break,
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
    tracing::info!(queue = %subscription.queue, "queue consumer task stopped");
}

/// Connects, declares, and pulls deliveries until shutdown (`Ok`) or a
/// failure that warrants a reconnect (`Err`).
async fn consume_queue(
    client: &QueueClient,
    subscription: &QueueSubscription,
    shutdown: &mut watch::Receiver<bool>,
    backoff: &mut Backoff,
) -> Result<(), EventError> {
    let connection = client.connection().await?;
    connection.declare_queue(&subscription.queue, true).await?;
    backoff.reset();
    tracing::info!(queue = %subscription.queue, "consuming from queue");

    loop {
        tokio::select! {
            _ = shutdown.changed() => return Ok(()),
            delivery = connection.next_delivery(&subscription.queue, DELIVERY_TIMEOUT) => {
                if let Some(delivery) = delivery? {
                    settle_delivery(subscription, delivery).await?;
                }
            }
        }
    }
}

/// Runs the handler inside an explicit acknowledge scope.
///
/// A transient failure nacks with requeue and surfaces as an error so
/// the resilience loop tears the connection down and backs off before
/// the redelivery.
async fn settle_delivery(
    subscription: &QueueSubscription,
    delivery: QueueDelivery,
) -> Result<(), EventError> {
    match process_delivery(subscription, &delivery).await {
        Ok(()) => {
            delivery.ack().await;
            Ok(())
        }
        Err(HandlerError::Permanent(reason)) => {
            tracing::error!(
                queue = %subscription.queue,
                reason = %reason,
                "dropping message after permanent handler failure"
            );
            delivery.ack().await;
            Ok(())
        }
        Err(HandlerError::Transient(reason)) => {
            tracing::warn!(
                queue = %subscription.queue,
                reason = %reason,
                "requeueing message after transient handler failure"
            );
            delivery.nack(true).await;
            Err(EventError::Handler(reason))
        }
    }
}

async fn process_delivery(
    subscription: &QueueSubscription,
    delivery: &QueueDelivery,
) -> Result<(), HandlerError> {
    let payload: serde_json::Value = serde_json::from_slice(&delivery.payload)
        .map_err(|e| HandlerError::permanent(format!("malformed message body: {e}")))?;
    let event_type = payload
        .get("event_type")
        .and_then(serde_json::Value::as_str)
        .unwrap_or(&delivery.queue)
        .to_string();
    subscription.handler.handle(&event_type, &payload).await
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use crate::transport::queue::{QueueBroker, QueueConnection};
    use crate::transport::MemoryQueueBroker;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    /// Handler failing transiently for the first `failures` invocations.
    struct FlakyHandler {
        failures: usize,
        calls: AtomicUsize,
        handled: Mutex<Vec<String>>,
    }

    impl FlakyHandler {
        fn new(failures: usize) -> Self {
            Self {
                failures,
                calls: AtomicUsize::new(0),
                handled: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl EventHandler for FlakyHandler {
        async fn handle(
            &self,
            event_type: &str,
            _payload: &serde_json::Value,
        ) -> Result<(), HandlerError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(HandlerError::transient("store unavailable"));
            }
            self.handled.lock().await.push(event_type.to_string());
            Ok(())
        }
    }

    /// Handler rejecting everything permanently.
    struct RejectingHandler {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EventHandler for RejectingHandler {
        async fn handle(
            &self,
            _event_type: &str,
            _payload: &serde_json::Value,
        ) -> Result<(), HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(HandlerError::permanent("missing user_id"))
        }
    }

    /// Broker failing the first `failures` connect attempts.
    struct FlakyBroker {
        inner: MemoryQueueBroker,
        failures: usize,
        attempts: AtomicUsize,
    }

    impl FlakyBroker {
        fn new(failures: usize) -> Self {
            Self {
                inner: MemoryQueueBroker::new(),
                failures,
                attempts: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl QueueBroker for FlakyBroker {
        async fn connect(&self) -> Result<Arc<dyn QueueConnection>, EventError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.failures {
                return Err(EventError::TransportUnavailable(
                    "connection refused".to_string(),
                ));
            }
            self.inner.connect().await
        }
    }

    fn message(event_type: &str) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "event_type": event_type,
            "user_id": "u1",
        }))
        .unwrap_or_default()
    }

    async fn wait_until(mut done: impl AsyncFnMut() -> bool) {
        for _ in 0..600 {
            if done().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[test]
    fn backoff_schedule_doubles_to_the_cap_and_resets() {
        let mut backoff = Backoff::new();
        let delays: Vec<u64> = (0..8).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60, 60]);

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_redelivers_until_the_handler_succeeds() {
        let broker = Arc::new(MemoryQueueBroker::new());
        let client = Arc::new(QueueClient::new(
            Arc::clone(&broker) as Arc<dyn QueueBroker>,
            Duration::from_secs(5),
        ));
        let handler = Arc::new(FlakyHandler::new(2));

        let publish = client.publish("bot.started", &message("bot.started")).await;
        assert!(publish.is_ok());

        let mut consumer = QueueConsumer::new(Arc::clone(&client));
        consumer.start(vec![QueueSubscription {
            queue: "bot.started".to_string(),
            handler: Arc::clone(&handler) as Arc<dyn EventHandler>,
        }]);

        wait_until(async || !handler.handled.lock().await.is_empty()).await;
        consumer.stop().await;

        // Two transient failures, then one success on the third delivery.
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        assert_eq!(handler.handled.lock().await.len(), 1);
        assert_eq!(broker.ready_len("bot.started").await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn handled_messages_are_never_redelivered() {
        let broker = Arc::new(MemoryQueueBroker::new());
        let client = Arc::new(QueueClient::new(
            Arc::clone(&broker) as Arc<dyn QueueBroker>,
            Duration::from_secs(5),
        ));
        let handler = Arc::new(FlakyHandler::new(0));

        let mut consumer = QueueConsumer::new(Arc::clone(&client));
        consumer.start(vec![QueueSubscription {
            queue: "bot.stopped".to_string(),
            handler: Arc::clone(&handler) as Arc<dyn EventHandler>,
        }]);

        let _ = client.publish("bot.stopped", &message("bot.stopped")).await;
        let _ = client.publish("bot.stopped", &message("bot.stopped")).await;

        wait_until(async || handler.handled.lock().await.len() >= 2).await;

        // Let the loop idle a few more polls; nothing may come back.
        tokio::time::sleep(Duration::from_secs(5)).await;
        consumer.stop().await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);
        assert_eq!(broker.ready_len("bot.stopped").await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failure_is_acked_and_dropped() {
        let broker = Arc::new(MemoryQueueBroker::new());
        let client = Arc::new(QueueClient::new(
            Arc::clone(&broker) as Arc<dyn QueueBroker>,
            Duration::from_secs(5),
        ));
        let handler = Arc::new(RejectingHandler {
            calls: AtomicUsize::new(0),
        });

        let _ = client.publish("bot.error", &message("bot.error")).await;

        let mut consumer = QueueConsumer::new(Arc::clone(&client));
        consumer.start(vec![QueueSubscription {
            queue: "bot.error".to_string(),
            handler: Arc::clone(&handler) as Arc<dyn EventHandler>,
        }]);

        wait_until(async || handler.calls.load(Ordering::SeqCst) >= 1).await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        consumer.stop().await;

        // Exactly one attempt: permanent errors never requeue.
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(broker.ready_len("bot.error").await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_body_is_dropped_not_requeued_forever() {
        let broker = Arc::new(MemoryQueueBroker::new());
        let client = Arc::new(QueueClient::new(
            Arc::clone(&broker) as Arc<dyn QueueBroker>,
            Duration::from_secs(5),
        ));
        let handler = Arc::new(FlakyHandler::new(0));

        let _ = client.publish("bot.started", b"{not json").await;

        let mut consumer = QueueConsumer::new(Arc::clone(&client));
        consumer.start(vec![QueueSubscription {
            queue: "bot.started".to_string(),
            handler: Arc::clone(&handler) as Arc<dyn EventHandler>,
        }]);

        wait_until(async || broker.ready_len("bot.started").await == 0).await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        consumer.stop().await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
        assert_eq!(broker.ready_len("bot.started").await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn consumer_reconnects_with_backoff_after_connect_failures() {
        let broker = Arc::new(FlakyBroker::new(3));
        let client = Arc::new(QueueClient::new(
            Arc::clone(&broker) as Arc<dyn QueueBroker>,
            Duration::from_secs(5),
        ));
        let handler = Arc::new(FlakyHandler::new(0));

        let mut consumer = QueueConsumer::new(Arc::clone(&client));
        consumer.start(vec![QueueSubscription {
            queue: "bot.started".to_string(),
            handler: Arc::clone(&handler) as Arc<dyn EventHandler>,
        }]);

        // Survive 3 failed attempts (1s + 2s + 4s of backoff), connect,
        // then consume a message published through the same client.
        wait_until(async || broker.attempts.load(Ordering::SeqCst) >= 4).await;
        let _ = client.publish("bot.started", &message("bot.started")).await;
        wait_until(async || handler.handled.lock().await.len() >= 1).await;
        consumer.stop().await;

        assert_eq!(handler.handled.lock().await.len(), 1);
    }
}
