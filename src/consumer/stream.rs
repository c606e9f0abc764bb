//! Stream consumer: concurrent per-topic poll loops.
//!
//! [`StreamConsumer`] runs one task per `(topic, group, filter, handler)`
//! subscription. Each loop polls with a short timeout so cancellation is
//! picked up within one iteration, skips malformed messages without
//! stopping, and auto-commits offsets on an interval (at-least-once).

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::EventHandler;
use crate::transport::{StreamBroker, StreamRecord};

/// Poll timeout per loop iteration.
const POLL_TIMEOUT: Duration = Duration::from_secs(1);
/// Interval between offset auto-commits.
const COMMIT_INTERVAL: Duration = Duration::from_secs(5);

/// One (topic, group, filter, handler) subscription.
pub struct SubscriptionSpec {
    /// Topic to consume.
    pub topic: String,
    /// Consumer group (offset namespace).
    pub group: String,
    /// When set, only messages with this `event_type` reach the handler;
    /// others are skipped silently.
    pub event_type_filter: Option<String>,
    /// Callback for matching messages.
    pub handler: Arc<dyn EventHandler>,
}

impl fmt::Debug for SubscriptionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionSpec")
            .field("topic", &self.topic)
            .field("group", &self.group)
            .field("event_type_filter", &self.event_type_filter)
            .finish_non_exhaustive()
    }
}

/// Orchestrates the stream subscription tasks for one service instance.
pub struct StreamConsumer {
    broker: Arc<dyn StreamBroker>,
    tasks: Vec<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
}

impl fmt::Debug for StreamConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamConsumer")
            .field("tasks", &self.tasks.len())
            .finish_non_exhaustive()
    }
}

impl StreamConsumer {
    /// Creates a consumer over the given broker with no subscriptions.
    #[must_use]
    pub fn new(broker: Arc<dyn StreamBroker>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            broker,
            tasks: Vec::new(),
            shutdown,
        }
    }

    /// Starts one independently scheduled task per subscription.
    pub fn start(&mut self, specs: Vec<SubscriptionSpec>) {
        for spec in specs {
            let broker = Arc::clone(&self.broker);
            let shutdown = self.shutdown.subscribe();
            tracing::info!(topic = %spec.topic, group = %spec.group, "starting stream consumer task");
            self.tasks
                .push(tokio::spawn(run_subscription(broker, spec, shutdown)));
        }
    }

    /// Signals all tasks to stop and waits for them to exit, converting
    /// cancellation into normal termination.
    pub async fn stop(&mut self) {
        let _ = self.shutdown.send(true);
        let tasks = std::mem::take(&mut self.tasks);
        for result in join_all(tasks).await {
            if let Err(e) = result
                && !e.is_cancelled()
            {
                tracing::error!(error = %e, "stream consumer task panicked");
            }
        }
        tracing::info!("stream consumers stopped");
    }
}

async fn run_subscription(
    broker: Arc<dyn StreamBroker>,
    spec: SubscriptionSpec,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut subscription = match broker.subscribe(&spec.topic, &spec.group).await {
        Ok(subscription) => subscription,
        Err(e) => {
            tracing::error!(topic = %spec.topic, error = %e, "failed to subscribe, stream consumption disabled for topic");
            return;
        }
    };
    tracing::info!(topic = %spec.topic, group = %spec.group, "started consuming from stream topic");

    let mut commit_tick = tokio::time::interval(COMMIT_INTERVAL);
    commit_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = commit_tick.tick() => {
                if let Err(e) = subscription.commit().await {
                    tracing::warn!(topic = %spec.topic, error = %e, "offset commit failed");
                }
            }
            polled = subscription.poll(POLL_TIMEOUT) => match polled {
                Ok(Some(record)) => dispatch_record(&spec, &record).await,
                Ok(None) => {}
                Err(e) => {
                    // Soft errors are logged and skipped; only
                    // cancellation stops consumption.
                    tracing::warn!(topic = %spec.topic, error = %e, "stream poll error");
                }
            }
        }
    }

    if let Err(e) = subscription.commit().await {
        tracing::warn!(topic = %spec.topic, error = %e, "final offset commit failed");
    }
    tracing::info!(topic = %spec.topic, "stopped consuming from stream topic");
}

async fn dispatch_record(spec: &SubscriptionSpec, record: &StreamRecord) {
    let payload: serde_json::Value = match serde_json::from_slice(&record.payload) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::warn!(
                topic = %record.topic,
                offset = record.offset,
                error = %e,
                "skipping malformed stream message"
            );
            return;
        }
    };
    let event_type = payload
        .get("event_type")
        .and_then(serde_json::Value::as_str)
        .unwrap_or(&record.topic)
        .to_string();
    if let Some(filter) = &spec.event_type_filter
        && filter != &event_type
    {
        return;
    }
    if let Err(e) = spec.handler.handle(&event_type, &payload).await {
        tracing::error!(event_type, topic = %record.topic, error = %e, "stream handler failed");
    }
}
