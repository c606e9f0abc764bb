//! Bot status service: state transitions driven by inbound events.
//!
//! [`BotStatusService`] is the business logic behind both consumers. It
//! translates an event into a create/update on the bot-status and trade
//! records, and for `bot.trade.executed` only, re-publishes the derived
//! `trade.executed` fact through the event router, turning a
//! queue-delivered command into a stream-delivered fact. The re-publish
//! is a documented side effect of that one handler, not a generic hook.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::consumer::EventHandler;
use crate::domain::{BotStatus, EventType, ExecutionStatus, NewTrade, TradeSide};
use crate::error::HandlerError;
use crate::router::EventRouter;
use crate::storage::{StatusStore, TradeInsert};

/// Applies inbound events to the bot-status and trade records.
pub struct BotStatusService {
    store: Arc<dyn StatusStore>,
    router: Arc<EventRouter>,
}

impl fmt::Debug for BotStatusService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BotStatusService").finish_non_exhaustive()
    }
}

impl BotStatusService {
    /// Creates the service over the injected store and router.
    #[must_use]
    pub fn new(store: Arc<dyn StatusStore>, router: Arc<EventRouter>) -> Self {
        Self { store, router }
    }

    /// Applies one inbound event to the records.
    ///
    /// Every event reaching this service must carry a parseable
    /// `user_id`; its absence aborts processing of that message.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::Permanent`] for messages that can never
    /// be processed, [`HandlerError::Transient`] on store failures.
    pub async fn apply(
        &self,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> Result<(), HandlerError> {
        let Ok(event) = event_type.parse::<EventType>() else {
            tracing::debug!(event_type, "no state transition for event type");
            return Ok(());
        };
        let user_id = parse_user_id(payload)?;

        match event {
            EventType::UserCreated => self.initialize(user_id).await,
            EventType::BotStarted => self.mark_started(user_id, payload).await,
            EventType::BotStopped => self.mark_stopped(user_id, payload).await,
            EventType::BotError => self.mark_failed(user_id, payload).await,
            EventType::BotTradeExecuted => self.record_trade(user_id, payload).await,
            EventType::BotTradeSkipped => {
                let reason = payload_str(payload, "reason").unwrap_or("unknown");
                tracing::info!(%user_id, reason, "trade skipped");
                Ok(())
            }
            _ => {
                tracing::debug!(event_type, "no state transition for event type");
                Ok(())
            }
        }
    }

    /// Creates the default idle row for a new user; no-op when one
    /// already exists.
    async fn initialize(&self, user_id: Uuid) -> Result<(), HandlerError> {
        if self.store.find(user_id).await?.is_some() {
            return Ok(());
        }
        self.store.create(&BotStatus::new(user_id)).await?;
        tracing::info!(%user_id, "initialized bot status");
        Ok(())
    }

    async fn mark_started(
        &self,
        user_id: Uuid,
        payload: &serde_json::Value,
    ) -> Result<(), HandlerError> {
        let mut status = self.load_or_create(user_id).await?;
        status.execution_status = ExecutionStatus::Running;
        status.last_execution_at =
            Some(payload_timestamp(payload, "started_at").unwrap_or_else(Utc::now));
        self.store.save(&status).await?;
        tracing::info!(%user_id, "bot status set to running");
        Ok(())
    }

    async fn mark_stopped(
        &self,
        user_id: Uuid,
        payload: &serde_json::Value,
    ) -> Result<(), HandlerError> {
        let mut status = self.load_or_create(user_id).await?;
        status.execution_status = ExecutionStatus::Stopped;
        if let Some(stopped_at) = payload_timestamp(payload, "stopped_at") {
            status.last_execution_at = Some(stopped_at);
        }
        self.store.save(&status).await?;
        tracing::info!(%user_id, "bot status set to stopped");
        Ok(())
    }

    async fn mark_failed(
        &self,
        user_id: Uuid,
        payload: &serde_json::Value,
    ) -> Result<(), HandlerError> {
        let mut status = self.load_or_create(user_id).await?;
        status.execution_status = ExecutionStatus::Failed;
        self.store.save(&status).await?;
        let error = payload_str(payload, "error").unwrap_or("unknown error");
        tracing::error!(%user_id, error, "bot reported an error");
        Ok(())
    }

    /// Persists the trade, bumps the counters, and fans out the derived
    /// `trade.executed` stream event.
    async fn record_trade(
        &self,
        user_id: Uuid,
        payload: &serde_json::Value,
    ) -> Result<(), HandlerError> {
        let executed_at = payload_timestamp(payload, "executed_at").unwrap_or_else(Utc::now);
        let side = match payload_str(payload, "side") {
            None => TradeSide::Buy,
            Some(raw) => TradeSide::parse(raw)
                .ok_or_else(|| HandlerError::permanent(format!("invalid trade side: {raw}")))?,
        };
        let exchange_trade_id = payload_str(payload, "trade_id")
            .filter(|id| !id.is_empty())
            .map(ToString::to_string);
        let trade = NewTrade {
            user_id,
            exchange_trade_id: exchange_trade_id.clone(),
            pair: payload_str(payload, "pair").unwrap_or_default().to_string(),
            side,
            amount: payload_f64(payload, "amount"),
            price: payload_f64(payload, "price"),
            executed_at,
        };

        let trade_id = match self.store.insert_trade(&trade).await? {
            TradeInsert::Inserted(id) => id,
            TradeInsert::Duplicate(id) => {
                // At-least-once redelivery: the row and the counter bump
                // already happened, so this delivery is a no-op.
                tracing::warn!(%user_id, trade_id = %id, "duplicate trade event ignored");
                return Ok(());
            }
        };

        let mut status = self.load_or_create(user_id).await?;
        status.last_trade_count = status.last_trade_count.saturating_add(1);
        status.last_execution_at = Some(executed_at);
        self.store.save(&status).await?;
        tracing::info!(%user_id, trade_id = %trade_id, "created trade record");

        let mut data = serde_json::Map::new();
        data.insert("user_id".to_string(), serde_json::json!(user_id));
        data.insert(
            "trade_id".to_string(),
            serde_json::json!(
                exchange_trade_id.unwrap_or_else(|| trade_id.to_string())
            ),
        );
        data.insert("pair".to_string(), serde_json::json!(trade.pair));
        data.insert("side".to_string(), serde_json::json!(trade.side.as_str()));
        data.insert("amount".to_string(), serde_json::json!(trade.amount));
        data.insert("price".to_string(), serde_json::json!(trade.price));
        data.insert(
            "executed_at".to_string(),
            serde_json::json!(executed_at.to_rfc3339()),
        );
        data.insert("source".to_string(), serde_json::json!("bot"));
        if !self.router.publish_event(EventType::TradeExecuted, data).await {
            // The durable fact is the row; the stream event is
            // observability and must not fail the handler.
            tracing::error!(%user_id, trade_id = %trade_id, "failed to publish trade.executed event");
        }
        Ok(())
    }

    async fn load_or_create(&self, user_id: Uuid) -> Result<BotStatus, HandlerError> {
        if let Some(status) = self.store.find(user_id).await? {
            return Ok(status);
        }
        let status = BotStatus::new(user_id);
        self.store.create(&status).await?;
        Ok(status)
    }
}

#[async_trait]
impl EventHandler for BotStatusService {
    async fn handle(
        &self,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> Result<(), HandlerError> {
        self.apply(event_type, payload).await
    }
}

fn parse_user_id(payload: &serde_json::Value) -> Result<Uuid, HandlerError> {
    payload_str(payload, "user_id")
        .and_then(|raw| Uuid::parse_str(raw).ok())
        .ok_or_else(|| HandlerError::permanent("missing or invalid user_id"))
}

fn payload_str<'a>(payload: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    payload.get(key).and_then(serde_json::Value::as_str)
}

fn payload_f64(payload: &serde_json::Value, key: &str) -> f64 {
    payload.get(key).and_then(serde_json::Value::as_f64).unwrap_or(0.0)
}

/// Parses an RFC 3339 timestamp field, `None` when absent or invalid.
fn payload_timestamp(payload: &serde_json::Value, key: &str) -> Option<DateTime<Utc>> {
    payload_str(payload, key)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|parsed| parsed.with_timezone(&Utc))
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::consumer::{QueueConsumer, QueueSubscription, StreamConsumer, SubscriptionSpec};
    use crate::domain::TopicMap;
    use crate::storage::MemoryStore;
    use crate::transport::{
        MemoryQueueBroker, MemoryStreamBroker, QueueBroker, QueueClient, StreamBroker,
        StreamProducer, StreamSubscription,
    };
    use std::time::Duration;

    struct Fixture {
        stream: Arc<MemoryStreamBroker>,
        queue: Arc<MemoryQueueBroker>,
        client: Arc<QueueClient>,
        store: Arc<MemoryStore>,
        service: Arc<BotStatusService>,
    }

    fn fixture() -> Fixture {
        let stream = Arc::new(MemoryStreamBroker::new());
        let queue = Arc::new(MemoryQueueBroker::new());
        let producer =
            StreamProducer::new(Arc::clone(&stream) as Arc<dyn StreamBroker>, 64);
        let client = Arc::new(QueueClient::new(
            Arc::clone(&queue) as Arc<dyn QueueBroker>,
            Duration::from_secs(5),
        ));
        let router = Arc::new(EventRouter::new(
            producer,
            Arc::clone(&client),
            TopicMap::default(),
            true,
            true,
        ));
        let store = Arc::new(MemoryStore::new());
        let service = Arc::new(BotStatusService::new(
            Arc::clone(&store) as Arc<dyn StatusStore>,
            router,
        ));
        Fixture {
            stream,
            queue,
            client,
            store,
            service,
        }
    }

    fn trade_payload(user_id: Uuid) -> serde_json::Value {
        serde_json::json!({
            "event_type": "bot.trade.executed",
            "user_id": user_id,
            "trade_id": "t1",
            "pair": "BTC/USD",
            "side": "buy",
            "amount": 0.5,
            "price": 50_000.0,
            "executed_at": "2024-01-01T00:00:00Z",
        })
    }

    #[tokio::test]
    async fn bot_started_upserts_a_running_row() {
        let fx = fixture();
        let user_id = Uuid::new_v4();
        let payload = serde_json::json!({
            "user_id": user_id,
            "started_at": "2024-01-01T12:00:00Z",
        });

        let result = fx.service.apply("bot.started", &payload).await;
        assert!(result.is_ok());

        let Some(status) = fx.store.status(user_id).await else {
            panic!("status row missing");
        };
        assert_eq!(status.execution_status, ExecutionStatus::Running);
        assert_eq!(
            status.last_execution_at.map(|t| t.to_rfc3339()),
            Some("2024-01-01T12:00:00+00:00".to_string())
        );
    }

    #[tokio::test]
    async fn bot_error_marks_the_row_failed() {
        let fx = fixture();
        let user_id = Uuid::new_v4();

        let started = fx
            .service
            .apply("bot.started", &serde_json::json!({"user_id": user_id}))
            .await;
        assert!(started.is_ok());
        let errored = fx
            .service
            .apply(
                "bot.error",
                &serde_json::json!({"user_id": user_id, "error": "api down"}),
            )
            .await;
        assert!(errored.is_ok());

        let Some(status) = fx.store.status(user_id).await else {
            panic!("status row missing");
        };
        assert_eq!(status.execution_status, ExecutionStatus::Failed);
    }

    #[tokio::test]
    async fn missing_user_id_is_a_permanent_failure() {
        let fx = fixture();
        let result = fx
            .service
            .apply("bot.started", &serde_json::json!({"started_at": "x"}))
            .await;
        let Err(err) = result else {
            panic!("expected a handler error");
        };
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn trade_executed_creates_the_row_and_fans_out() {
        let fx = fixture();
        let user_id = Uuid::new_v4();

        let result = fx.service.apply("bot.trade.executed", &trade_payload(user_id)).await;
        assert!(result.is_ok());

        let trades = fx.store.trades_for(user_id).await;
        assert_eq!(trades.len(), 1);
        assert_eq!(
            trades.first().and_then(|t| t.exchange_trade_id.as_deref()),
            Some("t1")
        );
        let Some(status) = fx.store.status(user_id).await else {
            panic!("status row missing");
        };
        assert_eq!(status.last_trade_count, 1);

        // The derived fact is on the trading topic with a matching
        // trade_id.
        let Ok(mut sub) = fx.stream.subscribe("trading.events", "assert").await else {
            panic!("subscribe failed");
        };
        let Ok(Some(record)) = sub.poll(Duration::from_secs(5)).await else {
            panic!("no fan-out record");
        };
        let Ok(value) = serde_json::from_slice::<serde_json::Value>(&record.payload) else {
            panic!("fan-out record is not JSON");
        };
        assert_eq!(
            value.get("event_type").and_then(serde_json::Value::as_str),
            Some("trade.executed")
        );
        assert_eq!(
            value.get("trade_id").and_then(serde_json::Value::as_str),
            Some("t1")
        );
        assert_eq!(
            value.get("source").and_then(serde_json::Value::as_str),
            Some("bot")
        );
    }

    #[tokio::test]
    async fn redelivered_trade_is_deduplicated() {
        let fx = fixture();
        let user_id = Uuid::new_v4();

        let first = fx.service.apply("bot.trade.executed", &trade_payload(user_id)).await;
        let second = fx.service.apply("bot.trade.executed", &trade_payload(user_id)).await;
        assert!(first.is_ok());
        assert!(second.is_ok());

        assert_eq!(fx.store.trades_for(user_id).await.len(), 1);
        let Some(status) = fx.store.status(user_id).await else {
            panic!("status row missing");
        };
        assert_eq!(status.last_trade_count, 1);
        // Only the first delivery fans out.
        assert_eq!(fx.stream.topic_len("trading.events").await, 1);
    }

    #[tokio::test]
    async fn queue_delivered_trade_event_end_to_end() {
        let fx = fixture();
        let user_id = Uuid::new_v4();

        let Ok(bytes) = serde_json::to_vec(&trade_payload(user_id)) else {
            panic!("payload serialization failed");
        };
        let published = fx.client.publish("bot.trade.executed", &bytes).await;
        assert!(published.is_ok());

        let mut consumer = QueueConsumer::new(Arc::clone(&fx.client));
        consumer.start(vec![QueueSubscription {
            queue: "bot.trade.executed".to_string(),
            handler: Arc::clone(&fx.service) as Arc<dyn EventHandler>,
        }]);

        for _ in 0..200 {
            if !fx.store.trades_for(user_id).await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        consumer.stop().await;

        assert_eq!(fx.store.trades_for(user_id).await.len(), 1);
        let Some(status) = fx.store.status(user_id).await else {
            panic!("status row missing");
        };
        assert_eq!(status.last_trade_count, 1);
        assert_eq!(fx.stream.topic_len("trading.events").await, 1);
        assert_eq!(fx.queue.ready_len("bot.trade.executed").await, 0);
    }

    #[tokio::test]
    async fn user_created_stream_event_initializes_idle_status_once() {
        let fx = fixture();
        let user_id = Uuid::new_v4();
        let payload = serde_json::json!({
            "event_type": "user.created",
            "user_id": user_id,
            "email": "trader@example.com",
        });

        let Ok(bytes) = serde_json::to_vec(&payload) else {
            panic!("payload serialization failed");
        };
        let _ = fx.stream.append("user.events", &bytes).await;
        let _ = fx.stream.append("user.events", &bytes).await;

        let mut consumer =
            StreamConsumer::new(Arc::clone(&fx.stream) as Arc<dyn StreamBroker>);
        consumer.start(vec![SubscriptionSpec {
            topic: "user.events".to_string(),
            group: "kraken-service".to_string(),
            event_type_filter: Some("user.created".to_string()),
            handler: Arc::clone(&fx.service) as Arc<dyn EventHandler>,
        }]);

        for _ in 0..200 {
            if fx.store.status(user_id).await.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        consumer.stop().await;

        let Some(status) = fx.store.status(user_id).await else {
            panic!("status row missing");
        };
        assert_eq!(status.execution_status, ExecutionStatus::Idle);
        assert_eq!(status.last_trade_count, 0);
    }
}
