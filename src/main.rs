//! muckard-events service entry point.
//!
//! Wires the transports, router, store, and consumers, then runs until
//! interrupted. Unreachable collaborators degrade to logged warnings,
//! never a startup crash.

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

use muckard_events::config::MessagingConfig;
use muckard_events::consumer::{
    EventHandler, QueueConsumer, QueueSubscription, StreamConsumer, SubscriptionSpec,
};
use muckard_events::router::EventRouter;
use muckard_events::service::BotStatusService;
use muckard_events::storage::{MemoryStore, PostgresStore, StatusStore};
use muckard_events::transport::{
    MemoryQueueBroker, MemoryStreamBroker, QueueBroker, QueueClient, StreamBroker, StreamProducer,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = MessagingConfig::from_env();
    tracing::info!(
        stream_enabled = config.stream_enabled,
        queue_enabled = config.queue_enabled,
        "starting muckard-events"
    );

    // Build transports
    let stream_broker: Arc<dyn StreamBroker> = Arc::new(MemoryStreamBroker::new());
    let queue_broker: Arc<dyn QueueBroker> = Arc::new(MemoryQueueBroker::new());
    let producer = StreamProducer::new(Arc::clone(&stream_broker), config.producer_buffer);
    let queue_client = Arc::new(QueueClient::new(
        queue_broker,
        Duration::from_secs(config.queue_connect_timeout_secs),
    ));

    // Build storage and router
    let store = build_store(&config).await;
    let router = Arc::new(EventRouter::new(
        producer,
        Arc::clone(&queue_client),
        config.topics(),
        config.stream_enabled,
        config.queue_enabled,
    ));

    // Build service layer
    let service = Arc::new(BotStatusService::new(store, Arc::clone(&router)));
    let handler: Arc<dyn EventHandler> = service;

    // Stream subscriptions: user lifecycle and bot trade facts
    let mut stream_consumer = StreamConsumer::new(stream_broker);
    stream_consumer.start(vec![
        SubscriptionSpec {
            topic: config.user_events_topic.clone(),
            group: config.consumer_group.clone(),
            event_type_filter: Some("user.created".to_string()),
            handler: Arc::clone(&handler),
        },
        SubscriptionSpec {
            topic: config.trading_events_topic.clone(),
            group: config.consumer_group.clone(),
            event_type_filter: Some("bot.trade.executed".to_string()),
            handler: Arc::clone(&handler),
        },
        SubscriptionSpec {
            topic: config.trading_events_topic.clone(),
            group: config.consumer_group.clone(),
            event_type_filter: Some("bot.trade.skipped".to_string()),
            handler: Arc::clone(&handler),
        },
    ]);

    // Queue subscriptions: bot status results
    let mut queue_consumer = QueueConsumer::new(Arc::clone(&queue_client));
    queue_consumer.start(
        ["bot.started", "bot.stopped", "bot.error"]
            .into_iter()
            .map(|queue| QueueSubscription {
                queue: queue.to_string(),
                handler: Arc::clone(&handler),
            })
            .collect(),
    );

    tracing::info!("muckard-events service started");

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");

    // Stop consumers, then drain and close the transports
    stream_consumer.stop().await;
    queue_consumer.stop().await;
    let unflushed = router
        .flush(Duration::from_secs(config.flush_timeout_secs))
        .await;
    if unflushed > 0 {
        tracing::warn!(unflushed, "stream messages lost at shutdown");
    }
    queue_client.close().await;

    Ok(())
}

/// Connects the PostgreSQL store, downgrading an unreachable database to
/// a logged warning and the in-memory store.
async fn build_store(config: &MessagingConfig) -> Arc<dyn StatusStore> {
    if let Some(url) = &config.database_url {
        let connect = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .acquire_timeout(Duration::from_secs(config.database_connect_timeout_secs))
            .connect(url)
            .await;
        match connect {
            Ok(pool) => {
                tracing::info!("connected to postgres");
                return Arc::new(PostgresStore::new(pool));
            }
            Err(e) => {
                tracing::warn!(error = %e, "database unavailable, falling back to in-memory store");
            }
        }
    } else {
        tracing::info!("no DATABASE_URL configured, using in-memory store");
    }
    Arc::new(MemoryStore::new())
}
