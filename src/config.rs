//! Messaging configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`), with a working default for every
//! key so the service starts in any environment.

use crate::domain::TopicMap;

/// Top-level messaging configuration.
///
/// Loaded once at startup via [`MessagingConfig::from_env`].
#[derive(Debug, Clone)]
pub struct MessagingConfig {
    /// Master switch for the stream transport.
    pub stream_enabled: bool,

    /// Master switch for the queue transport.
    pub queue_enabled: bool,

    /// Timeout in seconds for establishing the queue connection.
    pub queue_connect_timeout_secs: u64,

    /// Capacity of the stream producer's outbound buffer.
    pub producer_buffer: usize,

    /// Seconds to spend draining the producer on shutdown.
    pub flush_timeout_secs: u64,

    /// Consumer group for all stream subscriptions in this service.
    pub consumer_group: String,

    /// Topic for user lifecycle events.
    pub user_events_topic: String,

    /// Topic for onboarding funnel events.
    pub onboarding_events_topic: String,

    /// Topic for exchange API key events.
    pub kraken_events_topic: String,

    /// Topic for bot trading activity events.
    pub trading_events_topic: String,

    /// Fallback topic for unknown event types.
    pub default_stream_topic: String,

    /// PostgreSQL connection string; absent means in-memory storage.
    pub database_url: Option<String>,

    /// Maximum number of database connections in the pool.
    pub database_max_connections: u32,

    /// Timeout in seconds for acquiring a database connection.
    pub database_connect_timeout_secs: u64,
}

impl MessagingConfig {
    /// Loads configuration from environment variables.
    ///
    /// Falls back to sensible defaults when a variable is not set.
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    #[must_use]
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            stream_enabled: parse_env_bool("STREAM_ENABLED", true),
            queue_enabled: parse_env_bool("QUEUE_ENABLED", true),
            queue_connect_timeout_secs: parse_env("QUEUE_CONNECT_TIMEOUT_SECS", 5),
            producer_buffer: parse_env("STREAM_PRODUCER_BUFFER", 1024),
            flush_timeout_secs: parse_env("STREAM_FLUSH_TIMEOUT_SECS", 10),
            consumer_group: parse_env_string("CONSUMER_GROUP", "kraken-service"),
            user_events_topic: parse_env_string("USER_EVENTS_TOPIC", "user.events"),
            onboarding_events_topic: parse_env_string(
                "ONBOARDING_EVENTS_TOPIC",
                "onboarding.events",
            ),
            kraken_events_topic: parse_env_string("KRAKEN_EVENTS_TOPIC", "kraken.events"),
            trading_events_topic: parse_env_string("TRADING_EVENTS_TOPIC", "trading.events"),
            default_stream_topic: parse_env_string("DEFAULT_STREAM_TOPIC", "default"),
            database_url: std::env::var("DATABASE_URL").ok(),
            database_max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 10),
            database_connect_timeout_secs: parse_env("DATABASE_CONNECT_TIMEOUT_SECS", 5),
        }
    }

    /// Builds the topic map from the configured topic names.
    #[must_use]
    pub fn topics(&self) -> TopicMap {
        TopicMap {
            user: self.user_events_topic.clone(),
            onboarding: self.onboarding_events_topic.clone(),
            kraken: self.kraken_events_topic.clone(),
            trading: self.trading_events_topic.clone(),
            default: self.default_stream_topic.clone(),
        }
    }
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Returns an environment variable, or `default` when unset.
fn parse_env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parses an environment variable as a boolean. Accepts `"true"`, `"1"`,
/// `"false"`, `"0"` (case-insensitive). Returns `default` otherwise.
fn parse_env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key).ok().as_deref() {
        Some("true") | Some("TRUE") | Some("1") => true,
        Some("false") | Some("FALSE") | Some("0") => false,
        _ => default,
    }
}
