//! Event vocabulary and the event-type → transport binding.
//!
//! [`EventType`] is a closed enum over every event the platform emits.
//! The transport binding is a total `match`, so a typed publish can never
//! hit an unmapped event type; only the raw-string boundary keeps the
//! fail-open "default to stream" behavior, for interop with
//! out-of-process producers.

use std::fmt;
use std::str::FromStr;

use crate::error::EventError;

/// Which transport carries an event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    /// Log-structured transport: durable, partitioned, replayable, with
    /// consumer groups resuming from committed offsets.
    Stream,
    /// Point-to-point transport: acknowledged, requeue-on-nack, no replay.
    Queue,
}

/// Coarse stream-topic category. Concrete topic names are
/// configuration-driven and resolved through [`TopicMap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicCategory {
    /// User lifecycle events.
    User,
    /// Onboarding funnel events.
    Onboarding,
    /// Exchange API key lifecycle events.
    Kraken,
    /// Bot trading activity events.
    Trading,
}

/// Every event type the platform emits.
///
/// Stream-bound types are durable facts (audit, analytics); queue-bound
/// types are imperative commands and real-time status updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// A user account was created.
    UserCreated,
    /// A user account was updated.
    UserUpdated,
    /// A user logged in.
    UserLoggedIn,
    /// A user completed onboarding.
    OnboardingCompleted,
    /// An exchange API key was connected.
    KrakenKeyConnected,
    /// An exchange API key was disconnected.
    KrakenKeyDisconnected,
    /// An exchange API key was updated.
    KrakenKeyUpdated,
    /// The bot executed a trade.
    BotTradeExecuted,
    /// The bot evaluated and skipped a trade.
    BotTradeSkipped,
    /// A trade record was persisted (derived fact, fanned out from
    /// [`EventType::BotTradeExecuted`]).
    TradeExecuted,
    /// Command: start the bot.
    BotStart,
    /// Command: stop the bot.
    BotStop,
    /// Command: trigger a trade evaluation now.
    BotTriggerTrade,
    /// Status: the bot started running.
    BotStarted,
    /// Status: the bot stopped.
    BotStopped,
    /// Status: the bot hit an error.
    BotError,
    /// An exchange API key failed its connectivity test.
    KrakenKeyTestFailed,
}

impl EventType {
    /// All known event types, in binding-table order.
    pub const ALL: [Self; 17] = [
        Self::UserCreated,
        Self::UserUpdated,
        Self::UserLoggedIn,
        Self::OnboardingCompleted,
        Self::KrakenKeyConnected,
        Self::KrakenKeyDisconnected,
        Self::KrakenKeyUpdated,
        Self::BotTradeExecuted,
        Self::BotTradeSkipped,
        Self::TradeExecuted,
        Self::BotStart,
        Self::BotStop,
        Self::BotTriggerTrade,
        Self::BotStarted,
        Self::BotStopped,
        Self::BotError,
        Self::KrakenKeyTestFailed,
    ];

    /// Returns the wire name of this event type.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::UserCreated => "user.created",
            Self::UserUpdated => "user.updated",
            Self::UserLoggedIn => "user.logged_in",
            Self::OnboardingCompleted => "onboarding.completed",
            Self::KrakenKeyConnected => "kraken.key.connected",
            Self::KrakenKeyDisconnected => "kraken.key.disconnected",
            Self::KrakenKeyUpdated => "kraken.key.updated",
            Self::BotTradeExecuted => "bot.trade.executed",
            Self::BotTradeSkipped => "bot.trade.skipped",
            Self::TradeExecuted => "trade.executed",
            Self::BotStart => "bot.start",
            Self::BotStop => "bot.stop",
            Self::BotTriggerTrade => "bot.trigger_trade",
            Self::BotStarted => "bot.started",
            Self::BotStopped => "bot.stopped",
            Self::BotError => "bot.error",
            Self::KrakenKeyTestFailed => "kraken.key.test.failed",
        }
    }

    /// Returns the transport this event type is bound to.
    ///
    /// The match is total: every event type has exactly one binding, and
    /// adding a variant without a binding is a compile error.
    #[must_use]
    pub const fn transport(&self) -> Transport {
        match self {
            Self::UserCreated
            | Self::UserUpdated
            | Self::UserLoggedIn
            | Self::OnboardingCompleted
            | Self::KrakenKeyConnected
            | Self::KrakenKeyDisconnected
            | Self::KrakenKeyUpdated
            | Self::BotTradeExecuted
            | Self::BotTradeSkipped
            | Self::TradeExecuted => Transport::Stream,
            Self::BotStart
            | Self::BotStop
            | Self::BotTriggerTrade
            | Self::BotStarted
            | Self::BotStopped
            | Self::BotError
            | Self::KrakenKeyTestFailed => Transport::Queue,
        }
    }

    /// Returns the stream-topic category for stream-bound event types,
    /// `None` for queue-bound types (their routing key is the queue name).
    #[must_use]
    pub const fn category(&self) -> Option<TopicCategory> {
        match self {
            Self::UserCreated | Self::UserUpdated | Self::UserLoggedIn => {
                Some(TopicCategory::User)
            }
            Self::OnboardingCompleted => Some(TopicCategory::Onboarding),
            Self::KrakenKeyConnected | Self::KrakenKeyDisconnected | Self::KrakenKeyUpdated => {
                Some(TopicCategory::Kraken)
            }
            Self::BotTradeExecuted | Self::BotTradeSkipped | Self::TradeExecuted => {
                Some(TopicCategory::Trading)
            }
            Self::BotStart
            | Self::BotStop
            | Self::BotTriggerTrade
            | Self::BotStarted
            | Self::BotStopped
            | Self::BotError
            | Self::KrakenKeyTestFailed => None,
        }
    }

    /// Returns the queue name for queue-bound event types (the routing
    /// key equals the event type's wire name), `None` for stream-bound.
    #[must_use]
    pub const fn queue_name(&self) -> Option<&'static str> {
        match self.transport() {
            Transport::Queue => Some(self.as_str()),
            Transport::Stream => None,
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|event| event.as_str() == s)
            .ok_or_else(|| EventError::UnknownEventType(s.to_string()))
    }
}

/// Resolves stream-topic categories to configured topic names.
///
/// Topic names are configuration-driven (one topic per coarse category);
/// the `default` topic carries fail-open publishes of unknown raw event
/// type strings.
#[derive(Debug, Clone)]
pub struct TopicMap {
    /// Topic for user lifecycle events.
    pub user: String,
    /// Topic for onboarding funnel events.
    pub onboarding: String,
    /// Topic for exchange API key events.
    pub kraken: String,
    /// Topic for bot trading activity events.
    pub trading: String,
    /// Fallback topic for unknown event types.
    pub default: String,
}

impl TopicMap {
    /// Returns the configured topic for a category.
    #[must_use]
    pub fn topic_for(&self, category: TopicCategory) -> &str {
        match category {
            TopicCategory::User => &self.user,
            TopicCategory::Onboarding => &self.onboarding,
            TopicCategory::Kraken => &self.kraken,
            TopicCategory::Trading => &self.trading,
        }
    }

    /// Returns the topic carrying a stream-bound event type, falling
    /// back to the default topic.
    #[must_use]
    pub fn stream_topic(&self, event: EventType) -> &str {
        match event.category() {
            Some(category) => self.topic_for(category),
            None => &self.default,
        }
    }
}

impl Default for TopicMap {
    fn default() -> Self {
        Self {
            user: "user.events".to_string(),
            onboarding: "onboarding.events".to_string(),
            kraken: "kraken.events".to_string(),
            trading: "trading.events".to_string(),
            default: "default".to_string(),
        }
    }
}
