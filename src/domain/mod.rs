//! Domain layer: event vocabulary, wire envelope, and mutable records.
//!
//! This module contains the closed event-type enum with its transport
//! binding, the flat JSON wire envelope shared by both transports, and
//! the bot-status/trade records the state-mutation handlers operate on.

pub mod bot;
pub mod envelope;
pub mod event_type;

pub use bot::{BotStatus, ExecutionStatus, NewTrade, Trade, TradeSide};
pub use envelope::EventEnvelope;
pub use event_type::{EventType, TopicCategory, TopicMap, Transport};
