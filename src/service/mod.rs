//! Service layer: business logic behind the consumers.
//!
//! [`BotStatusService`] applies inbound events to the bot-status and
//! trade records and fans out derived events through the
//! [`crate::router::EventRouter`].

pub mod bot_status;

pub use bot_status::BotStatusService;
