//! Storage layer: durable bot-status and trade records.
//!
//! Provides the [`StatusStore`] trait consumed by the state-mutation
//! handlers. The concrete implementations are [`postgres::PostgresStore`]
//! (`sqlx::PgPool`) and [`memory::MemoryStore`] for tests and
//! database-less environments.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::{BotStatus, NewTrade};
use crate::error::EventError;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

/// Outcome of a trade insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeInsert {
    /// A new row was created with this ID.
    Inserted(Uuid),
    /// A row with the same exchange trade ID already exists; nothing was
    /// written.
    Duplicate(Uuid),
}

/// Durable store for bot-status rows and trade records.
///
/// Handlers read-modify-write within a single logical operation; there
/// is no cross-event transaction, and no locking across service
/// replicas.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Returns the bot-status row for a user, if one exists.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Storage`] on store failure.
    async fn find(&self, user_id: Uuid) -> Result<Option<BotStatus>, EventError>;

    /// Inserts a new bot-status row.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Storage`] on store failure.
    async fn create(&self, status: &BotStatus) -> Result<(), EventError>;

    /// Updates an existing bot-status row by `user_id`.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Storage`] on store failure.
    async fn save(&self, status: &BotStatus) -> Result<(), EventError>;

    /// Inserts a trade row, deduplicating on `exchange_trade_id` when
    /// one is present.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Storage`] on store failure.
    async fn insert_trade(&self, trade: &NewTrade) -> Result<TradeInsert, EventError>;
}
