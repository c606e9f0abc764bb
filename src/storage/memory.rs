//! In-memory implementation of the status store.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{StatusStore, TradeInsert};
use crate::domain::{BotStatus, NewTrade, Trade};
use crate::error::EventError;

#[derive(Debug, Default)]
struct MemoryState {
    statuses: HashMap<Uuid, BotStatus>,
    trades: Vec<Trade>,
    by_exchange_id: HashMap<String, Uuid>,
}

/// `RwLock`-protected in-memory store, used by the test suite and by the
/// service when no database is configured.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryState>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the status row for a user, for assertions.
    pub async fn status(&self, user_id: Uuid) -> Option<BotStatus> {
        self.inner.read().await.statuses.get(&user_id).cloned()
    }

    /// Returns all trades for a user in insertion order, for assertions.
    pub async fn trades_for(&self, user_id: Uuid) -> Vec<Trade> {
        self.inner
            .read()
            .await
            .trades
            .iter()
            .filter(|trade| trade.user_id == user_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl StatusStore for MemoryStore {
    async fn find(&self, user_id: Uuid) -> Result<Option<BotStatus>, EventError> {
        Ok(self.inner.read().await.statuses.get(&user_id).cloned())
    }

    async fn create(&self, status: &BotStatus) -> Result<(), EventError> {
        self.inner
            .write()
            .await
            .statuses
            .insert(status.user_id, status.clone());
        Ok(())
    }

    async fn save(&self, status: &BotStatus) -> Result<(), EventError> {
        self.inner
            .write()
            .await
            .statuses
            .insert(status.user_id, status.clone());
        Ok(())
    }

    async fn insert_trade(&self, trade: &NewTrade) -> Result<TradeInsert, EventError> {
        let mut state = self.inner.write().await;
        if let Some(exchange_id) = &trade.exchange_trade_id
            && let Some(existing) = state.by_exchange_id.get(exchange_id)
        {
            return Ok(TradeInsert::Duplicate(*existing));
        }
        let row = Trade {
            id: Uuid::new_v4(),
            user_id: trade.user_id,
            exchange_trade_id: trade.exchange_trade_id.clone(),
            pair: trade.pair.clone(),
            side: trade.side,
            amount: trade.amount,
            price: trade.price,
            executed_at: trade.executed_at,
            status: "executed".to_string(),
            created_at: Utc::now(),
        };
        let id = row.id;
        if let Some(exchange_id) = &row.exchange_trade_id {
            state.by_exchange_id.insert(exchange_id.clone(), id);
        }
        state.trades.push(row);
        Ok(TradeInsert::Inserted(id))
    }
}
