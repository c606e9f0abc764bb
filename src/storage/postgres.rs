//! PostgreSQL implementation of the status store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{StatusStore, TradeInsert};
use crate::domain::{BotStatus, ExecutionStatus, NewTrade};
use crate::error::EventError;

/// PostgreSQL-backed status store using `sqlx::PgPool`.
///
/// Assumes the platform schema: `bot_status` with a unique `user_id` and
/// `trades` with a unique (nullable) `exchange_trade_id`.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a store over the given connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

type BotStatusRow = (
    Uuid,
    Uuid,
    String,
    Option<DateTime<Utc>>,
    i32,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
);

fn row_into_status(row: BotStatusRow) -> Result<BotStatus, EventError> {
    let (id, user_id, execution_status, last_execution_at, last_trade_count, created_at, updated_at) =
        row;
    let execution_status = ExecutionStatus::parse(&execution_status).ok_or_else(|| {
        EventError::Storage(format!("unknown execution status: {execution_status}"))
    })?;
    Ok(BotStatus {
        id,
        user_id,
        execution_status,
        last_execution_at,
        last_trade_count,
        created_at,
        updated_at,
    })
}

#[async_trait]
impl StatusStore for PostgresStore {
    async fn find(&self, user_id: Uuid) -> Result<Option<BotStatus>, EventError> {
        let row = sqlx::query_as::<_, BotStatusRow>(
            "SELECT id, user_id, execution_status, last_execution_at, last_trade_count, \
             created_at, updated_at FROM bot_status WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| EventError::Storage(e.to_string()))?;

        row.map(row_into_status).transpose()
    }

    async fn create(&self, status: &BotStatus) -> Result<(), EventError> {
        sqlx::query(
            "INSERT INTO bot_status (id, user_id, execution_status, last_execution_at, \
             last_trade_count, created_at) VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(status.id)
        .bind(status.user_id)
        .bind(status.execution_status.as_str())
        .bind(status.last_execution_at)
        .bind(status.last_trade_count)
        .bind(status.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| EventError::Storage(e.to_string()))?;

        Ok(())
    }

    async fn save(&self, status: &BotStatus) -> Result<(), EventError> {
        sqlx::query(
            "UPDATE bot_status SET execution_status = $2, last_execution_at = $3, \
             last_trade_count = $4, updated_at = $5 WHERE user_id = $1",
        )
        .bind(status.user_id)
        .bind(status.execution_status.as_str())
        .bind(status.last_execution_at)
        .bind(status.last_trade_count)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| EventError::Storage(e.to_string()))?;

        Ok(())
    }

    async fn insert_trade(&self, trade: &NewTrade) -> Result<TradeInsert, EventError> {
        let inserted = sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO trades (id, user_id, exchange_trade_id, pair, side, amount, price, \
             executed_at, status) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'executed') \
             ON CONFLICT (exchange_trade_id) DO NOTHING RETURNING id",
        )
        .bind(Uuid::new_v4())
        .bind(trade.user_id)
        .bind(trade.exchange_trade_id.as_deref())
        .bind(&trade.pair)
        .bind(trade.side.as_str())
        .bind(trade.amount)
        .bind(trade.price)
        .bind(trade.executed_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| EventError::Storage(e.to_string()))?;

        if let Some(id) = inserted {
            return Ok(TradeInsert::Inserted(id));
        }

        // The insert conflicted, so a row with this exchange trade ID
        // already exists (NULL ids never conflict).
        let Some(exchange_id) = trade.exchange_trade_id.as_deref() else {
            return Err(EventError::Storage(
                "trade insert returned no row".to_string(),
            ));
        };
        let existing = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM trades WHERE exchange_trade_id = $1",
        )
        .bind(exchange_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| EventError::Storage(e.to_string()))?;

        Ok(TradeInsert::Duplicate(existing))
    }
}
