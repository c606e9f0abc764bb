//! Bot status and trade records mutated by the event handlers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Bot execution state for one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Never started or explicitly reset.
    Idle,
    /// Actively trading.
    Running,
    /// Stopped by command.
    Stopped,
    /// Stopped on error.
    Failed,
}

impl ExecutionStatus {
    /// Returns the storage string for this status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }

    /// Parses a storage string, `None` for unknown values.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(Self::Idle),
            "running" => Some(Self::Running),
            "stopped" => Some(Self::Stopped),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeSide {
    /// Buy the base asset.
    Buy,
    /// Sell the base asset.
    Sell,
}

impl TradeSide {
    /// Returns the storage string for this side.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }

    /// Parses a storage string, `None` for unknown values.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "buy" => Some(Self::Buy),
            "sell" => Some(Self::Sell),
            _ => None,
        }
    }
}

/// Per-user bot status row; created lazily on first reference.
///
/// `last_trade_count` is monotonically non-decreasing absent a manual
/// reset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotStatus {
    /// Row ID.
    pub id: Uuid,
    /// Owning user; one row per user.
    pub user_id: Uuid,
    /// Current execution state.
    pub execution_status: ExecutionStatus,
    /// When the bot last ran (started, stopped, or traded).
    pub last_execution_at: Option<DateTime<Utc>>,
    /// Number of trades executed since creation.
    pub last_trade_count: i32,
    /// Row creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: Option<DateTime<Utc>>,
}

impl BotStatus {
    /// Creates the default row for a user: idle, no executions.
    #[must_use]
    pub fn new(user_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            execution_status: ExecutionStatus::Idle,
            last_execution_at: None,
            last_trade_count: 0,
            created_at: Utc::now(),
            updated_at: None,
        }
    }
}

/// A persisted trade row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    /// Row ID.
    pub id: Uuid,
    /// Owning user.
    pub user_id: Uuid,
    /// Upstream exchange trade ID; idempotency key when present.
    pub exchange_trade_id: Option<String>,
    /// Trading pair (e.g. `"BTC/USD"`).
    pub pair: String,
    /// Trade direction.
    pub side: TradeSide,
    /// Base amount traded.
    pub amount: f64,
    /// Execution price.
    pub price: f64,
    /// When the exchange executed the trade.
    pub executed_at: DateTime<Utc>,
    /// Trade status string (`"executed"` for event-sourced rows).
    pub status: String,
    /// Row creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Fields for a trade row about to be inserted.
#[derive(Debug, Clone)]
pub struct NewTrade {
    /// Owning user.
    pub user_id: Uuid,
    /// Upstream exchange trade ID; idempotency key when present.
    pub exchange_trade_id: Option<String>,
    /// Trading pair.
    pub pair: String,
    /// Trade direction.
    pub side: TradeSide,
    /// Base amount traded.
    pub amount: f64,
    /// Execution price.
    pub price: f64,
    /// When the exchange executed the trade.
    pub executed_at: DateTime<Utc>,
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn new_status_is_idle_with_zero_trades() {
        let status = BotStatus::new(Uuid::new_v4());
        assert_eq!(status.execution_status, ExecutionStatus::Idle);
        assert_eq!(status.last_trade_count, 0);
        assert!(status.last_execution_at.is_none());
    }

    #[test]
    fn execution_status_round_trips() {
        for status in [
            ExecutionStatus::Idle,
            ExecutionStatus::Running,
            ExecutionStatus::Stopped,
            ExecutionStatus::Failed,
        ] {
            assert_eq!(ExecutionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ExecutionStatus::parse("completed"), None);
    }

    #[test]
    fn trade_side_round_trips() {
        assert_eq!(TradeSide::parse("buy"), Some(TradeSide::Buy));
        assert_eq!(TradeSide::parse("sell"), Some(TradeSide::Sell));
        assert_eq!(TradeSide::parse("hold"), None);
    }
}
