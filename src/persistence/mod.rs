//! Persistence layer: the trade ledger, runtime key/value state and the
//! append-only audit event log.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{NewTrade, TradeRecord, TradeUpdate};
use crate::error::Result;

/// Runtime state key set while an unprotected-exposure halt is active
pub const HALT_STATE_KEY: &str = "halted_reason";

/// Severity of an audit event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventLevel {
    Info,
    Warn,
    Error,
    Critical,
}

impl EventLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventLevel::Info => "INFO",
            EventLevel::Warn => "WARN",
            EventLevel::Error => "ERROR",
            EventLevel::Critical => "CRITICAL",
        }
    }
}

impl std::fmt::Display for EventLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An audit event row, as read back for operators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub event_type: String,
    pub message: String,
    pub context: Option<Value>,
}

/// Durable store of trades and runtime state.
///
/// Each write is one atomic unit. The controller writes here before it
/// updates its in-memory view.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Insert an `open` trade and return its id
    async fn insert_trade(&self, trade: &NewTrade) -> Result<i64>;

    async fn update_trade(&self, id: i64, update: &TradeUpdate) -> Result<()>;

    /// Most recent trade with status `open`
    async fn get_open_trade(&self) -> Result<Option<TradeRecord>>;

    /// Newest first
    async fn get_recent_trades(&self, limit: u32) -> Result<Vec<TradeRecord>>;

    async fn log_event(
        &self,
        level: EventLevel,
        event_type: &str,
        message: &str,
        context: Option<Value>,
    ) -> Result<()>;

    async fn set_state(&self, key: &str, value: &str) -> Result<()>;

    async fn get_state(&self, key: &str) -> Result<Option<String>>;

    async fn clear_state(&self, key: &str) -> Result<()>;
}
