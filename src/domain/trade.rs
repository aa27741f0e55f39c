use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Direction;

/// Ledger status of a trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    Open,
    Closing,
    Closed,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Open => "open",
            TradeStatus::Closing => "closing",
            TradeStatus::Closed => "closed",
        }
    }
}

impl TryFrom<&str> for TradeStatus {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "open" => Ok(TradeStatus::Open),
            "closing" => Ok(TradeStatus::Closing),
            "closed" => Ok(TradeStatus::Closed),
            _ => Err(format!("Unknown trade status: {}", s)),
        }
    }
}

/// How a position left the venue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    TpHit,
    SlHit,
    ManualKill,
    Unknown,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::TpHit => "tp_hit",
            ExitReason::SlHit => "sl_hit",
            ExitReason::ManualKill => "manual_kill",
            ExitReason::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<&str> for ExitReason {
    type Error = String;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "tp_hit" => Ok(ExitReason::TpHit),
            "sl_hit" => Ok(ExitReason::SlHit),
            "manual_kill" => Ok(ExitReason::ManualKill),
            "unknown" => Ok(ExitReason::Unknown),
            _ => Err(format!("Unknown exit reason: {}", s)),
        }
    }
}

/// Fields written when the entry pipeline records a new position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTrade {
    pub signal_id: String,
    pub opened_at: DateTime<Utc>,
    pub profile: String,
    pub venue: String,
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: Decimal,
    pub quantity: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub notional: Decimal,
    pub margin: Decimal,
    pub risk_budget: Decimal,
    pub leverage: u32,
    pub est_fee: Decimal,
    pub entry_order_id: String,
    pub sl_order_id: String,
    pub tp_order_id: Option<String>,
}

/// A ledger trade row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: i64,
    pub signal_id: String,
    pub opened_at: DateTime<Utc>,
    pub profile: String,
    pub venue: String,
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: Decimal,
    pub quantity: Decimal,
    pub stop_loss: Decimal,
    /// Stop at entry time; the 1R reference for trailing
    pub initial_stop_loss: Decimal,
    pub take_profit: Decimal,
    pub notional: Decimal,
    pub margin: Decimal,
    pub risk_budget: Decimal,
    pub leverage: u32,
    pub est_fee: Decimal,
    pub entry_order_id: Option<String>,
    pub sl_order_id: Option<String>,
    pub tp_order_id: Option<String>,
    pub status: TradeStatus,
    pub exit_price: Option<Decimal>,
    pub exit_reason: Option<ExitReason>,
    pub gross_pnl: Option<Decimal>,
    pub fees: Option<Decimal>,
    pub net_pnl: Option<Decimal>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl TradeRecord {
    /// Materialise the row the ledger stores for `trade` under `id`.
    pub fn from_new(id: i64, trade: &NewTrade) -> Self {
        Self {
            id,
            signal_id: trade.signal_id.clone(),
            opened_at: trade.opened_at,
            profile: trade.profile.clone(),
            venue: trade.venue.clone(),
            symbol: trade.symbol.clone(),
            direction: trade.direction,
            entry_price: trade.entry_price,
            quantity: trade.quantity,
            stop_loss: trade.stop_loss,
            initial_stop_loss: trade.stop_loss,
            take_profit: trade.take_profit,
            notional: trade.notional,
            margin: trade.margin,
            risk_budget: trade.risk_budget,
            leverage: trade.leverage,
            est_fee: trade.est_fee,
            entry_order_id: Some(trade.entry_order_id.clone()),
            sl_order_id: Some(trade.sl_order_id.clone()),
            tp_order_id: trade.tp_order_id.clone(),
            status: TradeStatus::Open,
            exit_price: None,
            exit_reason: None,
            gross_pnl: None,
            fees: None,
            net_pnl: None,
            closed_at: None,
        }
    }

    /// Apply a partial update in memory, mirroring what the ledger wrote.
    pub fn apply(&mut self, update: &TradeUpdate) {
        if let Some(v) = update.stop_loss {
            self.stop_loss = v;
        }
        if let Some(v) = &update.sl_order_id {
            self.sl_order_id = Some(v.clone());
        }
        if let Some(v) = update.status {
            self.status = v;
        }
        if let Some(v) = update.exit_price {
            self.exit_price = Some(v);
        }
        if let Some(v) = update.exit_reason {
            self.exit_reason = Some(v);
        }
        if let Some(v) = update.gross_pnl {
            self.gross_pnl = Some(v);
        }
        if let Some(v) = update.fees {
            self.fees = Some(v);
        }
        if let Some(v) = update.net_pnl {
            self.net_pnl = Some(v);
        }
        if let Some(v) = update.closed_at {
            self.closed_at = Some(v);
        }
    }
}

/// Partial update of a trade row; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TradeUpdate {
    pub stop_loss: Option<Decimal>,
    pub sl_order_id: Option<String>,
    pub status: Option<TradeStatus>,
    pub exit_price: Option<Decimal>,
    pub exit_reason: Option<ExitReason>,
    pub gross_pnl: Option<Decimal>,
    pub fees: Option<Decimal>,
    pub net_pnl: Option<Decimal>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl TradeUpdate {
    pub fn is_empty(&self) -> bool {
        *self == TradeUpdate::default()
    }

    pub fn moved_stop(stop_loss: Decimal, sl_order_id: impl Into<String>) -> Self {
        Self {
            stop_loss: Some(stop_loss),
            sl_order_id: Some(sl_order_id.into()),
            ..Default::default()
        }
    }

    pub fn closed(
        exit_price: Decimal,
        exit_reason: ExitReason,
        pnl: &PnlBreakdown,
        closed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            status: Some(TradeStatus::Closed),
            exit_price: Some(exit_price),
            exit_reason: Some(exit_reason),
            gross_pnl: Some(pnl.gross),
            fees: Some(pnl.fees),
            net_pnl: Some(pnl.net),
            closed_at: Some(closed_at),
            ..Default::default()
        }
    }
}

/// Realised PnL of a closed position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PnlBreakdown {
    pub gross: Decimal,
    pub fees: Decimal,
    pub net: Decimal,
}

impl PnlBreakdown {
    /// gross = (exit - entry) * qty for longs (inverse for shorts),
    /// fees = exit notional * fee_rate, all rounded to 4 dp.
    pub fn compute(
        direction: Direction,
        entry_price: Decimal,
        exit_price: Decimal,
        quantity: Decimal,
        fee_rate: Decimal,
    ) -> Self {
        let gross = direction.favorable_move(entry_price, exit_price) * quantity;
        let fees = exit_price * quantity * fee_rate;
        let net = gross - fees;
        Self {
            gross: gross.round_dp(4),
            fees: fees.round_dp(4),
            net: net.round_dp(4),
        }
    }
}
