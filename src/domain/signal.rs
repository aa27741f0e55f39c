use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Direction;

/// A trade idea produced by a signal source; consumed once per entry attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub signal_id: String,
    pub direction: Direction,
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub rr_ratio: Decimal,
    pub reason: String,
    pub generated_at: DateTime<Utc>,
}

impl Signal {
    pub fn new(
        direction: Direction,
        entry_price: Decimal,
        stop_loss: Decimal,
        take_profit: Decimal,
        reason: impl Into<String>,
        generated_at: DateTime<Utc>,
    ) -> Self {
        let risk = (entry_price - stop_loss).abs();
        let rr_ratio = if risk.is_zero() {
            Decimal::ZERO
        } else {
            ((take_profit - entry_price).abs() / risk).round_dp(2)
        };
        Self {
            signal_id: Uuid::new_v4().to_string(),
            direction,
            entry_price,
            stop_loss,
            take_profit,
            rr_ratio,
            reason: reason.into(),
            generated_at,
        }
    }

    /// |entry - stop|
    pub fn risk_distance(&self) -> Decimal {
        (self.entry_price - self.stop_loss).abs()
    }
}

/// Position size derived for a signal; consumed once alongside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizingResult {
    pub quantity: Decimal,
    pub notional: Decimal,
    pub margin: Decimal,
    pub risk_budget: Decimal,
    pub est_fee: Decimal,
    pub leverage: u32,
}
