use rust_decimal::{Decimal, RoundingStrategy};
use tracing::debug;

use super::PositionSizer;
use crate::config::{FeeConfig, SizingConfig};
use crate::domain::{Signal, SizingResult};
use crate::error::{BotError, Result};
use crate::exchange::VenueKind;

const MONEY_DP: u32 = 4;
const FRACTIONAL_QTY_DP: u32 = 4;

/// Sizes every trade off a fixed INR capital figure, never the live balance.
///
/// ```text
/// risk_budget = capital_inr * inr_to_usdt * leverage * risk% / 100
/// quantity    = risk_budget / |entry - stop|   (whole contracts: floor, min 1)
/// notional    = entry * quantity
/// margin      = notional / leverage
/// est_fee     = notional * venue fee rate
/// ```
#[derive(Debug, Clone)]
pub struct FixedCapitalSizer {
    sizing: SizingConfig,
    fees: FeeConfig,
    leverage: u32,
}

impl FixedCapitalSizer {
    pub fn new(sizing: SizingConfig, fees: FeeConfig, leverage: u32) -> Self {
        Self {
            sizing,
            fees,
            leverage,
        }
    }

    pub fn risk_budget(&self) -> Decimal {
        self.sizing.fixed_capital_inr
            * self.sizing.inr_to_usdt
            * Decimal::from(self.leverage)
            * self.sizing.risk_per_trade_percent
            / Decimal::ONE_HUNDRED
    }
}

impl PositionSizer for FixedCapitalSizer {
    fn size(&self, signal: &Signal, venue: VenueKind) -> Result<SizingResult> {
        let sl_distance = signal.risk_distance();
        if sl_distance <= Decimal::ZERO {
            return Err(BotError::Validation(format!(
                "stop distance must be > 0, got {}",
                sl_distance
            )));
        }
        if self.leverage == 0 {
            return Err(BotError::Validation("leverage must be > 0".into()));
        }

        let risk_budget = self.risk_budget();
        let raw_qty = risk_budget / sl_distance;
        let quantity = if venue.whole_contracts() {
            raw_qty.floor().max(Decimal::ONE)
        } else {
            raw_qty.round_dp_with_strategy(FRACTIONAL_QTY_DP, RoundingStrategy::MidpointAwayFromZero)
        };
        if quantity <= Decimal::ZERO {
            return Err(BotError::Validation(format!(
                "computed quantity {} is below venue precision",
                raw_qty
            )));
        }

        let notional = signal.entry_price * quantity;
        let margin = notional / Decimal::from(self.leverage);
        let est_fee = notional * self.fees.fee_rate(venue);

        let result = SizingResult {
            quantity,
            notional: notional.round_dp(MONEY_DP),
            margin: margin.round_dp(MONEY_DP),
            risk_budget: risk_budget.round_dp(MONEY_DP),
            est_fee: est_fee.round_dp(MONEY_DP),
            leverage: self.leverage,
        };
        debug!(
            venue = %venue,
            qty = %result.quantity,
            notional = %result.notional,
            margin = %result.margin,
            risk_budget = %result.risk_budget,
            est_fee = %result.est_fee,
            "sized position"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Direction;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn sizer() -> FixedCapitalSizer {
        FixedCapitalSizer::new(SizingConfig::default(), FeeConfig::default(), 3)
    }

    fn signal(entry: Decimal, stop: Decimal) -> Signal {
        Signal::new(Direction::Long, entry, stop, entry + dec!(1), "t", Utc::now())
    }

    #[test]
    fn risk_budget_from_fixed_capital() {
        // 1000 INR * 0.012 * 3x * 2%
        assert_eq!(sizer().risk_budget(), dec!(0.72));
    }

    #[test]
    fn whole_contracts_floor_with_minimum_one() {
        let s = sizer();
        let r = s.size(&signal(dec!(0.5), dec!(0.49)), VenueKind::DeltaDemo).unwrap();
        // 0.72 / 0.01 = 72
        assert_eq!(r.quantity, dec!(72));
        assert_eq!(r.notional, dec!(36));
        assert_eq!(r.margin, dec!(12));
        assert_eq!(r.est_fee, dec!(0.0144));
        assert_eq!(r.leverage, 3);

        let wide = s.size(&signal(dec!(0.5), dec!(0.3)), VenueKind::DeltaDemo).unwrap();
        // 0.72 / 0.2 = 3.6 -> 3
        assert_eq!(wide.quantity, dec!(3));

        let huge = s.size(&signal(dec!(10), dec!(5)), VenueKind::DeltaDemo).unwrap();
        assert_eq!(huge.quantity, dec!(1));
    }

    #[test]
    fn fractional_venue_keeps_four_decimals() {
        let r = sizer()
            .size(&signal(dec!(0.5), dec!(0.3)), VenueKind::CoinSwitchLive)
            .unwrap();
        assert_eq!(r.quantity, dec!(3.6));
        assert_eq!(r.notional, dec!(1.8));
        // 1.20% all-in cost
        assert_eq!(r.est_fee, dec!(0.0216));
    }

    #[test]
    fn zero_stop_distance_is_rejected() {
        let err = sizer()
            .size(&signal(dec!(0.5), dec!(0.5)), VenueKind::DeltaDemo)
            .unwrap_err();
        assert!(matches!(err, BotError::Validation(_)));
    }
}
