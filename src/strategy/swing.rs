//! Structure-based entry signals.
//!
//! Pipeline per cycle:
//! 1. aggregate LTF candles into HTF bars and read the swing bias
//! 2. resolve the session RR target
//! 3. find a displacement candle aligned with the bias
//! 4. find a later, unexpired fair-value gap in the same direction
//! 5. require price to have retraced to the entry level inside the gap

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info};

use super::bias::{compute_bias, Bias};
use super::indicators::ewm_atr;
use super::session::SessionTable;
use super::SignalSource;
use crate::collector::{aggregate_candles, interval_secs, CandleFeed};
use crate::config::{StrategyConfig, TradingConfig, TradingProfile};
use crate::domain::{Candle, Direction, Signal};
use crate::error::{BotError, Result};

/// Bars searched for a displacement candle, the forming bar excluded
const DISPLACEMENT_LOOKBACK: usize = 50;
const PRICE_DP: u32 = 6;

/// Three-candle imbalance left behind by an impulsive move
#[derive(Debug, Clone, PartialEq)]
pub struct FairValueGap {
    /// Bar that completed the gap
    pub index: usize,
    pub gap_high: Decimal,
    pub gap_low: Decimal,
    /// Bars since `index`
    pub age_bars: usize,
}

impl FairValueGap {
    pub fn range(&self) -> Decimal {
        self.gap_high - self.gap_low
    }
}

/// Per-profile knobs of the setup search
#[derive(Debug, Clone)]
pub struct SetupParams {
    pub atr_period: usize,
    pub displacement_mult: Decimal,
    pub max_fvg_age: usize,
    pub entry_percent: Decimal,
}

/// Most recent closed candle whose body is at least `mult` ATRs and whose
/// colour agrees with `bias`.
pub fn find_displacement(
    candles: &[Candle],
    atr: &[Option<Decimal>],
    bias: Bias,
    mult: Decimal,
) -> Option<usize> {
    let n = candles.len();
    if n < 2 || bias == Bias::Neutral {
        return None;
    }
    let lookback = DISPLACEMENT_LOOKBACK.min(n - 1);
    (n - lookback..n - 1).rev().find(|&i| {
        let candle = &candles[i];
        let Some(atr) = atr.get(i).copied().flatten() else {
            return false;
        };
        if candle.body() < atr * mult {
            return false;
        }
        match bias {
            Bias::Bullish => candle.is_bullish(),
            Bias::Bearish => candle.is_bearish(),
            Bias::Neutral => false,
        }
    })
}

/// Newest gap in the bias direction no older than `max_age` bars.
///
/// Bullish at `i`: `low[i] > high[i-2]`. Bearish at `i`: `high[i] < low[i-2]`.
pub fn find_active_fvg(candles: &[Candle], bias: Bias, max_age: usize) -> Option<FairValueGap> {
    let n = candles.len();
    if n < 3 {
        return None;
    }
    let current = n - 1;
    for i in (2..=current).rev() {
        let age = current - i;
        if age > max_age {
            break;
        }
        let (bar, two_back) = (&candles[i], &candles[i - 2]);
        let gap = match bias {
            Bias::Bullish if bar.low > two_back.high => Some((bar.low, two_back.high)),
            Bias::Bearish if bar.high < two_back.low => Some((two_back.low, bar.high)),
            _ => None,
        };
        if let Some((gap_high, gap_low)) = gap {
            return Some(FairValueGap {
                index: i,
                gap_high,
                gap_low,
                age_bars: age,
            });
        }
    }
    None
}

/// Build a limit-style entry from LTF candles, or `None` when no setup is live.
pub fn build_signal(
    candles: &[Candle],
    bias: Bias,
    rr: Decimal,
    params: &SetupParams,
    now: DateTime<Utc>,
) -> Option<Signal> {
    let direction = bias.direction()?;
    let last_close = candles.last()?.close;

    let atr = ewm_atr(candles, params.atr_period);
    let Some(disp_idx) = find_displacement(candles, &atr, bias, params.displacement_mult) else {
        debug!("no displacement candle");
        return None;
    };
    let Some(fvg) = find_active_fvg(candles, bias, params.max_fvg_age) else {
        debug!("no active FVG");
        return None;
    };
    if fvg.index <= disp_idx {
        debug!(fvg = fvg.index, displacement = disp_idx, "FVG precedes displacement");
        return None;
    }
    let range = fvg.range();
    if range <= Decimal::ZERO {
        return None;
    }

    let depth = Decimal::ONE - params.entry_percent / Decimal::ONE_HUNDRED;
    let (entry, stop) = match direction {
        Direction::Long => (fvg.gap_low + depth * range, fvg.gap_low),
        Direction::Short => (fvg.gap_high - depth * range, fvg.gap_high),
    };
    let retraced = match direction {
        Direction::Long => last_close <= entry,
        Direction::Short => last_close >= entry,
    };
    if !retraced {
        debug!(%last_close, %entry, "price has not retraced to entry");
        return None;
    }

    let risk = (entry - stop).abs();
    if risk <= Decimal::ZERO {
        return None;
    }
    let target = match direction {
        Direction::Long => entry + rr * risk,
        Direction::Short => entry - rr * risk,
    };

    let signal = Signal::new(
        direction,
        entry.round_dp(PRICE_DP),
        stop.round_dp(PRICE_DP),
        target.round_dp(PRICE_DP),
        format!("bias={} fvg_age={} rr={}", bias, fvg.age_bars, rr.normalize()),
        now,
    );
    info!(
        direction = %signal.direction,
        entry = %signal.entry_price,
        sl = %signal.stop_loss,
        tp = %signal.take_profit,
        rr = %signal.rr_ratio,
        "signal generated"
    );
    Some(signal)
}

/// HTF bias + displacement + FVG retracement, fed by futures candles
pub struct SwingSignalEngine {
    feed: Arc<dyn CandleFeed>,
    symbol: String,
    strategy: StrategyConfig,
    sessions: SessionTable,
    atr_period: usize,
    candle_limit: usize,
}

impl SwingSignalEngine {
    pub fn new(
        feed: Arc<dyn CandleFeed>,
        symbol: impl Into<String>,
        trading: &TradingConfig,
        strategy: StrategyConfig,
    ) -> Result<Self> {
        let sessions = SessionTable::from_config(&strategy)?;
        Ok(Self {
            feed,
            symbol: symbol.into(),
            strategy,
            sessions,
            atr_period: trading.atr_period,
            candle_limit: trading.candle_limit,
        })
    }

    fn params(&self, profile: TradingProfile) -> SetupParams {
        SetupParams {
            atr_period: self.atr_period,
            displacement_mult: self.strategy.displacement_mult(profile),
            max_fvg_age: self.strategy.max_fvg_age(profile),
            entry_percent: self.strategy.entry_percent,
        }
    }
}

#[async_trait]
impl SignalSource for SwingSignalEngine {
    async fn next_signal(
        &self,
        profile: TradingProfile,
        now: DateTime<Utc>,
    ) -> Result<Option<Signal>> {
        let Some(rr) = self.sessions.rr_at(now) else {
            debug!(time = %now.format("%H:%M"), "outside session windows");
            return Ok(None);
        };

        let ltf = self
            .feed
            .fetch_candles(&self.symbol, profile.ltf_interval(), self.candle_limit)
            .await?;
        if ltf.is_empty() {
            return Err(BotError::MarketDataUnavailable(format!(
                "no {} candles for {}",
                profile.ltf_interval(),
                self.symbol
            )));
        }

        let bucket = interval_secs(profile.htf_interval()).ok_or_else(|| {
            BotError::Validation(format!("bad HTF interval {}", profile.htf_interval()))
        })?;
        let htf = aggregate_candles(&ltf, bucket);
        if htf.len() < self.strategy.min_htf_bars {
            debug!(bars = htf.len(), "not enough HTF bars");
            return Ok(None);
        }

        let bias = compute_bias(
            &htf,
            self.strategy.pivot_left_bars,
            self.strategy.pivot_right_bars,
        );
        if bias == Bias::Neutral {
            debug!("bias neutral, no trade");
            return Ok(None);
        }

        Ok(build_signal(&ltf, bias, rr, &self.params(profile), now))
    }
}
