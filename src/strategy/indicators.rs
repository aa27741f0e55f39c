//! Volatility indicators over futures candles.

use rust_decimal::Decimal;

use crate::domain::Candle;

/// True range per candle. The first candle has no previous close and
/// uses `high - low`.
pub fn true_ranges(candles: &[Candle]) -> Vec<Decimal> {
    candles
        .iter()
        .enumerate()
        .map(|(i, c)| match i.checked_sub(1).map(|p| candles[p].close) {
            Some(prev_close) => c.high.max(prev_close) - c.low.min(prev_close),
            None => c.high - c.low,
        })
        .collect()
}

/// Exponentially weighted ATR with span `period` (alpha = 2 / (period + 1)).
///
/// Weights are normalised over the observed history, so early values are
/// not biased toward zero. Entries before `period` observations are `None`.
pub fn ewm_atr(candles: &[Candle], period: usize) -> Vec<Option<Decimal>> {
    if period == 0 {
        return vec![None; candles.len()];
    }
    let alpha = Decimal::TWO / Decimal::from(period as u64 + 1);
    let decay = Decimal::ONE - alpha;

    let mut weighted_sum = Decimal::ZERO;
    let mut weight_total = Decimal::ZERO;
    true_ranges(candles)
        .into_iter()
        .enumerate()
        .map(|(i, tr)| {
            weighted_sum = tr + decay * weighted_sum;
            weight_total = Decimal::ONE + decay * weight_total;
            (i + 1 >= period).then(|| weighted_sum / weight_total)
        })
        .collect()
}

/// Mean of the last `period` true ranges. Needs `period + 1` candles so
/// every range in the window has a previous close.
pub fn simple_atr(candles: &[Candle], period: usize) -> Option<Decimal> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }
    let ranges = true_ranges(candles);
    let window = &ranges[ranges.len() - period..];
    Some(window.iter().copied().sum::<Decimal>() / Decimal::from(period as u64))
}
