//! Higher-timeframe swing bias from confirmed pivot structure.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{Candle, Direction};

/// Market structure read from the last two swing highs and lows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bias {
    Bullish,
    Bearish,
    Neutral,
}

impl Bias {
    pub fn as_str(&self) -> &'static str {
        match self {
            Bias::Bullish => "bullish",
            Bias::Bearish => "bearish",
            Bias::Neutral => "neutral",
        }
    }

    /// Trade direction this bias permits, if any
    pub fn direction(&self) -> Option<Direction> {
        match self {
            Bias::Bullish => Some(Direction::Long),
            Bias::Bearish => Some(Direction::Short),
            Bias::Neutral => None,
        }
    }
}

impl std::fmt::Display for Bias {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Values at confirmed pivots. A pivot beats (or ties) every value in the
/// `left` bars before it and the `right` bars after it, as judged by `wins`.
fn pivots<F>(values: &[Decimal], left: usize, right: usize, wins: F) -> Vec<Decimal>
where
    F: Fn(Decimal, Decimal) -> bool,
{
    if values.len() < left + right + 1 {
        return Vec::new();
    }
    (left..values.len() - right)
        .filter(|&i| {
            let v = values[i];
            values[i - left..i].iter().all(|&o| wins(v, o))
                && values[i + 1..=i + right].iter().all(|&o| wins(v, o))
        })
        .map(|i| values[i])
        .collect()
}

fn last_two(values: &[Decimal]) -> Option<(Decimal, Decimal)> {
    match values {
        [.., prev, last] => Some((*prev, *last)),
        _ => None,
    }
}

/// Bullish on higher highs with higher lows, bearish on lower lows with
/// lower highs, neutral otherwise or when history is too short.
pub fn compute_bias(candles: &[Candle], left_bars: usize, right_bars: usize) -> Bias {
    if candles.len() < (left_bars + right_bars + 2) * 2 {
        debug!(bars = candles.len(), "not enough HTF bars for bias");
        return Bias::Neutral;
    }

    let highs: Vec<Decimal> = candles.iter().map(|c| c.high).collect();
    let lows: Vec<Decimal> = candles.iter().map(|c| c.low).collect();
    let pivot_highs = pivots(&highs, left_bars, right_bars, |v, o| v >= o);
    let pivot_lows = pivots(&lows, left_bars, right_bars, |v, o| v <= o);

    let (Some((prev_ph, last_ph)), Some((prev_pl, last_pl))) =
        (last_two(&pivot_highs), last_two(&pivot_lows))
    else {
        debug!(
            pivot_highs = pivot_highs.len(),
            pivot_lows = pivot_lows.len(),
            "insufficient pivots for bias"
        );
        return Bias::Neutral;
    };

    let bias = if last_ph > prev_ph && last_pl > prev_pl {
        Bias::Bullish
    } else if last_pl < prev_pl && last_ph < prev_ph {
        Bias::Bearish
    } else {
        Bias::Neutral
    };
    debug!(%bias, %prev_ph, %last_ph, %prev_pl, %last_pl, "HTF bias");
    bias
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::indicators::tests::bar;
    use rust_decimal_macros::dec;

    /// Zig-zag with swing points every 4 bars; `step` shifts each wave.
    fn waves(step: Decimal) -> Vec<Candle> {
        let shape = [dec!(0), dec!(1), dec!(2), dec!(1)];
        (0..40)
            .map(|i| {
                let wave = Decimal::from(i / 4);
                let mid = dec!(100) + shape[(i % 4) as usize] * dec!(2) + wave * step;
                bar(i, mid, mid + dec!(1), mid - dec!(1), mid)
            })
            .collect()
    }

    #[test]
    fn rising_swings_are_bullish() {
        assert_eq!(compute_bias(&waves(dec!(1)), 1, 1), Bias::Bullish);
    }

    #[test]
    fn falling_swings_are_bearish() {
        assert_eq!(compute_bias(&waves(dec!(-1)), 1, 1), Bias::Bearish);
    }

    #[test]
    fn flat_swings_are_neutral() {
        assert_eq!(compute_bias(&waves(dec!(0)), 1, 1), Bias::Neutral);
    }

    #[test]
    fn short_history_is_neutral() {
        let candles: Vec<_> = waves(dec!(1)).into_iter().take(10).collect();
        assert_eq!(compute_bias(&candles, 5, 5), Bias::Neutral);
    }

    #[test]
    fn pivot_detection_respects_windows() {
        let values = [dec!(1), dec!(3), dec!(2), dec!(5), dec!(4), dec!(4)];
        assert_eq!(pivots(&values, 1, 1, |v, o| v >= o), vec![dec!(3), dec!(5)]);
        assert_eq!(pivots(&values, 2, 2, |v, o| v >= o), vec![dec!(5)]);
        assert!(pivots(&values, 3, 3, |v, o| v >= o).is_empty());
    }

    #[test]
    fn bias_maps_to_direction() {
        assert_eq!(Bias::Bullish.direction(), Some(Direction::Long));
        assert_eq!(Bias::Bearish.direction(), Some(Direction::Short));
        assert_eq!(Bias::Neutral.direction(), None);
    }
}
