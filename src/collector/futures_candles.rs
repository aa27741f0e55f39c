//! Futures OHLCV candles: Delta Exchange India first, Binance USD-M futures as
//! fallback. Spot data is never used.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::adapters::delta::DELTA_DEMO_BASE;
use crate::adapters::parse_decimalish as decimalish;
use crate::domain::Candle;
use crate::error::{BotError, Result};

const BINANCE_FUTURES_BASE: &str = "https://fapi.binance.com";

/// Source of closed futures candles, oldest first
#[async_trait]
pub trait CandleFeed: Send + Sync {
    async fn fetch_candles(&self, symbol: &str, interval: &str, limit: usize)
        -> Result<Vec<Candle>>;
}

/// Interval string ("5m", "1h", ...) in seconds
pub fn interval_secs(interval: &str) -> Option<i64> {
    if !interval.is_ascii() {
        return None;
    }
    let (value, unit) = interval.split_at(interval.len().checked_sub(1)?);
    let value: i64 = value.parse().ok()?;
    let unit_secs = match unit {
        "m" => 60,
        "h" => 3600,
        "d" => 86_400,
        _ => return None,
    };
    (value > 0).then_some(value * unit_secs)
}

pub struct FuturesCandleFeed {
    client: reqwest::Client,
    delta_base: String,
    binance_base: String,
}

impl FuturesCandleFeed {
    pub fn new(delta_base: Option<&str>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| BotError::Internal(format!("failed to build candle HTTP client: {}", e)))?;
        Ok(Self {
            client,
            delta_base: delta_base
                .unwrap_or(DELTA_DEMO_BASE)
                .trim_end_matches('/')
                .to_string(),
            binance_base: BINANCE_FUTURES_BASE.to_string(),
        })
    }

    async fn get_json(&self, url: &str, query: &[(&str, String)]) -> Result<Value> {
        let response = self.client.get(url).query(query).send().await?;
        if !response.status().is_success() {
            return Err(BotError::MarketDataUnavailable(format!(
                "candle API error {} for {}",
                response.status(),
                url
            )));
        }
        Ok(response.json().await?)
    }

    async fn fetch_delta(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Candle>> {
        let step = interval_secs(interval).ok_or_else(|| {
            BotError::Validation(format!("unsupported candle interval: {}", interval))
        })?;
        let end = Utc::now().timestamp();
        let start = end - step * limit as i64;

        let url = format!("{}/v2/history/candles", self.delta_base);
        let data = self
            .get_json(
                &url,
                &[
                    ("resolution", interval.to_string()),
                    ("symbol", symbol.to_string()),
                    ("start", start.to_string()),
                    ("end", end.to_string()),
                ],
            )
            .await?;

        if !data.get("success").and_then(Value::as_bool).unwrap_or(false) {
            return Err(BotError::MarketDataUnavailable(format!(
                "Delta candles returned success=false: {}",
                data
            )));
        }

        let mut candles: Vec<Candle> = data
            .get("result")
            .and_then(Value::as_array)
            .map(|rows| rows.iter().filter_map(parse_delta_row).collect())
            .unwrap_or_default();
        candles.sort_by_key(|c| c.open_time);
        Ok(tail(candles, limit))
    }

    async fn fetch_binance(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Candle>> {
        let url = format!("{}/fapi/v1/klines", self.binance_base);
        let data = self
            .get_json(
                &url,
                &[
                    ("symbol", symbol.to_string()),
                    ("interval", interval.to_string()),
                    ("limit", limit.min(1500).to_string()),
                ],
            )
            .await?;

        let mut candles: Vec<Candle> = data
            .as_array()
            .map(|rows| rows.iter().filter_map(parse_binance_row).collect())
            .unwrap_or_default();
        candles.sort_by_key(|c| c.open_time);
        Ok(candles)
    }
}

#[async_trait]
impl CandleFeed for FuturesCandleFeed {
    async fn fetch_candles(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        match self.fetch_delta(symbol, interval, limit).await {
            Ok(candles) if !candles.is_empty() => {
                debug!("Delta candles fetched: {} bars [{}]", candles.len(), interval);
                return Ok(candles);
            }
            Ok(_) => warn!("Delta candles empty for {} [{}]", symbol, interval),
            Err(e) => warn!("Delta candle fetch failed for {} [{}]: {}", symbol, interval, e),
        }

        warn!(
            "Primary data source failed for {}. Falling back to Binance USD-M futures.",
            interval
        );
        match self.fetch_binance(symbol, interval, limit).await {
            Ok(candles) if !candles.is_empty() => {
                debug!("Binance futures candles fetched: {} bars [{}]", candles.len(), interval);
                Ok(candles)
            }
            Ok(_) => Err(BotError::MarketDataUnavailable(format!(
                "no candles from either source for {} [{}]",
                symbol, interval
            ))),
            Err(e) => Err(BotError::MarketDataUnavailable(format!(
                "both candle sources failed for {} [{}]: {}",
                symbol, interval, e
            ))),
        }
    }
}

fn tail(mut candles: Vec<Candle>, limit: usize) -> Vec<Candle> {
    if candles.len() > limit {
        candles.drain(..candles.len() - limit);
    }
    candles
}

fn parse_delta_row(row: &Value) -> Option<Candle> {
    Some(Candle {
        open_time: DateTime::from_timestamp(row.get("time")?.as_i64()?, 0)?,
        open: decimalish(row.get("open")?)?,
        high: decimalish(row.get("high")?)?,
        low: decimalish(row.get("low")?)?,
        close: decimalish(row.get("close")?)?,
        volume: row.get("volume").and_then(decimalish).unwrap_or_default(),
    })
}

fn parse_binance_row(row: &Value) -> Option<Candle> {
    let row = row.as_array()?;
    if row.len() < 6 {
        return None;
    }
    Some(Candle {
        open_time: DateTime::from_timestamp_millis(row[0].as_i64()?)?,
        open: decimalish(&row[1])?,
        high: decimalish(&row[2])?,
        low: decimalish(&row[3])?,
        close: decimalish(&row[4])?,
        volume: decimalish(&row[5])?,
    })
}

/// Aggregate lower-timeframe candles into `bucket_secs` bars.
///
/// Buckets are closed and labelled on the right: a candle stamped `t` lands
/// in the bar `(T - bucket, T]` with `T = ceil(t / bucket) * bucket`, and the
/// resulting candle carries `T` as its timestamp.
pub fn aggregate_candles(candles: &[Candle], bucket_secs: i64) -> Vec<Candle> {
    if bucket_secs <= 0 {
        return Vec::new();
    }

    let mut buckets: BTreeMap<i64, Candle> = BTreeMap::new();
    for candle in candles {
        let ts = candle.open_time.timestamp();
        let label = ts.div_euclid(bucket_secs) * bucket_secs
            + if ts.rem_euclid(bucket_secs) == 0 { 0 } else { bucket_secs };

        buckets
            .entry(label)
            .and_modify(|bar| {
                bar.high = bar.high.max(candle.high);
                bar.low = bar.low.min(candle.low);
                bar.close = candle.close;
                bar.volume += candle.volume;
            })
            .or_insert_with(|| Candle {
                open_time: DateTime::from_timestamp(label, 0).unwrap_or(candle.open_time),
                ..candle.clone()
            });
    }
    buckets.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn candle(ts: i64, open: Decimal, high: Decimal, low: Decimal, close: Decimal) -> Candle {
        Candle {
            open_time: DateTime::from_timestamp(ts, 0).expect("valid ts"),
            open,
            high,
            low,
            close,
            volume: dec!(1),
        }
    }

    #[test]
    fn parses_intervals() {
        assert_eq!(interval_secs("5m"), Some(300));
        assert_eq!(interval_secs("15m"), Some(900));
        assert_eq!(interval_secs("1h"), Some(3600));
        assert_eq!(interval_secs("x"), None);
        assert_eq!(interval_secs(""), None);
    }

    #[test]
    fn parses_delta_and_binance_rows() {
        let delta = json!({ "time": 1_700_000_100, "open": "0.5", "high": 0.52, "low": "0.49", "close": "0.51", "volume": 1200 });
        let c = parse_delta_row(&delta).expect("delta row");
        assert_eq!(c.high, dec!(0.52));
        assert_eq!(c.volume, dec!(1200));

        let binance = json!([1_700_000_100_000i64, "0.5", "0.52", "0.49", "0.51", "1200", 0, "0", 0, "0", "0", "0"]);
        let c = parse_binance_row(&binance).expect("binance row");
        assert_eq!(c.open_time.timestamp(), 1_700_000_100);
        assert_eq!(c.close, dec!(0.51));
    }

    #[test]
    fn aggregates_right_closed_right_labelled() {
        // 5m bars at :05, :10, :15 fall in the bar labelled :15; :20 opens the next one
        let base = 1_700_000_100 - 1_700_000_100 % 900;
        let bars = vec![
            candle(base + 300, dec!(1), dec!(2), dec!(0.5), dec!(1.5)),
            candle(base + 600, dec!(1.5), dec!(3), dec!(1), dec!(2.5)),
            candle(base + 900, dec!(2.5), dec!(2.6), dec!(0.2), dec!(2)),
            candle(base + 1200, dec!(2), dec!(2.1), dec!(1.9), dec!(2.05)),
        ];
        let htf = aggregate_candles(&bars, 900);
        assert_eq!(htf.len(), 2);
        assert_eq!(htf[0].open_time.timestamp(), base + 900);
        assert_eq!(htf[0].open, dec!(1));
        assert_eq!(htf[0].high, dec!(3));
        assert_eq!(htf[0].low, dec!(0.2));
        assert_eq!(htf[0].close, dec!(2));
        assert_eq!(htf[0].volume, dec!(3));
        assert_eq!(htf[1].open_time.timestamp(), base + 1800);
    }

    #[test]
    fn tail_keeps_most_recent() {
        let bars: Vec<Candle> = (0..5)
            .map(|i| candle(i * 300, dec!(1), dec!(1), dec!(1), dec!(1)))
            .collect();
        let kept = tail(bars, 2);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].open_time.timestamp(), 900);
    }
}
