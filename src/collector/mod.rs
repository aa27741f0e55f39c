//! Market data collection: futures candles for signals and trailing stops.

mod futures_candles;

pub use futures_candles::{aggregate_candles, interval_secs, CandleFeed, FuturesCandleFeed};
