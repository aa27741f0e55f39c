//! Scripted fakes for controller tests.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

use crate::adapters::SqliteLedger;
use crate::collector::CandleFeed;
use crate::config::FeeConfig;
use crate::domain::{
    Candle, CloseOutcome, Direction, OrderResult, OrderSide, OrderStatusInfo, PositionInfo,
    Signal, SizingResult,
};
use crate::error::{BotError, Result};
use crate::exchange::{VenueAdapter, VenueKind};
use crate::notify::{CommandSource, Notifier};

use super::context::{BotContext, BotSettings};
use super::scheduler::Clock;

pub const SYMBOL: &str = "ADAUSDT";

/// Venue whose answers are queued up front; every call is recorded.
#[derive(Default)]
pub struct FakeVenue {
    pub kind: VenueKind,
    state: Mutex<FakeVenueState>,
}

#[derive(Default)]
struct FakeVenueState {
    position: Option<PositionInfo>,
    position_error: bool,
    leverage_error: bool,
    market: VecDeque<Result<OrderResult>>,
    stops: VecDeque<Result<OrderResult>>,
    limits: VecDeque<Result<OrderResult>>,
    statuses: HashMap<String, OrderStatusInfo>,
    cancel_result: Option<bool>,
    close: VecDeque<Result<CloseOutcome>>,
    next_id: u32,
    calls: Vec<String>,
}

impl FakeVenue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn of_kind(kind: VenueKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            ..Self::default()
        })
    }

    fn with<R>(&self, f: impl FnOnce(&mut FakeVenueState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn set_position(&self, position: PositionInfo) {
        self.with(|s| {
            s.position = Some(position);
            s.position_error = false;
        });
    }

    pub fn set_flat(&self) {
        self.set_position(PositionInfo::flat(SYMBOL));
    }

    pub fn fail_position_query(&self) {
        self.with(|s| s.position_error = true);
    }

    pub fn fail_leverage(&self) {
        self.with(|s| s.leverage_error = true);
    }

    pub fn queue_market(&self, result: Result<OrderResult>) {
        self.with(|s| s.market.push_back(result));
    }

    pub fn queue_stop(&self, result: Result<OrderResult>) {
        self.with(|s| s.stops.push_back(result));
    }

    pub fn queue_limit(&self, result: Result<OrderResult>) {
        self.with(|s| s.limits.push_back(result));
    }

    pub fn queue_close(&self, result: Result<CloseOutcome>) {
        self.with(|s| s.close.push_back(result));
    }

    pub fn set_status(&self, status: OrderStatusInfo) {
        self.with(|s| {
            s.statuses.insert(status.order_id.clone(), status);
        });
    }

    /// Every cancel answers `ok` from now on
    pub fn set_cancel_result(&self, ok: bool) {
        self.with(|s| s.cancel_result = Some(ok));
    }

    pub fn calls(&self) -> Vec<String> {
        self.with(|s| s.calls.clone())
    }

    pub fn calls_starting_with(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    fn record(&self, call: String) {
        self.with(|s| s.calls.push(call));
    }

    fn next_accepted(&self, prefix: &str) -> OrderResult {
        self.with(|s| {
            s.next_id += 1;
            OrderResult::accepted(format!("{}-{}", prefix, s.next_id), None, None)
        })
    }
}

#[async_trait]
impl VenueAdapter for FakeVenue {
    fn kind(&self) -> VenueKind {
        self.kind
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()> {
        self.record(format!("leverage {} {}", symbol, leverage));
        if self.with(|s| s.leverage_error) {
            return Err(BotError::Venue("leverage rejected".into()));
        }
        Ok(())
    }

    async fn get_position(&self, symbol: &str) -> Result<PositionInfo> {
        self.record(format!("position {}", symbol));
        self.with(|s| {
            if s.position_error {
                return Err(BotError::Venue("position endpoint down".into()));
            }
            Ok(s.position.clone().unwrap_or_else(|| PositionInfo::flat(symbol)))
        })
    }

    async fn place_market_order(
        &self,
        _symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        reduce_only: bool,
    ) -> Result<OrderResult> {
        self.record(format!("market {} {} reduce_only={}", side, quantity, reduce_only));
        match self.with(|s| s.market.pop_front()) {
            Some(result) => result,
            None => Ok(self.next_accepted("mkt")),
        }
    }

    async fn place_stop_order(
        &self,
        _symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        stop_price: Decimal,
    ) -> Result<OrderResult> {
        self.record(format!("stop {} {} @ {}", side, quantity, stop_price));
        match self.with(|s| s.stops.pop_front()) {
            Some(result) => result,
            None => Ok(self.next_accepted("sl")),
        }
    }

    async fn place_limit_order(
        &self,
        _symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
    ) -> Result<OrderResult> {
        self.record(format!("limit {} {} @ {}", side, quantity, price));
        match self.with(|s| s.limits.pop_front()) {
            Some(result) => result,
            None => Ok(self.next_accepted("tp")),
        }
    }

    async fn cancel_order(&self, _symbol: &str, order_id: &str) -> Result<bool> {
        self.record(format!("cancel {}", order_id));
        Ok(self.with(|s| s.cancel_result.unwrap_or(true)))
    }

    async fn get_order_status(&self, _symbol: &str, order_id: &str) -> Result<OrderStatusInfo> {
        self.record(format!("status {}", order_id));
        self.with(|s| match s.statuses.get(order_id) {
            Some(status) => Ok(status.clone()),
            None => Err(BotError::Venue(format!("order {} not found", order_id))),
        })
    }

    async fn close_position(&self, symbol: &str) -> Result<CloseOutcome> {
        self.record(format!("close {}", symbol));
        match self.with(|s| s.close.pop_front()) {
            Some(result) => result,
            None => Ok(CloseOutcome::Flat),
        }
    }

    async fn get_product_id(&self, symbol: &str) -> Result<String> {
        Ok(symbol.to_string())
    }
}

/// Candle feed returning whatever was last set
#[derive(Default)]
pub struct FakeCandles {
    candles: Mutex<Option<Vec<Candle>>>,
}

impl FakeCandles {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Flat candles with a constant true range of 2 (high = close + 1,
    /// low = close - 1) ending at `last_close`.
    pub fn set_closes(&self, count: usize, last_close: Decimal) {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let candles = (0..count)
            .map(|i| Candle {
                open_time: start + ChronoDuration::minutes(5 * i as i64),
                open: last_close,
                high: last_close + Decimal::ONE,
                low: last_close - Decimal::ONE,
                close: last_close,
                volume: dec!(1),
            })
            .collect();
        *self.candles.lock().unwrap() = Some(candles);
    }

    pub fn set_unavailable(&self) {
        *self.candles.lock().unwrap() = None;
    }
}

#[async_trait]
impl CandleFeed for FakeCandles {
    async fn fetch_candles(&self, _: &str, _: &str, _: usize) -> Result<Vec<Candle>> {
        self.candles
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| BotError::MarketDataUnavailable("no candles scripted".into()))
    }
}

/// Records every outbound message
#[derive(Default)]
pub struct CaptureNotifier {
    pub sent: Mutex<Vec<String>>,
}

impl CaptureNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn messages(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn any_contains(&self, needle: &str) -> bool {
        self.messages().iter().any(|m| m.contains(needle))
    }
}

#[async_trait]
impl Notifier for CaptureNotifier {
    async fn send(&self, text: &str) {
        self.sent.lock().unwrap().push(text.to_string());
    }
}

/// Hands out queued command batches, one per poll
#[derive(Default)]
pub struct ScriptedCommands {
    batches: Mutex<VecDeque<Vec<String>>>,
}

impl ScriptedCommands {
    pub fn new(batches: &[&[&str]]) -> Arc<Self> {
        Arc::new(Self {
            batches: Mutex::new(
                batches
                    .iter()
                    .map(|b| b.iter().map(|s| s.to_string()).collect())
                    .collect(),
            ),
        })
    }
}

#[async_trait]
impl CommandSource for ScriptedCommands {
    async fn poll(&self) -> Vec<String> {
        self.batches.lock().unwrap().pop_front().unwrap_or_default()
    }
}

/// Virtual clock: `sleep` returns at once and moves `now` forward.
/// Optionally signals shutdown once virtual time reaches a deadline.
pub struct TestClock {
    now: Mutex<DateTime<Utc>>,
    stop: Mutex<Option<(DateTime<Utc>, watch::Sender<bool>)>>,
}

impl TestClock {
    pub fn starting_at(wall: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(wall),
            stop: Mutex::new(None),
        })
    }

    /// Clock that flips the returned shutdown channel at `deadline`
    pub fn with_deadline(
        wall: DateTime<Utc>,
        deadline: DateTime<Utc>,
    ) -> (Arc<Self>, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        let clock = Arc::new(Self {
            now: Mutex::new(wall),
            stop: Mutex::new(Some((deadline, tx))),
        });
        (clock, rx)
    }

    /// Move `now` forward without yielding, as a long-running call would
    pub fn advance(&self, by: ChronoDuration) {
        *self.now.lock().unwrap() += by;
    }
}

#[async_trait]
impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    async fn sleep(&self, duration: Duration) {
        let now = {
            let mut now = self.now.lock().unwrap();
            *now += ChronoDuration::from_std(duration).unwrap();
            *now
        };
        if let Some((deadline, tx)) = self.stop.lock().unwrap().as_ref() {
            if now >= *deadline {
                let _ = tx.send(true);
            }
        }
        tokio::task::yield_now().await;
    }
}

pub fn market_open() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 4, 14, 0, 0).unwrap()
}

pub fn settings() -> BotSettings {
    BotSettings {
        symbol: SYMBOL.to_string(),
        leverage: 3,
        fees: FeeConfig::default(),
        trailing_enabled: true,
        atr_period: 14,
        atr_trail_mult: dec!(1.5),
        candle_limit: 300,
    }
}

pub struct Harness {
    pub venue: Arc<FakeVenue>,
    pub ledger: Arc<SqliteLedger>,
    pub notifier: Arc<CaptureNotifier>,
    pub candles: Arc<FakeCandles>,
}

impl Harness {
    pub async fn new() -> Self {
        Self {
            venue: FakeVenue::new(),
            ledger: Arc::new(SqliteLedger::in_memory().await.unwrap()),
            notifier: CaptureNotifier::new(),
            candles: FakeCandles::new(),
        }
    }

    pub fn context(&self) -> BotContext {
        self.context_with_clock(TestClock::starting_at(market_open()))
    }

    pub fn context_with_clock(&self, clock: Arc<TestClock>) -> BotContext {
        BotContext {
            venue: self.venue.clone(),
            venue_builder: None,
            ledger: self.ledger.clone(),
            notifier: self.notifier.clone(),
            candles: self.candles.clone(),
            clock,
            settings: settings(),
        }
    }
}

/// Long 100 / stop 99 / target 103
pub fn long_signal() -> Signal {
    Signal::new(
        Direction::Long,
        dec!(100),
        dec!(99),
        dec!(103),
        "bias=bullish fvg_age=1 rr=3",
        Utc::now(),
    )
}

pub fn sizing(quantity: Decimal) -> SizingResult {
    SizingResult {
        quantity,
        notional: dec!(100) * quantity,
        margin: (dec!(100) * quantity / dec!(3)).round_dp(4),
        risk_budget: dec!(5),
        est_fee: (dec!(100) * quantity * dec!(0.0004)).round_dp(4),
        leverage: 3,
    }
}
