use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::{BotError, Result};
use crate::exchange::{RetryPolicy, VenueKind};
use crate::strategy::SessionTable;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub venue: VenueConfig,
    #[serde(default)]
    pub trading: TradingConfig,
    #[serde(default)]
    pub strategy: StrategyConfig,
    #[serde(default)]
    pub sizing: SizingConfig,
    #[serde(default)]
    pub fees: FeeConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Trading profile: drives candle intervals and the cycle cadence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
pub enum TradingProfile {
    #[default]
    #[serde(rename = "ltf_5m")]
    Ltf5m,
    #[serde(rename = "ltf_15m")]
    Ltf15m,
}

impl TradingProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradingProfile::Ltf5m => "ltf_5m",
            TradingProfile::Ltf15m => "ltf_15m",
        }
    }

    /// Lower (execution) timeframe candle interval
    pub fn ltf_interval(&self) -> &'static str {
        match self {
            TradingProfile::Ltf5m => "5m",
            TradingProfile::Ltf15m => "15m",
        }
    }

    /// Higher (bias) timeframe, aggregated from LTF candles
    pub fn htf_interval(&self) -> &'static str {
        match self {
            TradingProfile::Ltf5m => "15m",
            TradingProfile::Ltf15m => "1h",
        }
    }

    /// Seconds between trading cycles (one LTF candle)
    pub fn cycle_secs(&self) -> u64 {
        match self {
            TradingProfile::Ltf5m => 300,
            TradingProfile::Ltf15m => 900,
        }
    }
}

impl std::fmt::Display for TradingProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// API key pair for a venue. Secrets never appear in `Debug` output.
#[derive(Clone, Deserialize, Default)]
pub struct ApiCredentials {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
    /// Override of the venue's REST endpoint
    #[serde(default)]
    pub base_url: Option<String>,
}

impl ApiCredentials {
    pub fn is_complete(&self) -> bool {
        !self.api_key.is_empty() && !self.api_secret.is_empty()
    }
}

impl std::fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("api_key", &redact(&self.api_key))
            .field("api_secret", &redact(&self.api_secret))
            .field("base_url", &self.base_url)
            .finish()
    }
}

fn redact(value: &str) -> &'static str {
    if value.is_empty() {
        "<unset>"
    } else {
        "<redacted>"
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VenueConfig {
    /// Active execution venue
    #[serde(default)]
    pub kind: VenueKind,
    /// Traded perpetual (single symbol per process)
    #[serde(default = "default_symbol")]
    pub symbol: String,
    #[serde(default = "default_leverage")]
    pub leverage: u32,
    #[serde(default)]
    pub delta: ApiCredentials,
    #[serde(default)]
    pub coinswitch: ApiCredentials,
}

fn default_symbol() -> String {
    "ADAUSDT".to_string()
}

fn default_leverage() -> u32 {
    3
}

impl Default for VenueConfig {
    fn default() -> Self {
        Self {
            kind: VenueKind::default(),
            symbol: default_symbol(),
            leverage: default_leverage(),
            delta: ApiCredentials::default(),
            coinswitch: ApiCredentials::default(),
        }
    }
}

impl VenueConfig {
    pub fn credentials(&self, kind: VenueKind) -> &ApiCredentials {
        match kind {
            VenueKind::DeltaDemo => &self.delta,
            VenueKind::CoinSwitchLive => &self.coinswitch,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TradingConfig {
    pub profile: TradingProfile,
    /// Move the stop once price is 1R in profit
    pub trailing_enabled: bool,
    /// True-range lookback for trailing and displacement
    pub atr_period: usize,
    /// Trailing distance in ATR multiples
    pub atr_trail_mult: Decimal,
    /// Candles requested per market-data fetch
    pub candle_limit: usize,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            profile: TradingProfile::Ltf5m,
            trailing_enabled: true,
            atr_period: 14,
            atr_trail_mult: dec!(1.5),
            candle_limit: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    /// Retracement depth into the gap, percent of its range
    pub entry_percent: Decimal,
    pub pivot_left_bars: usize,
    pub pivot_right_bars: usize,
    pub displacement_mult_5m: Decimal,
    pub displacement_mult_15m: Decimal,
    pub max_fvg_age_5m: usize,
    pub max_fvg_age_15m: usize,
    /// Minimum aggregated HTF bars before bias is evaluated
    pub min_htf_bars: usize,
    /// Only trade inside the session windows below
    pub session_only_trading: bool,
    pub london_peak_start_utc: String,
    pub london_peak_end_utc: String,
    pub overlap_start_utc: String,
    pub overlap_end_utc: String,
    pub ny_peak_start_utc: String,
    pub ny_peak_end_utc: String,
    pub rr_london: Decimal,
    pub rr_overlap: Decimal,
    pub rr_ny: Decimal,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            entry_percent: dec!(50),
            pivot_left_bars: 5,
            pivot_right_bars: 5,
            displacement_mult_5m: dec!(1.8),
            displacement_mult_15m: dec!(1.5),
            max_fvg_age_5m: 24,
            max_fvg_age_15m: 20,
            min_htf_bars: 20,
            session_only_trading: true,
            london_peak_start_utc: "07:00".to_string(),
            london_peak_end_utc: "10:00".to_string(),
            overlap_start_utc: "13:00".to_string(),
            overlap_end_utc: "16:00".to_string(),
            ny_peak_start_utc: "17:00".to_string(),
            ny_peak_end_utc: "20:00".to_string(),
            rr_london: dec!(2),
            rr_overlap: dec!(4),
            rr_ny: dec!(3),
        }
    }
}

impl StrategyConfig {
    pub fn displacement_mult(&self, profile: TradingProfile) -> Decimal {
        match profile {
            TradingProfile::Ltf5m => self.displacement_mult_5m,
            TradingProfile::Ltf15m => self.displacement_mult_15m,
        }
    }

    pub fn max_fvg_age(&self, profile: TradingProfile) -> usize {
        match profile {
            TradingProfile::Ltf5m => self.max_fvg_age_5m,
            TradingProfile::Ltf15m => self.max_fvg_age_15m,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SizingConfig {
    /// Capital the risk budget is computed from (INR)
    pub fixed_capital_inr: Decimal,
    /// INR -> USDT conversion used for sizing
    pub inr_to_usdt: Decimal,
    pub risk_per_trade_percent: Decimal,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            fixed_capital_inr: dec!(1000),
            inr_to_usdt: dec!(0.012),
            risk_per_trade_percent: dec!(2),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeeConfig {
    pub delta_taker_fee_percent: Decimal,
    /// Trading fee plus TDS on CoinSwitch
    pub coinswitch_total_cost_percent: Decimal,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            delta_taker_fee_percent: dec!(0.02),
            coinswitch_total_cost_percent: dec!(1.20),
        }
    }
}

impl FeeConfig {
    /// Round-trip cost as a fraction of notional for `venue`
    pub fn fee_rate(&self, venue: VenueKind) -> Decimal {
        let percent = match venue {
            VenueKind::DeltaDemo => self.delta_taker_fee_percent * Decimal::TWO,
            VenueKind::CoinSwitchLive => self.coinswitch_total_cost_percent,
        };
        percent / Decimal::ONE_HUNDRED
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per remote call, including the first
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub jitter_percent: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 1000,
            jitter_percent: 20.0,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            jitter_percent: self.jitter_percent,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Wait after a candle boundary before running the cycle
    pub candle_close_buffer_secs: u64,
    /// Longest single sleep while waiting for a boundary
    pub poll_step_secs: u64,
    /// Sleep between command polls while paused
    pub pause_poll_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            candle_close_buffer_secs: 5,
            poll_step_secs: 5,
            pause_poll_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite connection URL
    #[serde(default = "default_database_url")]
    pub url: String,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_url() -> String {
    "sqlite://swingbot.db?mode=rwc".to_string()
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub bot_token: Option<String>,
    pub chat_id: Option<String>,
    /// Long-poll timeout for getUpdates; keep short so the loop stays responsive
    pub poll_timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            chat_id: None,
            poll_timeout_secs: 1,
        }
    }
}

impl TelegramConfig {
    pub fn is_configured(&self) -> bool {
        self.bot_token.as_deref().is_some_and(|t| !t.is_empty())
            && self.chat_id.as_deref().is_some_and(|c| !c.is_empty())
    }
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field(
                "bot_token",
                &redact(self.bot_token.as_deref().unwrap_or_default()),
            )
            .field("chat_id", &self.chat_id)
            .field("poll_timeout_secs", &self.poll_timeout_secs)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
    /// Directory for the daily rolling log file; stdout only when unset
    #[serde(default)]
    pub directory: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            directory: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> std::result::Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> std::result::Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default values
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("database.max_connections", 5)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/live.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("SWINGBOT_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (SWINGBOT_VENUE__KIND, etc.)
            .add_source(
                Environment::with_prefix("SWINGBOT")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Fail fast on settings the controller cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.venue.symbol.trim().is_empty() {
            return Err(BotError::Validation("venue.symbol must be set".into()));
        }
        if self.venue.leverage == 0 {
            return Err(BotError::Validation("venue.leverage must be > 0".into()));
        }
        if !self.venue.credentials(self.venue.kind).is_complete() {
            return Err(BotError::Validation(format!(
                "api_key and api_secret are required for venue '{}'",
                self.venue.kind
            )));
        }
        if self.sizing.risk_per_trade_percent <= Decimal::ZERO {
            return Err(BotError::Validation(
                "sizing.risk_per_trade_percent must be > 0".into(),
            ));
        }
        if self.sizing.fixed_capital_inr <= Decimal::ZERO || self.sizing.inr_to_usdt <= Decimal::ZERO
        {
            return Err(BotError::Validation(
                "sizing.fixed_capital_inr and sizing.inr_to_usdt must be > 0".into(),
            ));
        }
        if self.trading.atr_period == 0 {
            return Err(BotError::Validation("trading.atr_period must be > 0".into()));
        }
        if self.trading.atr_trail_mult <= Decimal::ZERO {
            return Err(BotError::Validation(
                "trading.atr_trail_mult must be > 0".into(),
            ));
        }
        if self.strategy.entry_percent <= Decimal::ZERO
            || self.strategy.entry_percent > Decimal::ONE_HUNDRED
        {
            return Err(BotError::Validation(
                "strategy.entry_percent must be in (0, 100]".into(),
            ));
        }
        SessionTable::from_config(&self.strategy)?;
        if self.retry.max_attempts == 0 {
            return Err(BotError::Validation("retry.max_attempts must be >= 1".into()));
        }
        if !(0.0..100.0).contains(&self.retry.jitter_percent) {
            return Err(BotError::Validation(
                "retry.jitter_percent must be in [0, 100)".into(),
            ));
        }
        if self.scheduler.poll_step_secs == 0 {
            return Err(BotError::Validation(
                "scheduler.poll_step_secs must be > 0".into(),
            ));
        }
        if !matches!(
            self.logging.level.to_lowercase().as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        ) {
            return Err(BotError::Validation(format!(
                "logging.level must be trace/debug/info/warn/error, got {:?}",
                self.logging.level
            )));
        }
        Ok(())
    }

    /// Round-trip fee rate of the active venue
    pub fn fee_rate(&self) -> Decimal {
        self.fees.fee_rate(self.venue.kind)
    }
}
