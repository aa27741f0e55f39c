//! UTC trading session windows and their reward/risk targets.

use chrono::{DateTime, NaiveTime, Utc};
use rust_decimal::Decimal;

use crate::config::StrategyConfig;
use crate::error::{BotError, Result};

/// Parse an `HH:MM` UTC time of day
pub fn parse_hhmm(value: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M")
        .map_err(|e| BotError::Validation(format!("invalid session time {:?}: {}", value, e)))
}

/// Half-open `[start, end)` window within one UTC day
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl SessionWindow {
    pub fn parse(start: &str, end: &str) -> Result<Self> {
        Ok(Self {
            start: parse_hhmm(start)?,
            end: parse_hhmm(end)?,
        })
    }

    pub fn contains(&self, t: NaiveTime) -> bool {
        self.start <= t && t < self.end
    }
}

/// Session windows with their RR, in precedence order
#[derive(Debug, Clone)]
pub struct SessionTable {
    windows: Vec<(&'static str, SessionWindow, Decimal)>,
    session_only: bool,
    fallback_rr: Decimal,
}

impl SessionTable {
    pub fn from_config(cfg: &StrategyConfig) -> Result<Self> {
        Ok(Self {
            windows: vec![
                (
                    "overlap",
                    SessionWindow::parse(&cfg.overlap_start_utc, &cfg.overlap_end_utc)?,
                    cfg.rr_overlap,
                ),
                (
                    "ny",
                    SessionWindow::parse(&cfg.ny_peak_start_utc, &cfg.ny_peak_end_utc)?,
                    cfg.rr_ny,
                ),
                (
                    "london",
                    SessionWindow::parse(&cfg.london_peak_start_utc, &cfg.london_peak_end_utc)?,
                    cfg.rr_london,
                ),
            ],
            session_only: cfg.session_only_trading,
            fallback_rr: cfg.rr_london,
        })
    }

    /// RR target at `now`, or `None` outside every window when trading is
    /// limited to sessions. Overlap wins over NY, NY over London.
    pub fn rr_at(&self, now: DateTime<Utc>) -> Option<Decimal> {
        if !self.session_only {
            return Some(self.fallback_rr);
        }
        let t = now.time();
        self.windows
            .iter()
            .find(|(_, window, _)| window.contains(t))
            .map(|(_, _, rr)| *rr)
    }

    /// Name of the window active at `now`
    pub fn session_at(&self, now: DateTime<Utc>) -> Option<&'static str> {
        let t = now.time();
        self.windows
            .iter()
            .find(|(_, window, _)| window.contains(t))
            .map(|(name, _, _)| *name)
    }
}
