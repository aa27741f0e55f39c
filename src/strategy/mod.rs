//! Signal generation and position sizing.
//!
//! The controller only sees the two seams below; everything else in this
//! module is one concrete strategy behind them.

pub mod bias;
pub mod indicators;
pub mod session;
pub mod sizing;
pub mod swing;

pub use bias::{compute_bias, Bias};
pub use indicators::{ewm_atr, simple_atr, true_ranges};
pub use session::{parse_hhmm, SessionTable, SessionWindow};
pub use sizing::FixedCapitalSizer;
pub use swing::{build_signal, find_active_fvg, find_displacement, FairValueGap, SetupParams, SwingSignalEngine};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::TradingProfile;
use crate::domain::{Signal, SizingResult};
use crate::error::Result;
use crate::exchange::VenueKind;

/// Produces at most one entry idea per cycle
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SignalSource: Send + Sync {
    async fn next_signal(
        &self,
        profile: TradingProfile,
        now: DateTime<Utc>,
    ) -> Result<Option<Signal>>;
}

/// Turns a signal into an order quantity for a venue
#[cfg_attr(test, mockall::automock)]
pub trait PositionSizer: Send + Sync {
    fn size(&self, signal: &Signal, venue: VenueKind) -> Result<SizingResult>;
}
