//! Controller-owned runtime state and the collaborators each component uses.

use rust_decimal::Decimal;
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::collector::CandleFeed;
use crate::config::{AppConfig, FeeConfig, TradingProfile};
use crate::domain::{BotState, TradeRecord};
use crate::error::{BotError, Result};
use crate::exchange::{VenueAdapter, VenueBuilder, VenueKind};
use crate::notify::Notifier;
use crate::persistence::{EventLevel, Ledger, HALT_STATE_KEY};

use super::scheduler::Clock;

/// Static settings the components read each cycle
#[derive(Debug, Clone)]
pub struct BotSettings {
    pub symbol: String,
    pub leverage: u32,
    pub fees: FeeConfig,
    pub trailing_enabled: bool,
    pub atr_period: usize,
    pub atr_trail_mult: Decimal,
    pub candle_limit: usize,
}

impl BotSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            symbol: config.venue.symbol.clone(),
            leverage: config.venue.leverage,
            fees: config.fees.clone(),
            trailing_enabled: config.trading.trailing_enabled,
            atr_period: config.trading.atr_period,
            atr_trail_mult: config.trading.atr_trail_mult,
            candle_limit: config.trading.candle_limit,
        }
    }
}

/// Injected collaborators. Replaced wholesale only by a venue switch.
pub struct BotContext {
    pub venue: Arc<dyn VenueAdapter>,
    /// Absent when runtime venue switches are not supported
    pub venue_builder: Option<VenueBuilder>,
    pub ledger: Arc<dyn Ledger>,
    pub notifier: Arc<dyn Notifier>,
    pub candles: Arc<dyn CandleFeed>,
    pub clock: Arc<dyn Clock>,
    pub settings: BotSettings,
}

impl BotContext {
    pub fn symbol(&self) -> &str {
        &self.settings.symbol
    }

    /// Round-trip fee rate for a trade opened on `venue` (the active venue
    /// when the stored name is not recognised)
    pub fn fee_rate_for(&self, venue: &str) -> Decimal {
        let kind = venue.parse::<VenueKind>().unwrap_or_else(|_| self.venue.kind());
        self.settings.fees.fee_rate(kind)
    }

    /// Write an audit event; a failing ledger is logged, never propagated.
    pub async fn audit(
        &self,
        level: EventLevel,
        event_type: &str,
        message: &str,
        context: Option<Value>,
    ) {
        if let Err(e) = self
            .ledger
            .log_event(level, event_type, message, context)
            .await
        {
            warn!(event_type, error = %e, "failed to write audit event");
        }
    }
}

/// Everything the controller believes about itself, owned by the loop and
/// lent to each component for the duration of one call.
#[derive(Debug, Clone)]
pub struct RuntimeState {
    pub state: BotState,
    /// Cleared by `kill`/`shutdown`; the loop exits at its next check
    pub running: bool,
    /// Operator pause; no cycles run while set
    pub paused: bool,
    pub profile: TradingProfile,
    /// In-memory mirror of the ledger's `open` trade
    pub position: Option<TradeRecord>,
    /// Next candle boundary at which a cycle is due (unix seconds)
    pub next_boundary: Option<i64>,
}

impl RuntimeState {
    pub fn new(profile: TradingProfile) -> Self {
        Self {
            state: BotState::Idle,
            running: true,
            paused: false,
            profile,
            position: None,
            next_boundary: None,
        }
    }

    /// Move to `to`, rejecting edges the state machine does not allow.
    /// A move to the current state is a no-op.
    pub fn transition(&mut self, to: BotState, reason: &str) -> Result<()> {
        if self.state == to {
            return Ok(());
        }
        if !self.state.can_transition_to(to) {
            return Err(BotError::InvalidStateTransition {
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }
        info!(from = %self.state, to = %to, reason, "state transition");
        self.state = to;
        Ok(())
    }
}

/// Unprotected exposure: alert CRITICAL, persist the halt, stop entries.
pub async fn halt(
    ctx: &BotContext,
    rt: &mut RuntimeState,
    event_type: &str,
    message: &str,
) -> Result<()> {
    error!(event_type, "{}", message);
    ctx.notifier
        .notify_critical(&format!(
            "{}\nMANUAL ACTION REQUIRED. Automated entries are paused; send /ack once resolved.",
            message
        ))
        .await;
    ctx.audit(EventLevel::Critical, event_type, message, None).await;
    if let Err(e) = ctx.ledger.set_state(HALT_STATE_KEY, message).await {
        error!(error = %e, "failed to persist halt flag");
    }
    rt.transition(BotState::ErrorPaused, event_type)
}
