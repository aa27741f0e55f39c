//! The trading loop: commands, candle-boundary scheduling and one
//! reconcile / trail / enter cycle per closed candle.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::adapters::{SqliteLedger, TelegramCommandSource, TelegramNotifier};
use crate::collector::{CandleFeed, FuturesCandleFeed};
use crate::config::{AppConfig, SchedulerConfig, TradingProfile};
use crate::domain::BotState;
use crate::error::{BotError, Result};
use crate::exchange::{build_venue, venue_builder};
use crate::notify::{CommandSource, LogNotifier, NoCommands, Notifier};
use crate::persistence::{EventLevel, HALT_STATE_KEY};
use crate::strategy::{FixedCapitalSizer, PositionSizer, SignalSource, SwingSignalEngine};

use super::commands::{self, BotCommand};
use super::context::{BotContext, BotSettings, RuntimeState};
use super::entry::execute_entry;
use super::reconcile::reconcile;
use super::scheduler::{missed, next_boundary_after, until, wait_or_shutdown, SystemClock};
use super::trailing::manage_trailing_stop;

pub struct TradingBot {
    ctx: BotContext,
    rt: RuntimeState,
    commands: Arc<dyn CommandSource>,
    signals: Arc<dyn SignalSource>,
    sizer: Arc<dyn PositionSizer>,
    scheduler: SchedulerConfig,
}

impl TradingBot {
    pub fn new(
        ctx: BotContext,
        profile: TradingProfile,
        commands: Arc<dyn CommandSource>,
        signals: Arc<dyn SignalSource>,
        sizer: Arc<dyn PositionSizer>,
        scheduler: SchedulerConfig,
    ) -> Self {
        Self {
            ctx,
            rt: RuntimeState::new(profile),
            commands,
            signals,
            sizer,
            scheduler,
        }
    }

    pub fn runtime(&self) -> &RuntimeState {
        &self.rt
    }

    pub fn state(&self) -> BotState {
        self.rt.state
    }

    /// Set leverage, recover state from the ledger and announce the start.
    /// A leverage failure aborts startup.
    pub async fn startup(&mut self) -> Result<()> {
        info!(
            profile = %self.rt.profile,
            venue = %self.ctx.venue.kind(),
            symbol = self.ctx.symbol(),
            "bot starting"
        );
        if let Err(e) = self
            .ctx
            .venue
            .set_leverage(self.ctx.symbol(), self.ctx.settings.leverage)
            .await
        {
            error!(error = %e, "failed to set leverage, aborting");
            return Err(e);
        }

        self.recover().await?;

        self.ctx
            .notifier
            .send(&format!(
                "🚀 <b>Bot started</b>\n\
                 Profile: <code>{}</code>\n\
                 Exchange: <code>{}</code>\n\
                 Symbol: <code>{}</code>\n\
                 State: <code>{}</code>",
                self.rt.profile,
                self.ctx.venue.kind(),
                self.ctx.symbol(),
                self.rt.state
            ))
            .await;
        Ok(())
    }

    async fn recover(&mut self) -> Result<()> {
        if let Some(trade) = self.ctx.ledger.get_open_trade().await? {
            info!(trade_id = trade.id, direction = %trade.direction.as_str(), "recovering open trade");
            self.rt.position = Some(trade);
            self.rt.state = BotState::Open;
        }
        if let Some(reason) = self.ctx.ledger.get_state(HALT_STATE_KEY).await? {
            warn!(%reason, "halt carried over from previous run");
            self.rt.state = BotState::ErrorPaused;
            self.ctx
                .notifier
                .notify_critical(&format!(
                    "Restarted while halted: {}\nAutomated entries stay paused until /ack.",
                    reason
                ))
                .await;
        }
        Ok(())
    }

    /// Run until `shutdown` flips, or a `kill`/`shutdown` command arrives.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        self.startup().await?;
        let clock = self.ctx.clock.clone();

        while self.rt.running {
            self.process_commands().await;
            if !self.rt.running {
                break;
            }

            if self.rt.paused {
                // rescheduled from the wall clock on resume
                self.rt.next_boundary = None;
                let pause = Duration::from_secs(self.scheduler.pause_poll_secs);
                if wait_or_shutdown(clock.as_ref(), &mut shutdown, pause).await {
                    break;
                }
                continue;
            }

            let cycle_secs = self.rt.profile.cycle_secs();
            let poll_step = Duration::from_secs(self.scheduler.poll_step_secs);
            let now = clock.now();
            let boundary = match self.rt.next_boundary {
                Some(boundary) if !missed(now, boundary, poll_step) => boundary,
                stale => {
                    if let Some(stale) = stale {
                        warn!(missed = stale, "candle boundary passed while busy, rescheduling");
                    }
                    let next = next_boundary_after(now, cycle_secs);
                    self.rt.next_boundary = Some(next);
                    next
                }
            };
            let remaining = until(now, boundary);
            if !remaining.is_zero() {
                let step = remaining.min(poll_step);
                if wait_or_shutdown(clock.as_ref(), &mut shutdown, step).await {
                    break;
                }
                continue;
            }

            debug!(boundary, "candle boundary reached");
            let settle = Duration::from_secs(self.scheduler.candle_close_buffer_secs);
            if wait_or_shutdown(clock.as_ref(), &mut shutdown, settle).await {
                break;
            }
            self.rt.next_boundary = Some(next_boundary_after(clock.now(), cycle_secs));
            self.run_cycle_guarded().await;
        }

        info!(state = %self.rt.state, "trading loop stopped");
        self.ctx.notifier.send("🛑 Bot stopped.").await;
        Ok(())
    }

    async fn process_commands(&mut self) {
        for text in self.commands.poll().await {
            let Some(cmd) = BotCommand::parse(&text) else {
                debug!(text = %text, "ignoring unknown command");
                continue;
            };
            if let Err(e) = commands::handle(&mut self.ctx, &mut self.rt, cmd).await {
                warn!(?cmd, error = %e, "command failed");
                self.ctx
                    .notifier
                    .send(&format!(
                        "❌ Command <code>{}</code> failed: {}",
                        text.trim(),
                        e
                    ))
                    .await;
            }
        }
    }

    /// One cycle; failures are recorded and alerted, never propagated.
    pub async fn run_cycle_guarded(&mut self) {
        if let Err(e) = self.run_cycle().await {
            error!(error = %e, state = %self.rt.state, "cycle failed");
            self.ctx
                .audit(EventLevel::Error, "cycle_error", &e.to_string(), None)
                .await;
            self.ctx
                .notifier
                .notify_error(&format!("Cycle error: {}", e))
                .await;
        }
    }

    pub async fn run_cycle(&mut self) -> Result<()> {
        let now = self.ctx.clock.now();
        info!(state = %self.rt.state, profile = %self.rt.profile, at = %now, "cycle");

        if self.rt.state == BotState::Open {
            reconcile(&self.ctx, &mut self.rt).await?;
            if self.rt.state != BotState::Open {
                // closed this cycle; no re-entry on the same candle
                return Ok(());
            }
            if self.ctx.settings.trailing_enabled {
                manage_trailing_stop(&self.ctx, &mut self.rt).await?;
            }
            return Ok(());
        }

        if self.rt.state.accepts_entries() {
            self.signal_and_enter(now).await?;
        }
        Ok(())
    }

    async fn signal_and_enter(&mut self, now: DateTime<Utc>) -> Result<()> {
        let signal = match self.signals.next_signal(self.rt.profile, now).await {
            Ok(Some(signal)) => signal,
            Ok(None) => {
                debug!("no setup this cycle");
                return Ok(());
            }
            Err(BotError::MarketDataUnavailable(msg)) => {
                warn!(%msg, "market data unavailable, skipping cycle");
                self.ctx
                    .audit(EventLevel::Warn, "data_unavailable", &msg, None)
                    .await;
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        info!(
            signal_id = %signal.signal_id,
            direction = signal.direction.as_str(),
            entry = %signal.entry_price,
            stop = %signal.stop_loss,
            target = %signal.take_profit,
            rr = %signal.rr_ratio,
            reason = %signal.reason,
            "signal generated"
        );

        let sizing = match self.sizer.size(&signal, self.ctx.venue.kind()) {
            Ok(sizing) => sizing,
            Err(BotError::Validation(msg)) => {
                warn!(%msg, "sizing rejected signal");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let outcome = execute_entry(&self.ctx, &mut self.rt, &signal, &sizing).await?;
        debug!(?outcome, "entry pipeline finished");
        Ok(())
    }
}

/// Wire the production collaborators from configuration.
pub async fn build_bot(config: &AppConfig) -> Result<TradingBot> {
    let ledger = SqliteLedger::connect(&config.database.url, config.database.max_connections).await?;
    ledger.migrate().await?;

    let (notifier, command_source): (Arc<dyn Notifier>, Arc<dyn CommandSource>) =
        match (&config.telegram.bot_token, &config.telegram.chat_id) {
            (Some(token), Some(chat_id)) if config.telegram.is_configured() => (
                Arc::new(TelegramNotifier::new(token, chat_id)),
                Arc::new(TelegramCommandSource::new(
                    token,
                    chat_id,
                    config.telegram.poll_timeout_secs,
                )?),
            ),
            _ => {
                warn!("telegram not configured; alerts go to the log and no commands are read");
                (Arc::new(LogNotifier), Arc::new(NoCommands))
            }
        };

    let candles: Arc<dyn CandleFeed> =
        Arc::new(FuturesCandleFeed::new(config.venue.delta.base_url.as_deref())?);
    let signals = Arc::new(SwingSignalEngine::new(
        candles.clone(),
        config.venue.symbol.clone(),
        &config.trading,
        config.strategy.clone(),
    )?);
    let sizer = Arc::new(FixedCapitalSizer::new(
        config.sizing.clone(),
        config.fees.clone(),
        config.venue.leverage,
    ));

    let ctx = BotContext {
        venue: build_venue(config)?,
        venue_builder: Some(venue_builder(config)),
        ledger: Arc::new(ledger),
        notifier,
        candles,
        clock: Arc::new(SystemClock),
        settings: BotSettings::from_config(config),
    };

    Ok(TradingBot::new(
        ctx,
        config.trading.profile,
        command_source,
        signals,
        sizer,
        config.scheduler.clone(),
    ))
}
