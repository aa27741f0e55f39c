//! Operator commands received over the chat channel.

use rust_decimal::Decimal;
use serde_json::json;
use tracing::{info, warn};

use crate::config::TradingProfile;
use crate::domain::{BotState, CloseOutcome, ExitReason, PnlBreakdown, TradeUpdate};
use crate::error::{BotError, Result};
use crate::exchange::VenueKind;
use crate::notify::{format_status, format_trades, StatusView};
use crate::persistence::{EventLevel, HALT_STATE_KEY};

use super::context::{BotContext, RuntimeState};
use super::reconcile::{last_close, reconcile};

const DEFAULT_TRADES_LIMIT: u32 = 10;
const MAX_TRADES_LIMIT: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotCommand {
    Start,
    Stop,
    Status,
    Trades(u32),
    Kill,
    Shutdown,
    /// Clear an unprotected-exposure halt
    Ack,
    Profile(TradingProfile),
    Venue(VenueKind),
}

impl BotCommand {
    /// Parse `/cmd[@botname] [args]`. Unknown commands yield `None`.
    pub fn parse(text: &str) -> Option<Self> {
        let mut parts = text.split_whitespace();
        let head = parts.next()?;
        let name = head.strip_prefix('/').unwrap_or(head);
        let name = name.split('@').next().unwrap_or(name).to_lowercase();

        let cmd = match name.as_str() {
            "start" => BotCommand::Start,
            "stop" => BotCommand::Stop,
            "status" => BotCommand::Status,
            "trades" => {
                let limit = parts
                    .next()
                    .and_then(|n| n.parse::<u32>().ok())
                    .filter(|n| *n > 0)
                    .unwrap_or(DEFAULT_TRADES_LIMIT);
                BotCommand::Trades(limit.min(MAX_TRADES_LIMIT))
            }
            "kill" => BotCommand::Kill,
            "shutdown" => BotCommand::Shutdown,
            "ack" => BotCommand::Ack,
            "ltf5m" => BotCommand::Profile(TradingProfile::Ltf5m),
            "ltf15m" => BotCommand::Profile(TradingProfile::Ltf15m),
            "demo" => BotCommand::Venue(VenueKind::DeltaDemo),
            "live" => BotCommand::Venue(VenueKind::CoinSwitchLive),
            _ => return None,
        };
        Some(cmd)
    }
}

pub async fn handle(ctx: &mut BotContext, rt: &mut RuntimeState, cmd: BotCommand) -> Result<()> {
    info!(?cmd, state = %rt.state, "operator command");
    match cmd {
        BotCommand::Start => start(ctx, rt).await,
        BotCommand::Stop => {
            rt.paused = true;
            ctx.notifier
                .send("⏸ Bot paused. No new entries. Existing position unaffected.")
                .await;
            Ok(())
        }
        BotCommand::Status => status(ctx, rt).await,
        BotCommand::Trades(limit) => {
            let trades = ctx.ledger.get_recent_trades(limit).await?;
            ctx.notifier.send(&format_trades(&trades)).await;
            Ok(())
        }
        BotCommand::Kill => kill(ctx, rt).await,
        BotCommand::Shutdown => {
            rt.running = false;
            ctx.notifier
                .send("🛑 <b>Graceful shutdown.</b> Bot stopping after current cycle.")
                .await;
            Ok(())
        }
        BotCommand::Ack => ack(ctx, rt).await,
        BotCommand::Profile(profile) => switch_profile(ctx, rt, profile).await,
        BotCommand::Venue(kind) => switch_venue(ctx, rt, kind).await,
    }
}

async fn start(ctx: &BotContext, rt: &mut RuntimeState) -> Result<()> {
    rt.paused = false;
    if rt.state == BotState::ErrorPaused {
        ctx.notifier
            .send("▶️ Pause cleared, but the bot is still <b>ERROR_PAUSED</b>. Resolve the position and send /ack to resume entries.")
            .await;
    } else {
        ctx.notifier.send("▶️ Bot resumed. Cycles active.").await;
    }
    Ok(())
}

async fn ack(ctx: &BotContext, rt: &mut RuntimeState) -> Result<()> {
    if rt.state != BotState::ErrorPaused {
        ctx.notifier.send("ℹ️ Nothing to acknowledge.").await;
        return Ok(());
    }
    ctx.ledger.clear_state(HALT_STATE_KEY).await?;
    let next = if rt.position.is_some() {
        BotState::Open
    } else {
        BotState::Idle
    };
    rt.transition(next, "operator acknowledged halt")?;
    ctx.audit(EventLevel::Info, "halt_acknowledged", "Operator cleared halt", None)
        .await;
    ctx.notifier
        .send(&format!("✅ Halt cleared. State: <b>{}</b>", rt.state))
        .await;
    Ok(())
}

async fn status(ctx: &BotContext, rt: &RuntimeState) -> Result<()> {
    let position = match ctx.venue.get_position(ctx.symbol()).await {
        Ok(position) => Some(position),
        Err(e) => {
            warn!(error = %e, "position unavailable for status");
            None
        }
    };
    let view = StatusView {
        state: rt.state,
        running: rt.running && !rt.paused,
        profile: rt.profile.as_str(),
        venue: ctx.venue.kind().as_str(),
        symbol: ctx.symbol(),
        leverage: ctx.settings.leverage,
        position: position.as_ref(),
        trade: rt.position.as_ref(),
    };
    ctx.notifier.send(&format_status(&view)).await;
    Ok(())
}

fn has_exposure(rt: &RuntimeState) -> bool {
    rt.state == BotState::Open || rt.position.is_some()
}

async fn switch_profile(ctx: &BotContext, rt: &mut RuntimeState, profile: TradingProfile) -> Result<()> {
    if has_exposure(rt) {
        ctx.notifier
            .send("❌ Cannot switch profile while position is open.")
            .await;
        return Ok(());
    }
    rt.profile = profile;
    rt.next_boundary = None;
    info!(%profile, "profile switched");
    ctx.notifier
        .send(&format!("✅ Profile switched to <b>{}</b>.", profile))
        .await;
    Ok(())
}

async fn switch_venue(ctx: &mut BotContext, rt: &RuntimeState, kind: VenueKind) -> Result<()> {
    if has_exposure(rt) {
        ctx.notifier
            .send("❌ Cannot switch exchange while position is open.")
            .await;
        return Ok(());
    }
    let Some(builder) = ctx.venue_builder.clone() else {
        ctx.notifier
            .send("❌ Venue switching is not available in this deployment.")
            .await;
        return Ok(());
    };
    let venue = builder(kind)?;
    venue
        .set_leverage(ctx.symbol(), ctx.settings.leverage)
        .await?;
    ctx.venue = venue;
    info!(venue = %kind, "venue switched");
    ctx.audit(
        EventLevel::Info,
        "venue_switched",
        &format!("Venue switched to {}", kind),
        None,
    )
    .await;
    ctx.notifier
        .send(&format!("✅ Switched to <b>{}</b> exchange.", kind))
        .await;
    Ok(())
}

async fn kill(ctx: &BotContext, rt: &mut RuntimeState) -> Result<()> {
    let prior = rt.state;
    rt.transition(BotState::Closing, "manual kill")?;

    let outcome = match ctx.venue.close_position(ctx.symbol()).await {
        Ok(CloseOutcome::Submitted(result)) if !result.success => {
            Err(BotError::Venue(result.error_text().to_string()))
        }
        other => other,
    };

    match outcome {
        Err(e) => {
            warn!(error = %e, "kill failed");
            ctx.notifier
                .send(&format!("❌ <b>Kill failed:</b> {}", e))
                .await;
            rt.transition(prior, "kill failed")?;
            return Ok(());
        }
        Ok(CloseOutcome::Flat) => {
            ctx.notifier
                .send("ℹ️ <b>Kill:</b> No open position found on exchange.")
                .await;
            if rt.position.is_some() {
                // venue already flat; book whatever the protective orders did
                rt.transition(BotState::Open, "kill found venue flat")?;
                reconcile(ctx, rt).await?;
            }
        }
        Ok(CloseOutcome::Submitted(result)) => {
            ctx.notifier
                .send(&format!(
                    "✅ <b>Kill:</b> Close order sent.\nOrder ID: <code>{}</code>",
                    result.order_id.as_deref().unwrap_or("-")
                ))
                .await;
            if let Some(trade) = rt.position.clone() {
                for order_id in [trade.sl_order_id.as_deref(), trade.tp_order_id.as_deref()]
                    .into_iter()
                    .flatten()
                {
                    if let Err(e) = ctx.venue.cancel_order(ctx.symbol(), order_id).await {
                        warn!(order_id, error = %e, "failed to cancel protective order after kill");
                    }
                }

                let exit_price = match result.fill_price.filter(|p| *p > Decimal::ZERO) {
                    Some(price) => price,
                    None => last_close(ctx, rt).await.unwrap_or(trade.entry_price),
                };
                let pnl = PnlBreakdown::compute(
                    trade.direction,
                    trade.entry_price,
                    exit_price,
                    trade.quantity,
                    ctx.fee_rate_for(&trade.venue),
                );
                let update =
                    TradeUpdate::closed(exit_price, ExitReason::ManualKill, &pnl, ctx.clock.now());
                ctx.ledger.update_trade(trade.id, &update).await?;

                let mut closed = trade;
                closed.apply(&update);
                ctx.notifier.notify_close(&closed).await;
                ctx.audit(
                    EventLevel::Info,
                    "trade_killed",
                    &format!("Trade {} closed by manual kill", closed.id),
                    Some(json!({
                        "exit_price": exit_price.to_string(),
                        "net_pnl": pnl.net.to_string(),
                    })),
                )
                .await;
                rt.position = None;
            }
        }
    }

    if rt.position.is_none() {
        rt.transition(BotState::Idle, "kill complete")?;
    }
    rt.running = false;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::context::halt;
    use crate::bot::entry::execute_entry;
    use crate::bot::test_support::*;
    use crate::domain::{OrderResult, TradeStatus};
    use crate::exchange::{VenueAdapter, VenueBuilder};
    use crate::persistence::Ledger;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    async fn opened(h: &Harness) -> (BotContext, RuntimeState) {
        let ctx = h.context();
        let mut rt = RuntimeState::new(TradingProfile::Ltf5m);
        execute_entry(&ctx, &mut rt, &long_signal(), &sizing(dec!(5)))
            .await
            .unwrap();
        (ctx, rt)
    }

    #[test]
    fn parses_commands_with_prefix_and_mentions() {
        assert_eq!(BotCommand::parse("/start"), Some(BotCommand::Start));
        assert_eq!(BotCommand::parse("/STATUS@swing_bot"), Some(BotCommand::Status));
        assert_eq!(BotCommand::parse("/trades 3"), Some(BotCommand::Trades(3)));
        assert_eq!(BotCommand::parse("/trades abc"), Some(BotCommand::Trades(10)));
        assert_eq!(BotCommand::parse("/trades 5000"), Some(BotCommand::Trades(100)));
        assert_eq!(
            BotCommand::parse("ltf15m"),
            Some(BotCommand::Profile(TradingProfile::Ltf15m))
        );
        assert_eq!(
            BotCommand::parse("/live"),
            Some(BotCommand::Venue(VenueKind::CoinSwitchLive))
        );
        assert_eq!(BotCommand::parse("/moon"), None);
        assert_eq!(BotCommand::parse("   "), None);
    }

    #[tokio::test]
    async fn stop_and_start_toggle_pause_only() {
        let h = Harness::new().await;
        let (mut ctx, mut rt) = opened(&h).await;

        handle(&mut ctx, &mut rt, BotCommand::Stop).await.unwrap();
        assert!(rt.paused);
        assert_eq!(rt.state, BotState::Open);
        assert!(h.venue.calls_starting_with("cancel").is_empty());

        handle(&mut ctx, &mut rt, BotCommand::Start).await.unwrap();
        assert!(!rt.paused);
        assert!(h.notifier.any_contains("Bot resumed"));
    }

    #[tokio::test]
    async fn start_does_not_clear_error_pause() {
        let h = Harness::new().await;
        let (mut ctx, mut rt) = opened(&h).await;
        halt(&ctx, &mut rt, "trailing_sl_failed", "stop gone").await.unwrap();

        handle(&mut ctx, &mut rt, BotCommand::Start).await.unwrap();
        assert_eq!(rt.state, BotState::ErrorPaused);
        assert!(h.notifier.any_contains("still <b>ERROR_PAUSED</b>"));

        handle(&mut ctx, &mut rt, BotCommand::Ack).await.unwrap();
        assert_eq!(rt.state, BotState::Open);
        assert_eq!(h.ledger.get_state(HALT_STATE_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn ack_without_position_returns_to_idle() {
        let h = Harness::new().await;
        let mut ctx = h.context();
        let mut rt = RuntimeState::new(TradingProfile::Ltf5m);
        rt.transition(BotState::PendingEntry, "test").unwrap();
        halt(&ctx, &mut rt, "sl_placement_failed", "naked").await.unwrap();

        handle(&mut ctx, &mut rt, BotCommand::Ack).await.unwrap();
        assert_eq!(rt.state, BotState::Idle);
    }

    #[tokio::test]
    async fn status_reports_unavailable_position() {
        let h = Harness::new().await;
        let mut ctx = h.context();
        let mut rt = RuntimeState::new(TradingProfile::Ltf15m);
        h.venue.fail_position_query();

        handle(&mut ctx, &mut rt, BotCommand::Status).await.unwrap();
        let msg = h.notifier.messages().pop().unwrap();
        assert!(msg.contains("IDLE"));
        assert!(msg.contains("ltf_15m"));
        assert!(msg.contains("unavailable"));
    }

    #[tokio::test]
    async fn trades_lists_ledger_rows() {
        let h = Harness::new().await;
        let (mut ctx, mut rt) = opened(&h).await;

        handle(&mut ctx, &mut rt, BotCommand::Trades(5)).await.unwrap();
        assert!(h.notifier.any_contains("Recent Trades"));
        assert!(h.notifier.any_contains("⏳"));
    }

    #[tokio::test]
    async fn switches_rejected_while_open() {
        let h = Harness::new().await;
        let (mut ctx, mut rt) = opened(&h).await;

        handle(&mut ctx, &mut rt, BotCommand::Profile(TradingProfile::Ltf15m))
            .await
            .unwrap();
        handle(&mut ctx, &mut rt, BotCommand::Venue(VenueKind::CoinSwitchLive))
            .await
            .unwrap();

        assert_eq!(rt.profile, TradingProfile::Ltf5m);
        assert_eq!(ctx.venue.kind(), VenueKind::DeltaDemo);
        assert!(h.notifier.any_contains("Cannot switch profile"));
        assert!(h.notifier.any_contains("Cannot switch exchange"));
    }

    #[tokio::test]
    async fn profile_switch_applies_immediately() {
        let h = Harness::new().await;
        let mut ctx = h.context();
        let mut rt = RuntimeState::new(TradingProfile::Ltf5m);
        rt.next_boundary = Some(1_700_000_100);

        handle(&mut ctx, &mut rt, BotCommand::Profile(TradingProfile::Ltf15m))
            .await
            .unwrap();
        assert_eq!(rt.profile, TradingProfile::Ltf15m);
        assert_eq!(rt.next_boundary, None);
    }

    #[tokio::test]
    async fn venue_switch_uses_builder_and_sets_leverage() {
        let h = Harness::new().await;
        let mut ctx = h.context();
        let live = FakeVenue::of_kind(VenueKind::CoinSwitchLive);
        let built = live.clone();
        let builder: VenueBuilder = Arc::new(move |_: VenueKind| -> Result<Arc<dyn VenueAdapter>> {
            Ok(built.clone())
        });
        ctx.venue_builder = Some(builder);
        let mut rt = RuntimeState::new(TradingProfile::Ltf5m);

        handle(&mut ctx, &mut rt, BotCommand::Venue(VenueKind::CoinSwitchLive))
            .await
            .unwrap();
        assert_eq!(ctx.venue.kind(), VenueKind::CoinSwitchLive);
        assert_eq!(live.calls(), vec!["leverage ADAUSDT 3"]);
    }

    #[tokio::test]
    async fn failed_venue_switch_keeps_old_venue() {
        let h = Harness::new().await;
        let mut ctx = h.context();
        let live = FakeVenue::of_kind(VenueKind::CoinSwitchLive);
        live.fail_leverage();
        let built = live.clone();
        let builder: VenueBuilder = Arc::new(move |_: VenueKind| -> Result<Arc<dyn VenueAdapter>> {
            Ok(built.clone())
        });
        ctx.venue_builder = Some(builder);
        let mut rt = RuntimeState::new(TradingProfile::Ltf5m);

        tokio_test::assert_err!(
            handle(&mut ctx, &mut rt, BotCommand::Venue(VenueKind::CoinSwitchLive)).await
        );
        assert_eq!(ctx.venue.kind(), VenueKind::DeltaDemo);
    }

    #[tokio::test]
    async fn kill_closes_trade_as_manual_kill_and_stops_loop() {
        let h = Harness::new().await;
        let (mut ctx, mut rt) = opened(&h).await;
        h.venue.queue_close(Ok(CloseOutcome::Submitted(OrderResult::accepted(
            "close-1",
            Some(dec!(101)),
            Some(dec!(5)),
        ))));

        handle(&mut ctx, &mut rt, BotCommand::Kill).await.unwrap();

        assert!(!rt.running);
        assert_eq!(rt.state, BotState::Idle);
        assert!(rt.position.is_none());
        assert!(h.ledger.get_open_trade().await.unwrap().is_none());
        let trade = h.ledger.get_recent_trades(1).await.unwrap().remove(0);
        assert_eq!(trade.status, TradeStatus::Closed);
        assert_eq!(trade.exit_reason, Some(ExitReason::ManualKill));
        assert_eq!(trade.exit_price, Some(dec!(101)));
        // gross 5, fees 101 * 5 * 0.0004
        assert_eq!(trade.net_pnl, Some(dec!(4.798)));
        assert_eq!(h.venue.calls_starting_with("cancel"), vec!["cancel sl-2", "cancel tp-3"]);
    }

    #[tokio::test]
    async fn kill_failure_reverts_state() {
        let h = Harness::new().await;
        let (mut ctx, mut rt) = opened(&h).await;
        h.venue
            .queue_close(Ok(CloseOutcome::Submitted(OrderResult::rejected("margin lock"))));

        handle(&mut ctx, &mut rt, BotCommand::Kill).await.unwrap();

        assert!(rt.running);
        assert_eq!(rt.state, BotState::Open);
        assert!(h.notifier.any_contains("Kill failed"));
        assert!(h.ledger.get_open_trade().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn kill_flattens_untracked_position_after_stop_failure() {
        let h = Harness::new().await;
        let mut ctx = h.context();
        let mut rt = RuntimeState::new(TradingProfile::Ltf5m);
        h.venue.queue_stop(Ok(OrderResult::rejected("reduce-only rejected")));
        execute_entry(&ctx, &mut rt, &long_signal(), &sizing(dec!(5)))
            .await
            .unwrap();
        assert_eq!(rt.state, BotState::ErrorPaused);
        assert!(rt.position.is_none());
        h.venue.queue_close(Ok(CloseOutcome::Submitted(OrderResult::accepted(
            "close-9",
            Some(dec!(99.8)),
            Some(dec!(5)),
        ))));

        handle(&mut ctx, &mut rt, BotCommand::Kill).await.unwrap();

        assert_eq!(rt.state, BotState::Idle);
        assert!(!rt.running);
        assert_eq!(h.venue.calls_starting_with("close"), vec!["close ADAUSDT"]);
        assert!(h.venue.calls_starting_with("cancel").is_empty());
        assert!(h.notifier.any_contains("Close order sent"));
        // the halt outlives the kill until acknowledged
        assert!(h.ledger.get_state(HALT_STATE_KEY).await.unwrap().is_some());
        assert!(h.ledger.get_recent_trades(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn kill_when_flat_stops_loop() {
        let h = Harness::new().await;
        let mut ctx = h.context();
        let mut rt = RuntimeState::new(TradingProfile::Ltf5m);

        handle(&mut ctx, &mut rt, BotCommand::Kill).await.unwrap();
        assert!(!rt.running);
        assert_eq!(rt.state, BotState::Idle);
        assert!(h.notifier.any_contains("No open position"));
    }

    #[tokio::test]
    async fn shutdown_clears_running() {
        let h = Harness::new().await;
        let mut ctx = h.context();
        let mut rt = RuntimeState::new(TradingProfile::Ltf5m);

        handle(&mut ctx, &mut rt, BotCommand::Shutdown).await.unwrap();
        assert!(!rt.running);
        assert_eq!(rt.state, BotState::Idle);
    }
}
