//! Reconciliation of the tracked position against the venue.
//!
//! When the venue is flat the exit is classified from the protective
//! orders' fill data, then from where the last close sits between stop and
//! target, and finally recorded as `unknown` at the entry price.

use rust_decimal::Decimal;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::domain::{
    BotState, ExitReason, OrderStatusInfo, PnlBreakdown, TradeRecord, TradeStatus, TradeUpdate,
};
use crate::error::Result;
use crate::persistence::EventLevel;

use super::context::{BotContext, RuntimeState};

/// Candles fetched for the fallback exit price
const FALLBACK_CANDLES: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// Nothing tracked, or the venue could not be asked
    Skipped,
    StillOpen,
    Closed {
        reason: ExitReason,
        exit_price: Decimal,
    },
}

async fn order_status(ctx: &BotContext, order_id: Option<&str>) -> Option<OrderStatusInfo> {
    let order_id = order_id?;
    match ctx.venue.get_order_status(ctx.symbol(), order_id).await {
        Ok(status) => Some(status),
        Err(e) => {
            warn!(order_id, error = %e, "order status unavailable, treating as unknown");
            Some(OrderStatusInfo::unknown(order_id))
        }
    }
}

async fn cancel_if_open(ctx: &BotContext, status: Option<&OrderStatusInfo>, label: &str) {
    let Some(status) = status.filter(|s| s.is_open()) else {
        return;
    };
    match ctx.venue.cancel_order(ctx.symbol(), &status.order_id).await {
        Ok(cancelled) => info!(order_id = %status.order_id, cancelled, "cancelled orphaned {} order", label),
        Err(e) => warn!(order_id = %status.order_id, error = %e, "failed to cancel orphaned {} order", label),
    }
}

pub(crate) async fn last_close(ctx: &BotContext, rt: &RuntimeState) -> Option<Decimal> {
    match ctx
        .candles
        .fetch_candles(ctx.symbol(), rt.profile.ltf_interval(), FALLBACK_CANDLES)
        .await
    {
        Ok(candles) => candles
            .last()
            .map(|c| c.close)
            .filter(|p| *p > Decimal::ZERO),
        Err(e) => {
            warn!(error = %e, "no fallback price for exit classification");
            None
        }
    }
}

/// Exit nearest to `price`; a tie counts as the stop.
pub fn classify_by_proximity(trade: &TradeRecord, price: Decimal) -> ExitReason {
    if (price - trade.take_profit).abs() < (price - trade.stop_loss).abs() {
        ExitReason::TpHit
    } else {
        ExitReason::SlHit
    }
}

async fn resolve_exit(
    ctx: &BotContext,
    rt: &RuntimeState,
    trade: &TradeRecord,
) -> (ExitReason, Decimal) {
    let sl = order_status(ctx, trade.sl_order_id.as_deref()).await;
    let tp = order_status(ctx, trade.tp_order_id.as_deref()).await;

    if let Some(sl) = sl.as_ref().filter(|s| s.is_filled()) {
        cancel_if_open(ctx, tp.as_ref(), "target").await;
        return (ExitReason::SlHit, sl.fill_price.unwrap_or(trade.stop_loss));
    }
    if let Some(tp) = tp.as_ref().filter(|s| s.is_filled()) {
        cancel_if_open(ctx, sl.as_ref(), "stop").await;
        return (ExitReason::TpHit, tp.fill_price.unwrap_or(trade.take_profit));
    }

    cancel_if_open(ctx, sl.as_ref(), "stop").await;
    cancel_if_open(ctx, tp.as_ref(), "target").await;

    match last_close(ctx, rt).await {
        Some(price) => {
            let reason = classify_by_proximity(trade, price);
            warn!(%price, %reason, "exit inferred from last close");
            (reason, price)
        }
        None => {
            warn!(entry = %trade.entry_price, "exit unknown, booking at entry price");
            (ExitReason::Unknown, trade.entry_price)
        }
    }
}

pub async fn reconcile(ctx: &BotContext, rt: &mut RuntimeState) -> Result<ReconcileOutcome> {
    let Some(trade) = rt.position.clone().filter(|t| t.status == TradeStatus::Open) else {
        if rt.state == BotState::Open {
            warn!("OPEN without a tracked trade, returning to IDLE");
            rt.transition(BotState::Idle, "no tracked trade")?;
        }
        return Ok(ReconcileOutcome::Skipped);
    };

    let position = match ctx.venue.get_position(ctx.symbol()).await {
        Ok(position) => position,
        Err(e) => {
            warn!(error = %e, "position query failed, skipping reconciliation");
            ctx.audit(
                EventLevel::Warn,
                "reconcile_skip",
                &format!("get_position failed: {}", e),
                None,
            )
            .await;
            return Ok(ReconcileOutcome::Skipped);
        }
    };
    if position.is_open() {
        debug!(size = %position.size, "position still open");
        return Ok(ReconcileOutcome::StillOpen);
    }

    info!(trade_id = trade.id, "venue is flat, closing tracked trade");
    let (reason, exit_price) = resolve_exit(ctx, rt, &trade).await;
    let pnl = PnlBreakdown::compute(
        trade.direction,
        trade.entry_price,
        exit_price,
        trade.quantity,
        ctx.fee_rate_for(&trade.venue),
    );
    let update = TradeUpdate::closed(exit_price, reason, &pnl, ctx.clock.now());
    ctx.ledger.update_trade(trade.id, &update).await?;

    let mut closed = trade;
    closed.apply(&update);
    ctx.notifier.notify_close(&closed).await;
    ctx.audit(
        EventLevel::Info,
        "trade_closed",
        &format!("Trade {} closed via reconcile", closed.id),
        Some(json!({
            "exit_reason": reason.as_str(),
            "exit_price": exit_price.to_string(),
            "net_pnl": pnl.net.to_string(),
        })),
    )
    .await;

    rt.position = None;
    rt.transition(BotState::Idle, "position closed on venue")?;
    Ok(ReconcileOutcome::Closed { reason, exit_price })
}
