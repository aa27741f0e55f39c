//! ATR trailing stop. Engages once price is 1R in profit, never trails
//! below breakeven and only ever tightens.

use rust_decimal::Decimal;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::domain::{BotState, Direction, OrderSide, TradeUpdate};
use crate::error::Result;
use crate::persistence::EventLevel;
use crate::strategy::simple_atr;

use super::context::{halt, BotContext, RuntimeState};

const PRICE_DP: u32 = 6;

#[derive(Debug, Clone, PartialEq)]
pub enum TrailOutcome {
    Unchanged,
    Moved { from: Decimal, to: Decimal },
    /// Old stop could not be cancelled; it stays in force
    CancelFailed,
    /// Old stop cancelled, new one rejected; trading halted
    Halted,
}

/// Candidate stop for `price`, or `None` when trailing does not apply.
///
/// Requires a favourable move of at least one risk unit
/// (`|entry - original_stop|`), clamps at breakeven and accepts only a
/// strict improvement over `current_stop`.
pub fn trail_candidate(
    direction: Direction,
    entry: Decimal,
    original_stop: Decimal,
    current_stop: Decimal,
    price: Decimal,
    atr: Decimal,
    mult: Decimal,
) -> Option<Decimal> {
    let one_r = (entry - original_stop).abs();
    if one_r.is_zero() || atr <= Decimal::ZERO {
        return None;
    }
    if direction.favorable_move(entry, price) < one_r {
        return None;
    }
    let distance = atr * mult;
    let candidate = match direction {
        Direction::Long => (price - distance).max(entry),
        Direction::Short => (price + distance).min(entry),
    }
    .round_dp(PRICE_DP);
    let improves = match direction {
        Direction::Long => candidate > current_stop,
        Direction::Short => candidate < current_stop,
    };
    improves.then_some(candidate)
}

pub async fn manage_trailing_stop(ctx: &BotContext, rt: &mut RuntimeState) -> Result<TrailOutcome> {
    if rt.state != BotState::Open {
        return Ok(TrailOutcome::Unchanged);
    }
    let Some(trade) = rt.position.clone() else {
        return Ok(TrailOutcome::Unchanged);
    };

    let candles = match ctx
        .candles
        .fetch_candles(ctx.symbol(), rt.profile.ltf_interval(), ctx.settings.candle_limit)
        .await
    {
        Ok(candles) => candles,
        Err(e) => {
            debug!(error = %e, "no candles for trailing");
            return Ok(TrailOutcome::Unchanged);
        }
    };
    let Some(atr) = simple_atr(&candles, ctx.settings.atr_period) else {
        return Ok(TrailOutcome::Unchanged);
    };
    let Some(price) = candles.last().map(|c| c.close) else {
        return Ok(TrailOutcome::Unchanged);
    };

    let Some(new_stop) = trail_candidate(
        trade.direction,
        trade.entry_price,
        trade.initial_stop_loss,
        trade.stop_loss,
        price,
        atr,
        ctx.settings.atr_trail_mult,
    ) else {
        return Ok(TrailOutcome::Unchanged);
    };
    let old_stop = trade.stop_loss;
    info!(from = %old_stop, to = %new_stop, %atr, %price, "trailing stop");

    if let Some(old_id) = trade.sl_order_id.as_deref() {
        let cancelled = match ctx.venue.cancel_order(ctx.symbol(), old_id).await {
            Ok(cancelled) => cancelled,
            Err(e) => {
                warn!(order_id = old_id, error = %e, "cancel of old stop failed");
                false
            }
        };
        if !cancelled {
            warn!(order_id = old_id, "old stop still in force, trailing aborted");
            ctx.audit(
                EventLevel::Warn,
                "trailing_cancel_failed",
                &format!("Could not cancel stop {}", old_id),
                None,
            )
            .await;
            return Ok(TrailOutcome::CancelFailed);
        }
    }

    let placed = ctx
        .venue
        .place_stop_order(
            ctx.symbol(),
            OrderSide::closing(trade.direction),
            trade.quantity,
            new_stop,
        )
        .await;
    let new_id = match &placed {
        Ok(r) => r.accepted_id().map(str::to_string),
        Err(_) => None,
    };
    let Some(new_id) = new_id else {
        let reason = match placed {
            Ok(r) => r.error_text().to_string(),
            Err(e) => e.to_string(),
        };
        halt(
            ctx,
            rt,
            "trailing_sl_failed",
            &format!(
                "TRAILING STOP PLACEMENT FAILED for {} {}\nOld stop {} was cancelled, new stop {} failed: {}",
                trade.symbol,
                trade.direction.as_str().to_uppercase(),
                old_stop,
                new_stop,
                reason
            ),
        )
        .await?;
        return Ok(TrailOutcome::Halted);
    };

    let update = TradeUpdate::moved_stop(new_stop, new_id.clone());
    ctx.ledger.update_trade(trade.id, &update).await?;
    if let Some(position) = rt.position.as_mut() {
        position.apply(&update);
    }

    ctx.notifier
        .send(&format!(
            "📐 <b>Trailing SL adjusted</b>\n\
             Old SL: <code>{:.6}</code>\n\
             New SL: <code>{:.6}</code>\n\
             ATR:    <code>{:.6}</code>\n\
             Price:  <code>{:.6}</code>",
            old_stop, new_stop, atr, price
        ))
        .await;
    ctx.audit(
        EventLevel::Info,
        "trailing_sl_moved",
        &format!("SL moved from {} to {}", old_stop, new_stop),
        Some(json!({
            "old_sl": old_stop.to_string(),
            "new_sl": new_stop.to_string(),
            "atr": atr.round_dp(PRICE_DP).to_string(),
            "sl_order_id": new_id,
        })),
    )
    .await;

    Ok(TrailOutcome::Moved {
        from: old_stop,
        to: new_stop,
    })
}
