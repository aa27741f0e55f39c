//! Entry execution: market order, then protective stop, then target.
//!
//! The stop is placed before the target. A position without a stop is the
//! one failure that halts automated trading.

use rust_decimal::Decimal;
use serde_json::json;
use tracing::{error, info, warn};

use crate::domain::{BotState, NewTrade, OrderResult, OrderSide, Signal, SizingResult, TradeRecord};
use crate::error::Result;
use crate::persistence::EventLevel;

use super::context::{halt, BotContext, RuntimeState};

/// How far the pipeline got
#[derive(Debug, Clone, PartialEq)]
pub enum EntryOutcome {
    /// Position live, protected and recorded under this ledger id
    Opened(i64),
    /// Entry order failed; nothing is exposed
    Rejected,
    /// Exposure exists without a recorded stop; trading is halted
    Halted,
}

/// Failure text for an order call that did not yield an order id
fn order_failure(result: &Result<OrderResult>) -> Option<String> {
    match result {
        Ok(r) if r.accepted_id().is_some() => None,
        Ok(r) => Some(r.error_text().to_string()),
        Err(e) => Some(e.to_string()),
    }
}

fn accepted_id(result: &Result<OrderResult>) -> Option<String> {
    result
        .as_ref()
        .ok()
        .and_then(|r| r.accepted_id())
        .map(str::to_string)
}

pub async fn execute_entry(
    ctx: &BotContext,
    rt: &mut RuntimeState,
    signal: &Signal,
    sizing: &SizingResult,
) -> Result<EntryOutcome> {
    let symbol = ctx.symbol().to_string();
    let direction = signal.direction;
    let entry_side = OrderSide::opening(direction);
    let exit_side = OrderSide::closing(direction);

    rt.transition(BotState::PendingEntry, "signal accepted")?;

    // 1. market entry
    let entry = ctx
        .venue
        .place_market_order(&symbol, entry_side, sizing.quantity, false)
        .await;
    let (entry_order_id, fill_price, filled_qty) = match (&entry, order_failure(&entry)) {
        (Ok(r), None) => (
            r.accepted_id().unwrap_or_default().to_string(),
            r.fill_price.filter(|p| *p > Decimal::ZERO),
            r.filled_quantity.filter(|q| *q > Decimal::ZERO),
        ),
        (_, failure) => {
            let reason = failure.unwrap_or_default();
            error!(%symbol, %direction, reason = %reason, "entry order failed");
            ctx.notifier
                .notify_error(&format!("Entry order failed: {}", reason))
                .await;
            ctx.audit(
                EventLevel::Error,
                "entry_failed",
                &format!("Entry order failed: {}", reason),
                Some(json!({ "signal_id": signal.signal_id })),
            )
            .await;
            rt.transition(BotState::Idle, "entry order failed")?;
            return Ok(EntryOutcome::Rejected);
        }
    };
    let entry_price = fill_price.unwrap_or(signal.entry_price);
    let quantity = filled_qty.unwrap_or(sizing.quantity);
    info!(order_id = %entry_order_id, %entry_price, %quantity, "entry order placed");

    // 2. protective stop, sized to what was filled
    let stop = ctx
        .venue
        .place_stop_order(&symbol, exit_side, quantity, signal.stop_loss)
        .await;
    let Some(sl_order_id) = accepted_id(&stop) else {
        let reason = order_failure(&stop).unwrap_or_default();
        halt(
            ctx,
            rt,
            "sl_placement_failed",
            &format!(
                "STOP PLACEMENT FAILED for {} {} (qty {})\nError: {}",
                symbol,
                direction.as_str().to_uppercase(),
                quantity,
                reason
            ),
        )
        .await?;
        return Ok(EntryOutcome::Halted);
    };
    info!(order_id = %sl_order_id, price = %signal.stop_loss, "stop order placed");

    // 3. target; failure degrades to stop-only protection
    let target = ctx
        .venue
        .place_limit_order(&symbol, exit_side, quantity, signal.take_profit)
        .await;
    let tp_order_id = accepted_id(&target);
    if tp_order_id.is_none() {
        let reason = order_failure(&target).unwrap_or_default();
        warn!(reason = %reason, "target order failed, position protected by stop only");
        ctx.notifier
            .notify_error(&format!("TP order failed (SL is active): {}", reason))
            .await;
        ctx.audit(
            EventLevel::Error,
            "tp_placement_failed",
            &format!("TP order failed: {}", reason),
            Some(json!({ "sl_order_id": sl_order_id })),
        )
        .await;
    }

    // 4. record, then believe
    let new_trade = NewTrade {
        signal_id: signal.signal_id.clone(),
        opened_at: ctx.clock.now(),
        profile: rt.profile.as_str().to_string(),
        venue: ctx.venue.kind().as_str().to_string(),
        symbol: symbol.clone(),
        direction,
        entry_price,
        quantity,
        stop_loss: signal.stop_loss,
        take_profit: signal.take_profit,
        notional: (entry_price * quantity).round_dp(4),
        margin: sizing.margin,
        risk_budget: sizing.risk_budget,
        leverage: sizing.leverage,
        est_fee: sizing.est_fee,
        entry_order_id,
        sl_order_id,
        tp_order_id,
    };
    let trade_id = match ctx.ledger.insert_trade(&new_trade).await {
        Ok(id) => id,
        Err(e) => {
            halt(
                ctx,
                rt,
                "trade_record_failed",
                &format!(
                    "Position {} {} is live with stop {} but could not be recorded: {}",
                    symbol,
                    direction.as_str().to_uppercase(),
                    new_trade.sl_order_id,
                    e
                ),
            )
            .await?;
            return Ok(EntryOutcome::Halted);
        }
    };
    let record = TradeRecord::from_new(trade_id, &new_trade);
    rt.position = Some(record.clone());
    rt.transition(BotState::Open, "entry complete")?;

    // 5. tell people
    ctx.notifier.notify_entry(&record).await;
    ctx.audit(
        EventLevel::Info,
        "trade_opened",
        &format!("Trade {} opened", trade_id),
        Some(json!({
            "signal_id": record.signal_id,
            "direction": direction.as_str(),
            "entry": record.entry_price.to_string(),
            "sl": record.stop_loss.to_string(),
            "tp": record.take_profit.to_string(),
            "qty": record.quantity.to_string(),
        })),
    )
    .await;

    Ok(EntryOutcome::Opened(trade_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::test_support::*;
    use crate::domain::{OrderResult, TradeStatus};
    use crate::error::BotError;
    use crate::config::TradingProfile;
    use crate::notify::MockNotifier;
    use crate::persistence::{Ledger, HALT_STATE_KEY};
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn runtime() -> RuntimeState {
        RuntimeState::new(TradingProfile::Ltf5m)
    }

    #[tokio::test]
    async fn successful_entry_records_open_trade() {
        let h = Harness::new().await;
        let ctx = h.context();
        let mut rt = runtime();

        let outcome = execute_entry(&ctx, &mut rt, &long_signal(), &sizing(dec!(5)))
            .await
            .unwrap();

        let EntryOutcome::Opened(id) = outcome else {
            panic!("expected an open trade, got {:?}", outcome);
        };
        assert_eq!(rt.state, BotState::Open);
        let stored = h.ledger.get_open_trade().await.unwrap().unwrap();
        assert_eq!(stored.id, id);
        assert_eq!(stored.entry_price, dec!(100));
        assert_eq!(stored.notional, dec!(500));
        assert_eq!(stored.status, TradeStatus::Open);
        assert_eq!(stored.entry_order_id.as_deref(), Some("mkt-1"));
        assert_eq!(stored.sl_order_id.as_deref(), Some("sl-2"));
        assert_eq!(stored.tp_order_id.as_deref(), Some("tp-3"));
        assert_eq!(rt.position.as_ref(), Some(&stored));

        // stop strictly before target, both reduce the position
        assert_eq!(
            h.venue.calls(),
            vec![
                "market BUY 5 reduce_only=false",
                "stop SELL 5 @ 99",
                "limit SELL 5 @ 103",
            ]
        );
        assert!(h.notifier.any_contains("🟢 LONG | ADAUSDT"));
        let events = h.ledger.recent_events(Some("trade_opened"), 5).await.unwrap();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn entry_uses_reported_fill() {
        let h = Harness::new().await;
        h.venue.queue_market(Ok(OrderResult::accepted(
            "m-9",
            Some(dec!(100.2)),
            Some(dec!(4)),
        )));
        let ctx = h.context();
        let mut rt = runtime();

        execute_entry(&ctx, &mut rt, &long_signal(), &sizing(dec!(5)))
            .await
            .unwrap();

        let trade = rt.position.unwrap();
        assert_eq!(trade.entry_price, dec!(100.2));
        assert_eq!(trade.quantity, dec!(4));
        assert!(h.venue.calls().contains(&"stop SELL 4 @ 99".to_string()));
    }

    #[tokio::test]
    async fn rejected_entry_reverts_to_idle() {
        let h = Harness::new().await;
        h.venue.queue_market(Ok(OrderResult::rejected("insufficient margin")));
        let ctx = h.context();
        let mut rt = runtime();

        let outcome = execute_entry(&ctx, &mut rt, &long_signal(), &sizing(dec!(5)))
            .await
            .unwrap();

        assert_eq!(outcome, EntryOutcome::Rejected);
        assert_eq!(rt.state, BotState::Idle);
        assert!(h.ledger.get_open_trade().await.unwrap().is_none());
        assert_eq!(h.venue.calls().len(), 1);
        assert!(h.notifier.any_contains("insufficient margin"));
    }

    #[tokio::test]
    async fn stop_failure_halts_without_recording() {
        let h = Harness::new().await;
        h.venue
            .queue_stop(Err(BotError::Venue("gateway timeout".into())));
        let ctx = h.context();
        let mut rt = runtime();

        let outcome = execute_entry(&ctx, &mut rt, &long_signal(), &sizing(dec!(5)))
            .await
            .unwrap();

        assert_eq!(outcome, EntryOutcome::Halted);
        assert_eq!(rt.state, BotState::ErrorPaused);
        assert!(rt.position.is_none());
        assert!(h.ledger.get_open_trade().await.unwrap().is_none());
        assert!(h.venue.calls_starting_with("limit").is_empty());
        assert!(h.notifier.any_contains("🚨 <b>CRITICAL</b>"));
        assert!(h.notifier.any_contains("MANUAL ACTION REQUIRED"));
        assert!(h.ledger.get_state(HALT_STATE_KEY).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn stop_failure_sends_exactly_one_critical_alert() {
        let h = Harness::new().await;
        h.venue.queue_stop(Ok(OrderResult::rejected("reduce-only rejected")));
        let mut notifier = MockNotifier::new();
        notifier
            .expect_notify_critical()
            .withf(|msg: &str| msg.contains("reduce-only rejected"))
            .times(1)
            .return_const(());
        notifier.expect_notify_entry().never();
        notifier.expect_send().never();
        let mut ctx = h.context();
        ctx.notifier = Arc::new(notifier);
        let mut rt = runtime();

        let outcome = execute_entry(&ctx, &mut rt, &long_signal(), &sizing(dec!(5)))
            .await
            .unwrap();
        assert_eq!(outcome, EntryOutcome::Halted);
    }

    #[tokio::test]
    async fn target_failure_degrades_but_opens() {
        let h = Harness::new().await;
        h.venue.queue_limit(Ok(OrderResult::rejected("price band")));
        let ctx = h.context();
        let mut rt = runtime();

        let outcome = execute_entry(&ctx, &mut rt, &long_signal(), &sizing(dec!(5)))
            .await
            .unwrap();

        assert!(matches!(outcome, EntryOutcome::Opened(_)));
        assert_eq!(rt.state, BotState::Open);
        let stored = h.ledger.get_open_trade().await.unwrap().unwrap();
        assert!(stored.tp_order_id.is_none());
        assert!(stored.sl_order_id.is_some());
        assert!(h.notifier.any_contains("⚠️ <b>ERROR</b>\nTP order failed (SL is active): price band"));
    }

    #[tokio::test]
    async fn second_open_trade_cannot_be_recorded() {
        let h = Harness::new().await;
        let ctx = h.context();
        let mut rt = runtime();
        execute_entry(&ctx, &mut rt, &long_signal(), &sizing(dec!(5)))
            .await
            .unwrap();

        // a stale controller tries again; the ledger refuses a second open row
        let mut stale = runtime();
        let outcome = execute_entry(&ctx, &mut stale, &long_signal(), &sizing(dec!(5)))
            .await
            .unwrap();
        assert_eq!(outcome, EntryOutcome::Halted);
        assert_eq!(stale.state, BotState::ErrorPaused);
        let open: Vec<_> = h
            .ledger
            .get_recent_trades(10)
            .await
            .unwrap()
            .into_iter()
            .filter(|t| t.status == TradeStatus::Open)
            .collect();
        assert_eq!(open.len(), 1);
    }
}
