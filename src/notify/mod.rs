//! Outbound operator notifications and the inbound text command channel.
//!
//! Notification failures are logged by the implementation and never
//! returned; a flaky chat API must not disturb the trading loop.

use async_trait::async_trait;
use rust_decimal::Decimal;
use tracing::{error, info, warn};

use crate::domain::{BotState, Direction, PositionInfo, TradeRecord};

/// Operator alerts, HTML formatted
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str);

    async fn notify_entry(&self, trade: &TradeRecord) {
        self.send(&format_entry(trade)).await;
    }

    async fn notify_close(&self, trade: &TradeRecord) {
        self.send(&format_close(trade)).await;
    }

    async fn notify_error(&self, message: &str) {
        self.send(&format!("⚠️ <b>ERROR</b>\n{}", message)).await;
    }

    async fn notify_critical(&self, message: &str) {
        self.send(&format!("🚨 <b>CRITICAL</b>\n{}", message)).await;
    }
}

/// Raw operator command texts received since the previous poll
#[async_trait]
pub trait CommandSource: Send + Sync {
    async fn poll(&self) -> Vec<String>;
}

/// Notifier used when no chat credentials are configured
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, text: &str) {
        info!(target: "swingbot::alerts", "{}", strip_tags(text));
    }

    async fn notify_error(&self, message: &str) {
        warn!(target: "swingbot::alerts", "ERROR: {}", message);
    }

    async fn notify_critical(&self, message: &str) {
        error!(target: "swingbot::alerts", "CRITICAL: {}", message);
    }
}

/// Command source that never yields commands
#[derive(Debug, Default, Clone)]
pub struct NoCommands;

#[async_trait]
impl CommandSource for NoCommands {
    async fn poll(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Drop HTML tags, for log and console output
pub fn strip_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for c in text.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

fn rr_of(trade: &TradeRecord) -> Decimal {
    let risk = (trade.entry_price - trade.initial_stop_loss).abs();
    if risk.is_zero() {
        return Decimal::ZERO;
    }
    (trade.take_profit - trade.entry_price).abs() / risk
}

pub fn format_entry(trade: &TradeRecord) -> String {
    let arrow = match trade.direction {
        Direction::Long => "🟢 LONG",
        Direction::Short => "🔴 SHORT",
    };
    format!(
        "<b>{} | {} | {}</b>\n\
         Venue: <b>{}</b>\n\n\
         Entry:    <code>{:.5}</code>\n\
         SL:       <code>{:.5}</code>\n\
         TP:       <code>{:.5}</code>\n\
         RR:       <b>1:{:.1}</b>\n\n\
         Qty:      <code>{}</code>\n\
         Leverage: <code>{}x</code>\n\
         Risk:     <code>${:.4}</code>\n\
         Notional: <code>${:.4}</code>\n\
         Margin:   <code>${:.4}</code>\n\
         Est. Fee: <code>${:.4}</code>",
        arrow,
        trade.symbol,
        trade.profile.to_uppercase(),
        trade.venue,
        trade.entry_price,
        trade.stop_loss,
        trade.take_profit,
        rr_of(trade),
        trade.quantity,
        trade.leverage,
        trade.risk_budget,
        trade.notional,
        trade.margin,
        trade.est_fee,
    )
}

pub fn format_close(trade: &TradeRecord) -> String {
    let net = trade.net_pnl.unwrap_or_default();
    let icon = if net >= Decimal::ZERO { "✅" } else { "❌" };
    format!(
        "<b>{} CLOSED | {}</b>\n\
         Direction:  <code>{}</code>\n\
         Reason:     <code>{}</code>\n\n\
         Entry:      <code>{:.5}</code>\n\
         Exit:       <code>{:.5}</code>\n\n\
         Gross PnL:  <code>${:.4}</code>\n\
         Fees:       <code>${:.4}</code>\n\
         Net PnL:    <b>${:.4}</b>",
        icon,
        trade.symbol,
        trade.direction.as_str().to_uppercase(),
        trade
            .exit_reason
            .map(|r| r.as_str())
            .unwrap_or("unknown"),
        trade.entry_price,
        trade.exit_price.unwrap_or_default(),
        trade.gross_pnl.unwrap_or_default(),
        trade.fees.unwrap_or_default(),
        net,
    )
}

/// Snapshot rendered by the `status` command
pub struct StatusView<'a> {
    pub state: BotState,
    pub running: bool,
    pub profile: &'a str,
    pub venue: &'a str,
    pub symbol: &'a str,
    pub leverage: u32,
    pub position: Option<&'a PositionInfo>,
    pub trade: Option<&'a TradeRecord>,
}

pub fn format_status(view: &StatusView<'_>) -> String {
    let position = match view.position {
        Some(p) if p.is_open() => format!(
            "{} | qty={} | entry={:.5} | uPnL=${:.4}",
            p.side.as_str().to_uppercase(),
            p.size,
            p.entry_price,
            p.unrealized_pnl
        ),
        Some(_) => "Flat (no open position)".to_string(),
        None => "unavailable".to_string(),
    };
    let mut msg = format!(
        "<b>📊 Bot Status</b>\n\
         State:    <code>{}</code>\n\
         Running:  <code>{}</code>\n\
         Profile:  <code>{}</code>\n\
         Venue:    <code>{}</code>\n\
         Symbol:   <code>{}</code>\n\
         Leverage: <code>{}x</code>\n\n\
         Position: {}",
        view.state, view.running, view.profile, view.venue, view.symbol, view.leverage, position
    );
    if let Some(t) = view.trade {
        msg.push_str(&format!(
            "\nTracked:  #{} {} SL=<code>{:.5}</code> TP=<code>{:.5}</code>",
            t.id,
            t.direction.as_str().to_uppercase(),
            t.stop_loss,
            t.take_profit
        ));
    }
    msg
}

pub fn format_trades(trades: &[TradeRecord]) -> String {
    if trades.is_empty() {
        return "No trades found.".to_string();
    }
    let mut lines = vec!["<b>📋 Recent Trades</b>\n".to_string()];
    for t in trades {
        let (icon, pnl) = match t.net_pnl {
            Some(p) if p >= Decimal::ZERO => ("✅", format!("${:.4}", p)),
            Some(p) => ("❌", format!("${:.4}", p)),
            None => ("⏳", "open".to_string()),
        };
        let exit = t
            .exit_price
            .map(|p| format!("{:.5}", p))
            .unwrap_or_else(|| "-".to_string());
        let tag = t
            .exit_reason
            .map(|r| r.as_str())
            .unwrap_or_else(|| t.status.as_str());
        lines.push(format!(
            "{} <code>{}</code> entry=<code>{:.5}</code> exit=<code>{}</code> pnl=<b>{}</b> [{}]",
            icon,
            t.direction.as_str().to_uppercase(),
            t.entry_price,
            exit,
            pnl,
            tag
        ));
    }
    lines.join("\n")
}
