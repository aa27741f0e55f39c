use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite};
use std::str::FromStr;
use tracing::{debug, info, instrument};

use crate::domain::{Direction, ExitReason, NewTrade, TradeRecord, TradeStatus, TradeUpdate};
use crate::error::{BotError, Result};
use crate::persistence::{EventLevel, Ledger, StoredEvent};

const TRADE_COLUMNS: &str = r#"
    id, signal_id, opened_at, profile, venue, symbol, direction, entry_price, quantity,
    stop_loss, initial_stop_loss, take_profit, notional, margin, risk_budget, leverage,
    est_fee, entry_order_id, sl_order_id, tp_order_id, status, exit_price, exit_reason,
    gross_pnl, fees, net_pnl, closed_at
"#;

/// SQLite-backed trade ledger
#[derive(Clone)]
pub struct SqliteLedger {
    pool: SqlitePool,
}

impl SqliteLedger {
    /// Open (creating if needed) the database at `database_url`
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        info!("Connected to SQLite ledger");
        Ok(Self { pool })
    }

    /// Private in-memory database; one long-lived connection keeps it alive
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let ledger = Self { pool };
        ledger.migrate().await?;
        Ok(ledger)
    }

    /// Run migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Newest audit events first, optionally filtered by type
    pub async fn recent_events(
        &self,
        event_type: Option<&str>,
        limit: u32,
    ) -> Result<Vec<StoredEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT id, timestamp_utc, level, event_type, message, context_json
            FROM events
            WHERE (? IS NULL OR event_type = ?)
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(event_type)
        .bind(event_type)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| -> Result<StoredEvent> {
                let context: Option<String> = r.try_get("context_json")?;
                Ok(StoredEvent {
                    id: r.try_get("id")?,
                    timestamp: r.try_get("timestamp_utc")?,
                    level: r.try_get("level")?,
                    event_type: r.try_get("event_type")?,
                    message: r.try_get("message")?,
                    context: context
                        .map(|c| serde_json::from_str::<Value>(&c))
                        .transpose()?,
                })
            })
            .collect()
    }
}

fn decimal_col(row: &SqliteRow, col: &str) -> Result<Decimal> {
    let raw: String = row.try_get(col)?;
    Decimal::from_str(&raw)
        .map_err(|e| BotError::Internal(format!("column {} holds invalid decimal {:?}: {}", col, raw, e)))
}

fn opt_decimal_col(row: &SqliteRow, col: &str) -> Result<Option<Decimal>> {
    let raw: Option<String> = row.try_get(col)?;
    raw.map(|s| {
        Decimal::from_str(&s).map_err(|e| {
            BotError::Internal(format!("column {} holds invalid decimal {:?}: {}", col, s, e))
        })
    })
    .transpose()
}

fn row_to_trade(row: &SqliteRow) -> Result<TradeRecord> {
    let direction: String = row.try_get("direction")?;
    let status: String = row.try_get("status")?;
    let exit_reason: Option<String> = row.try_get("exit_reason")?;
    let leverage: i64 = row.try_get("leverage")?;

    Ok(TradeRecord {
        id: row.try_get("id")?,
        signal_id: row.try_get("signal_id")?,
        opened_at: row.try_get("opened_at")?,
        profile: row.try_get("profile")?,
        venue: row.try_get("venue")?,
        symbol: row.try_get("symbol")?,
        direction: Direction::try_from(direction.as_str()).map_err(BotError::Internal)?,
        entry_price: decimal_col(row, "entry_price")?,
        quantity: decimal_col(row, "quantity")?,
        stop_loss: decimal_col(row, "stop_loss")?,
        initial_stop_loss: decimal_col(row, "initial_stop_loss")?,
        take_profit: decimal_col(row, "take_profit")?,
        notional: decimal_col(row, "notional")?,
        margin: decimal_col(row, "margin")?,
        risk_budget: decimal_col(row, "risk_budget")?,
        leverage: u32::try_from(leverage)
            .map_err(|_| BotError::Internal(format!("invalid leverage {}", leverage)))?,
        est_fee: decimal_col(row, "est_fee")?,
        entry_order_id: row.try_get("entry_order_id")?,
        sl_order_id: row.try_get("sl_order_id")?,
        tp_order_id: row.try_get("tp_order_id")?,
        status: TradeStatus::try_from(status.as_str()).map_err(BotError::Internal)?,
        exit_price: opt_decimal_col(row, "exit_price")?,
        exit_reason: exit_reason
            .map(|r| ExitReason::try_from(r.as_str()).map_err(BotError::Internal))
            .transpose()?,
        gross_pnl: opt_decimal_col(row, "gross_pnl")?,
        fees: opt_decimal_col(row, "fees")?,
        net_pnl: opt_decimal_col(row, "net_pnl")?,
        closed_at: row.try_get::<Option<DateTime<Utc>>, _>("closed_at")?,
    })
}

#[async_trait]
impl Ledger for SqliteLedger {
    #[instrument(skip(self, trade), fields(signal_id = %trade.signal_id))]
    async fn insert_trade(&self, trade: &NewTrade) -> Result<i64> {
        // Single statement: refuses a second open trade atomically
        let result = sqlx::query(
            r#"
            INSERT INTO trades (
                signal_id, opened_at, profile, venue, symbol, direction, entry_price, quantity,
                stop_loss, initial_stop_loss, take_profit, notional, margin, risk_budget,
                leverage, est_fee, entry_order_id, sl_order_id, tp_order_id, status
            )
            SELECT ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'open'
            WHERE NOT EXISTS (SELECT 1 FROM trades WHERE status = 'open')
            "#,
        )
        .bind(&trade.signal_id)
        .bind(trade.opened_at)
        .bind(&trade.profile)
        .bind(&trade.venue)
        .bind(&trade.symbol)
        .bind(trade.direction.as_str())
        .bind(trade.entry_price.to_string())
        .bind(trade.quantity.to_string())
        .bind(trade.stop_loss.to_string())
        .bind(trade.stop_loss.to_string())
        .bind(trade.take_profit.to_string())
        .bind(trade.notional.to_string())
        .bind(trade.margin.to_string())
        .bind(trade.risk_budget.to_string())
        .bind(i64::from(trade.leverage))
        .bind(trade.est_fee.to_string())
        .bind(&trade.entry_order_id)
        .bind(&trade.sl_order_id)
        .bind(&trade.tp_order_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(BotError::Validation(
                "an open trade already exists in the ledger".to_string(),
            ));
        }

        let id = result.last_insert_rowid();
        debug!(trade_id = id, "trade inserted");
        Ok(id)
    }

    #[instrument(skip(self, update))]
    async fn update_trade(&self, id: i64, update: &TradeUpdate) -> Result<()> {
        if update.is_empty() {
            return Ok(());
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE trades SET ");
        {
            let mut fields = qb.separated(", ");
            if let Some(v) = update.stop_loss {
                fields.push("stop_loss = ").push_bind_unseparated(v.to_string());
            }
            if let Some(v) = &update.sl_order_id {
                fields.push("sl_order_id = ").push_bind_unseparated(v.clone());
            }
            if let Some(v) = update.status {
                fields.push("status = ").push_bind_unseparated(v.as_str());
            }
            if let Some(v) = update.exit_price {
                fields.push("exit_price = ").push_bind_unseparated(v.to_string());
            }
            if let Some(v) = update.exit_reason {
                fields.push("exit_reason = ").push_bind_unseparated(v.as_str());
            }
            if let Some(v) = update.gross_pnl {
                fields.push("gross_pnl = ").push_bind_unseparated(v.to_string());
            }
            if let Some(v) = update.fees {
                fields.push("fees = ").push_bind_unseparated(v.to_string());
            }
            if let Some(v) = update.net_pnl {
                fields.push("net_pnl = ").push_bind_unseparated(v.to_string());
            }
            if let Some(v) = update.closed_at {
                fields.push("closed_at = ").push_bind_unseparated(v);
            }
        }
        qb.push(" WHERE id = ").push_bind(id);

        let result = qb.build().execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(BotError::Validation(format!("trade {} not found", id)));
        }
        Ok(())
    }

    async fn get_open_trade(&self) -> Result<Option<TradeRecord>> {
        let sql = format!(
            "SELECT {} FROM trades WHERE status = 'open' ORDER BY id DESC LIMIT 1",
            TRADE_COLUMNS
        );
        let row = sqlx::query(&sql).fetch_optional(&self.pool).await?;
        row.as_ref().map(row_to_trade).transpose()
    }

    async fn get_recent_trades(&self, limit: u32) -> Result<Vec<TradeRecord>> {
        let sql = format!(
            "SELECT {} FROM trades ORDER BY id DESC LIMIT ?",
            TRADE_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_trade).collect()
    }

    async fn log_event(
        &self,
        level: EventLevel,
        event_type: &str,
        message: &str,
        context: Option<Value>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO events (timestamp_utc, level, event_type, message, context_json)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(Utc::now())
        .bind(level.as_str())
        .bind(event_type)
        .bind(message)
        .bind(context.map(|c| c.to_string()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_state(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO bot_state (key, value, updated_at) VALUES (?, ?, ?)
            ON CONFLICT (key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_state(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM bot_state WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| r.try_get("value").map_err(BotError::from))
            .transpose()
    }

    async fn clear_state(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM bot_state WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PnlBreakdown;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn new_trade(signal_id: &str) -> NewTrade {
        NewTrade {
            signal_id: signal_id.to_string(),
            opened_at: Utc::now(),
            profile: "ltf_5m".into(),
            venue: "delta_demo".into(),
            symbol: "ADAUSDT".into(),
            direction: Direction::Long,
            entry_price: dec!(0.5123),
            quantity: dec!(12),
            stop_loss: dec!(0.5001),
            take_profit: dec!(0.5489),
            notional: dec!(6.1476),
            margin: dec!(2.0492),
            risk_budget: dec!(0.72),
            leverage: 3,
            est_fee: dec!(0.0049),
            entry_order_id: "e-1".into(),
            sl_order_id: "sl-1".into(),
            tp_order_id: Some("tp-1".into()),
        }
    }

    #[tokio::test]
    async fn test_insert_and_read_open_trade() {
        let ledger = SqliteLedger::in_memory().await.unwrap();
        let id = ledger.insert_trade(&new_trade("sig-1")).await.unwrap();

        let open = ledger.get_open_trade().await.unwrap().expect("open trade");
        assert_eq!(open.id, id);
        assert_eq!(open.entry_price, dec!(0.5123));
        assert_eq!(open.initial_stop_loss, dec!(0.5001));
        assert_eq!(open.tp_order_id.as_deref(), Some("tp-1"));
        assert_eq!(open.status, TradeStatus::Open);
        assert_eq!(open.leverage, 3);
    }

    #[tokio::test]
    async fn test_second_open_trade_is_refused() {
        let ledger = SqliteLedger::in_memory().await.unwrap();
        ledger.insert_trade(&new_trade("sig-1")).await.unwrap();
        let err = ledger.insert_trade(&new_trade("sig-2")).await;
        assert!(matches!(err, Err(BotError::Validation(_))));
    }

    #[tokio::test]
    async fn test_partial_update_and_close() {
        let ledger = SqliteLedger::in_memory().await.unwrap();
        let id = ledger.insert_trade(&new_trade("sig-1")).await.unwrap();

        ledger
            .update_trade(id, &TradeUpdate::moved_stop(dec!(0.5123), "sl-2"))
            .await
            .unwrap();
        let moved = ledger.get_open_trade().await.unwrap().unwrap();
        assert_eq!(moved.stop_loss, dec!(0.5123));
        assert_eq!(moved.initial_stop_loss, dec!(0.5001));
        assert_eq!(moved.sl_order_id.as_deref(), Some("sl-2"));

        let pnl = PnlBreakdown::compute(Direction::Long, dec!(0.5123), dec!(0.5489), dec!(12), dec!(0.0004));
        ledger
            .update_trade(id, &TradeUpdate::closed(dec!(0.5489), ExitReason::TpHit, &pnl, Utc::now()))
            .await
            .unwrap();

        assert!(ledger.get_open_trade().await.unwrap().is_none());
        let recent = ledger.get_recent_trades(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].exit_reason, Some(ExitReason::TpHit));
        assert_eq!(recent[0].net_pnl, Some(pnl.net));
        assert!(recent[0].closed_at.is_some());

        // a new trade may open once the previous one is closed
        ledger.insert_trade(&new_trade("sig-2")).await.unwrap();
        let recent = ledger.get_recent_trades(1).await.unwrap();
        assert_eq!(recent[0].signal_id, "sig-2");
    }

    #[tokio::test]
    async fn test_update_unknown_trade_fails() {
        let ledger = SqliteLedger::in_memory().await.unwrap();
        let err = ledger
            .update_trade(99, &TradeUpdate::moved_stop(dec!(1), "x"))
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_state_round_trip() {
        let ledger = SqliteLedger::in_memory().await.unwrap();
        assert_eq!(ledger.get_state("k").await.unwrap(), None);

        ledger.set_state("k", "one").await.unwrap();
        ledger.set_state("k", "two").await.unwrap();
        assert_eq!(ledger.get_state("k").await.unwrap().as_deref(), Some("two"));

        ledger.clear_state("k").await.unwrap();
        assert_eq!(ledger.get_state("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_events_are_appended() {
        let ledger = SqliteLedger::in_memory().await.unwrap();
        ledger
            .log_event(EventLevel::Info, "trade_opened", "opened", Some(json!({ "id": 1 })))
            .await
            .unwrap();
        ledger
            .log_event(EventLevel::Critical, "stop_failed", "no stop", None)
            .await
            .unwrap();

        let all = ledger.recent_events(None, 10).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].event_type, "stop_failed");
        assert_eq!(all[0].level, "CRITICAL");

        let opened = ledger.recent_events(Some("trade_opened"), 10).await.unwrap();
        assert_eq!(opened.len(), 1);
        assert_eq!(opened[0].context, Some(json!({ "id": 1 })));
    }
}
