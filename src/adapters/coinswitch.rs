//! CoinSwitch PRO futures REST adapter.
//!
//! Quantities are fractional (4 dp); the symbol doubles as the product id.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{decimal_field, hmac_sha256_hex, id_field, query_string, NULL};
use crate::domain::{
    CloseOutcome, OrderResult, OrderSide, OrderState, OrderStatusInfo, PositionInfo, PositionSide,
};
use crate::error::{BotError, Result};
use crate::exchange::{VenueAdapter, VenueKind};

pub const COINSWITCH_BASE: &str = "https://coinswitch.co";

const LEVERAGE_PATH: &str = "/pro/v1/futures/leverage";
const POSITIONS_PATH: &str = "/pro/v1/futures/positions";
const ORDERS_PATH: &str = "/pro/v1/futures/orders";

const QTY_DP: u32 = 4;
const PRICE_DP: u32 = 6;

/// Signature payload: `epoch_ms + method + path(+query) + body`, hex HMAC-SHA256.
pub fn sign_coinswitch(
    secret: &str,
    epoch_ms: &str,
    method: &str,
    path_with_query: &str,
    body: &str,
) -> Result<String> {
    let payload = format!("{}{}{}{}", epoch_ms, method, path_with_query, body);
    hmac_sha256_hex(secret, &payload)
}

#[derive(Clone)]
pub struct CoinSwitchClient {
    http: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
}

impl CoinSwitchClient {
    pub fn new(base_url: Option<&str>, api_key: &str, api_secret: &str) -> Result<Self> {
        let base_url = base_url
            .unwrap_or(COINSWITCH_BASE)
            .trim_end_matches('/')
            .to_string();

        let http = Client::builder()
            .user_agent("swingbot-coinswitch-adapter/0.1")
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| {
                BotError::Internal(format!("failed to build CoinSwitch HTTP client: {}", e))
            })?;

        Ok(Self {
            http,
            base_url,
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
        })
    }

    fn auth_headers(&self, method: &Method, path_with_query: &str, body: &str) -> Result<HeaderMap> {
        let epoch = Utc::now().timestamp_millis().to_string();
        let signature = sign_coinswitch(
            &self.api_secret,
            &epoch,
            method.as_str(),
            path_with_query,
            body,
        )?;

        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("x-auth-apikey"),
            HeaderValue::from_str(&self.api_key)
                .map_err(|e| BotError::Auth(format!("invalid CoinSwitch API key header: {}", e)))?,
        );
        headers.insert(
            HeaderName::from_static("x-auth-epoch"),
            HeaderValue::from_str(&epoch)
                .map_err(|e| BotError::Auth(format!("invalid CoinSwitch epoch header: {}", e)))?,
        );
        headers.insert(
            HeaderName::from_static("x-auth-signature"),
            HeaderValue::from_str(&signature).map_err(|e| {
                BotError::Auth(format!("invalid CoinSwitch signature header: {}", e))
            })?,
        );
        Ok(headers)
    }

    async fn request_json(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<Value>,
    ) -> Result<Value> {
        let path_with_query = format!("{}{}", path, query_string(query));
        let url = format!("{}{}", self.base_url, path_with_query);
        // serde_json's compact form matches the signed payload byte-for-byte
        let body_text = body.as_ref().map(|b| b.to_string()).unwrap_or_default();

        let headers = self.auth_headers(&method, &path_with_query, &body_text)?;
        let mut req = self.http.request(method.clone(), &url).headers(headers);
        if body.is_some() {
            req = req.header(CONTENT_TYPE, "application/json").body(body_text);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let text = resp.text().await?;

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(BotError::RateLimited(format!(
                "CoinSwitch API rate limited for {} {}",
                method, path
            )));
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(BotError::Auth(format!(
                "CoinSwitch API {} {} unauthorized: {}",
                method, path, text
            )));
        }

        let parsed: Option<Value> = serde_json::from_str(&text).ok();
        if status.is_success() {
            return parsed.ok_or_else(|| {
                BotError::Venue(format!(
                    "invalid CoinSwitch JSON response for {} {}",
                    method, path
                ))
            });
        }
        if status.is_client_error() {
            if let Some(body) = parsed.filter(|b| b.get("success").is_some()) {
                return Ok(body);
            }
        }
        Err(BotError::Venue(format!(
            "CoinSwitch API {} {} failed: status={} body={}",
            method, path, status, text
        )))
    }

    async fn submit_order(&self, body: Value, label: &str) -> Result<OrderResult> {
        let resp = self
            .request_json(Method::POST, ORDERS_PATH, &[], Some(body))
            .await?;
        let result = parse_order_reply(&resp);
        if result.success {
            debug!(order_id = ?result.order_id, "CoinSwitch {} accepted", label);
        } else {
            warn!("CoinSwitch {} rejected: {}", label, result.error_text());
        }
        Ok(result)
    }
}

fn fmt_qty(quantity: Decimal) -> String {
    quantity.round_dp(QTY_DP).normalize().to_string()
}

fn fmt_price(price: Decimal) -> String {
    price.round_dp(PRICE_DP).normalize().to_string()
}

fn succeeded(resp: &Value) -> bool {
    resp.get("success").and_then(Value::as_bool).unwrap_or(false)
}

fn error_message(resp: &Value) -> String {
    resp.get("msg")
        .or_else(|| resp.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| resp.to_string())
}

/// `data` may be an object or a list of objects.
fn data_items(resp: &Value) -> Vec<&Value> {
    match resp.get("data") {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(Value::Null) | None => Vec::new(),
        Some(item) => vec![item],
    }
}

fn parse_order_reply(resp: &Value) -> OrderResult {
    if !succeeded(resp) {
        return OrderResult::rejected(error_message(resp));
    }
    let data = data_items(resp).into_iter().next().unwrap_or(&NULL);
    match id_field(data, &["orderId", "order_id"]) {
        Some(order_id) => OrderResult::accepted(
            order_id,
            decimal_field(data, &["avgPrice"]).filter(|p| !p.is_zero()),
            decimal_field(data, &["executedQty", "origQty"]),
        ),
        None => OrderResult::rejected("order accepted without an order id"),
    }
}

fn parse_position(symbol: &str, resp: &Value) -> PositionInfo {
    data_items(resp)
        .into_iter()
        .find(|p| p.get("symbol").and_then(Value::as_str) == Some(symbol))
        .map(|p| {
            PositionInfo::from_signed_size(
                symbol,
                decimal_field(p, &["positionAmt"]).unwrap_or_default(),
                decimal_field(p, &["entryPrice"]).unwrap_or_default(),
                decimal_field(p, &["unRealizedProfit"]).unwrap_or_default(),
            )
        })
        .unwrap_or_else(|| PositionInfo::flat(symbol))
}

fn parse_order_status(order_id: &str, resp: &Value) -> OrderStatusInfo {
    let data = data_items(resp).into_iter().next().unwrap_or(&NULL);
    let state = data
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_ascii_uppercase();
    let status = match state.as_str() {
        "NEW" | "PARTIALLY_FILLED" => OrderState::Open,
        "FILLED" => OrderState::Filled,
        "CANCELED" | "CANCELLED" | "EXPIRED" => OrderState::Cancelled,
        _ => OrderState::Unknown,
    };
    OrderStatusInfo::new(
        order_id,
        status,
        decimal_field(data, &["avgPrice"]).filter(|p| !p.is_zero()),
    )
}

#[async_trait]
impl VenueAdapter for CoinSwitchClient {
    fn kind(&self) -> VenueKind {
        VenueKind::CoinSwitchLive
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()> {
        let resp = self
            .request_json(
                Method::POST,
                LEVERAGE_PATH,
                &[],
                Some(json!({ "symbol": symbol, "leverage": leverage })),
            )
            .await?;
        if !succeeded(&resp) {
            return Err(BotError::Venue(format!(
                "CoinSwitch set_leverage failed: {}",
                error_message(&resp)
            )));
        }
        info!("CoinSwitch: leverage set to {}x for {}", leverage, symbol);
        Ok(())
    }

    async fn get_position(&self, symbol: &str) -> Result<PositionInfo> {
        let resp = self
            .request_json(
                Method::GET,
                POSITIONS_PATH,
                &[("symbol", symbol.to_string())],
                None,
            )
            .await?;
        Ok(parse_position(symbol, &resp))
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        reduce_only: bool,
    ) -> Result<OrderResult> {
        let body = json!({
            "symbol": symbol,
            "side": side.to_string(),
            "type": "MARKET",
            "quantity": fmt_qty(quantity),
            "reduceOnly": reduce_only,
        });
        self.submit_order(body, "market order").await
    }

    async fn place_stop_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        stop_price: Decimal,
    ) -> Result<OrderResult> {
        let body = json!({
            "symbol": symbol,
            "side": side.to_string(),
            "type": "STOP_MARKET",
            "stopPrice": fmt_price(stop_price),
            "quantity": fmt_qty(quantity),
            "reduceOnly": true,
        });
        self.submit_order(body, "stop order").await
    }

    async fn place_limit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
    ) -> Result<OrderResult> {
        let body = json!({
            "symbol": symbol,
            "side": side.to_string(),
            "type": "TAKE_PROFIT",
            "price": fmt_price(price),
            "stopPrice": fmt_price(price),
            "quantity": fmt_qty(quantity),
            "reduceOnly": true,
        });
        self.submit_order(body, "take-profit order").await
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<bool> {
        let resp = self
            .request_json(
                Method::DELETE,
                ORDERS_PATH,
                &[],
                Some(json!({ "symbol": symbol, "orderId": order_id })),
            )
            .await?;
        Ok(succeeded(&resp))
    }

    async fn get_order_status(&self, symbol: &str, order_id: &str) -> Result<OrderStatusInfo> {
        let resp = self
            .request_json(
                Method::GET,
                ORDERS_PATH,
                &[("symbol", symbol.to_string()), ("orderId", order_id.to_string())],
                None,
            )
            .await?;
        Ok(parse_order_status(order_id, &resp))
    }

    async fn close_position(&self, symbol: &str) -> Result<CloseOutcome> {
        let position = self.get_position(symbol).await?;
        if !position.is_open() {
            return Ok(CloseOutcome::Flat);
        }
        let side = if position.side == PositionSide::Long {
            OrderSide::Sell
        } else {
            OrderSide::Buy
        };
        let result = self
            .place_market_order(symbol, side, position.size, true)
            .await?;
        Ok(CloseOutcome::Submitted(result))
    }

    async fn get_product_id(&self, symbol: &str) -> Result<String> {
        Ok(symbol.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn signature_covers_epoch_method_path_and_body() {
        let body = r#"{"symbol":"ADAUSDT","leverage":3}"#;
        let sig = sign_coinswitch("secret", "1700000000000", "POST", LEVERAGE_PATH, body)
            .expect("sign");
        assert_eq!(sig.len(), 64);

        let other_body = sign_coinswitch(
            "secret",
            "1700000000000",
            "POST",
            LEVERAGE_PATH,
            r#"{"symbol":"ADAUSDT","leverage":5}"#,
        )
        .expect("sign");
        assert_ne!(sig, other_body);
    }

    #[test]
    fn formats_venue_precision() {
        assert_eq!(fmt_qty(dec!(12.345678)), "12.3457");
        assert_eq!(fmt_price(dec!(0.51234567)), "0.512346");
        assert_eq!(fmt_qty(dec!(5.0000)), "5");
    }

    #[test]
    fn maps_order_statuses() {
        let cases = [
            ("NEW", OrderState::Open),
            ("PARTIALLY_FILLED", OrderState::Open),
            ("FILLED", OrderState::Filled),
            ("CANCELED", OrderState::Cancelled),
            ("EXPIRED", OrderState::Cancelled),
            ("REJECTED", OrderState::Unknown),
        ];
        for (raw, expected) in cases {
            let resp = json!({ "success": true, "data": { "status": raw, "avgPrice": "0.5" } });
            assert_eq!(parse_order_status("9", &resp).status, expected, "{}", raw);
        }

        let list = json!({ "success": true, "data": [{ "status": "FILLED", "avgPrice": "0.48" }] });
        let info = parse_order_status("9", &list);
        assert_eq!(info.fill_price, Some(dec!(0.48)));
    }

    #[test]
    fn finds_position_for_symbol() {
        let resp = json!({
            "success": true,
            "data": [
                { "symbol": "BTCUSDT", "positionAmt": "0.01", "entryPrice": "60000" },
                { "symbol": "ADAUSDT", "positionAmt": "-25.5", "entryPrice": "0.51", "unRealizedProfit": "0.3" }
            ]
        });
        let pos = parse_position("ADAUSDT", &resp);
        assert_eq!(pos.side, PositionSide::Short);
        assert_eq!(pos.size, dec!(25.5));
        assert_eq!(pos.unrealized_pnl, dec!(0.3));

        let none = json!({ "success": true, "data": [] });
        assert!(!parse_position("ADAUSDT", &none).is_open());
    }

    #[test]
    fn parses_order_replies() {
        let ok = json!({ "success": true, "data": { "orderId": "abc-1", "avgPrice": "0", "origQty": "10" } });
        let result = parse_order_reply(&ok);
        assert_eq!(result.accepted_id(), Some("abc-1"));
        assert_eq!(result.fill_price, None);
        assert_eq!(result.filled_quantity, Some(dec!(10)));

        let rejected = json!({ "success": false, "msg": "reduce only rejected" });
        assert_eq!(parse_order_reply(&rejected).error_text(), "reduce only rejected");
    }
}
