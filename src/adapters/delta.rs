//! Delta Exchange India REST adapter (testnet by default).
//!
//! Quantities are whole contracts; symbols resolve to numeric product ids
//! which are cached for the life of the process.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Method, StatusCode};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::{decimal_field, hmac_sha256_hex, id_field, query_string, NULL};
use crate::domain::{
    CloseOutcome, OrderResult, OrderSide, OrderState, OrderStatusInfo, PositionInfo,
};
use crate::error::{BotError, Result};
use crate::exchange::{VenueAdapter, VenueKind};

pub const DELTA_DEMO_BASE: &str = "https://cdn-ind.testnet.deltaex.org";

const ORDER_TYPE_MARKET: &str = "market_order";
const ORDER_TYPE_LIMIT: &str = "limit_order";
const ORDER_TYPE_STOP: &str = "stop_loss_order";

/// Signature payload: `method + timestamp + path(+query) + body`, hex HMAC-SHA256.
pub fn sign_delta(
    secret: &str,
    method: &str,
    timestamp_secs: &str,
    path_with_query: &str,
    body: &str,
) -> Result<String> {
    let payload = format!("{}{}{}{}", method, timestamp_secs, path_with_query, body);
    hmac_sha256_hex(secret, &payload)
}

pub struct DeltaClient {
    http: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    product_cache: RwLock<HashMap<String, String>>,
}

impl DeltaClient {
    pub fn new(base_url: Option<&str>, api_key: &str, api_secret: &str) -> Result<Self> {
        let base_url = base_url
            .unwrap_or(DELTA_DEMO_BASE)
            .trim_end_matches('/')
            .to_string();

        let http = Client::builder()
            .user_agent("swingbot-delta-adapter/0.1")
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| BotError::Internal(format!("failed to build Delta HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url,
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
            product_cache: RwLock::new(HashMap::new()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn auth_headers(&self, method: &Method, path_with_query: &str, body: &str) -> Result<HeaderMap> {
        let timestamp = Utc::now().timestamp().to_string();
        let signature = sign_delta(
            &self.api_secret,
            method.as_str(),
            &timestamp,
            path_with_query,
            body,
        )?;

        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("api-key"),
            HeaderValue::from_str(&self.api_key)
                .map_err(|e| BotError::Auth(format!("invalid Delta API key header: {}", e)))?,
        );
        headers.insert(
            HeaderName::from_static("timestamp"),
            HeaderValue::from_str(&timestamp)
                .map_err(|e| BotError::Auth(format!("invalid Delta timestamp header: {}", e)))?,
        );
        headers.insert(
            HeaderName::from_static("signature"),
            HeaderValue::from_str(&signature)
                .map_err(|e| BotError::Auth(format!("invalid Delta signature header: {}", e)))?,
        );
        Ok(headers)
    }

    /// Signed request. 2xx bodies and 4xx bodies carrying `success: false`
    /// (order rejections) are returned; everything else is an error.
    async fn request_json(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<Value>,
    ) -> Result<Value> {
        let path_with_query = format!("{}{}", path, query_string(query));
        let url = format!("{}{}", self.base_url, path_with_query);
        let body_text = body.as_ref().map(|b| b.to_string()).unwrap_or_default();

        let headers = self.auth_headers(&method, &path_with_query, &body_text)?;
        let mut req = self.http.request(method.clone(), &url).headers(headers);
        if body.is_some() {
            req = req.header(CONTENT_TYPE, "application/json").body(body_text);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        classify_response(status, &text, &method, path)
    }

    async fn product_id_number(&self, symbol: &str) -> Result<i64> {
        let id = self.get_product_id(symbol).await?;
        id.parse::<i64>()
            .map_err(|_| BotError::Venue(format!("Delta product id '{}' is not numeric", id)))
    }

    async fn submit_order(&self, body: Value, label: &str) -> Result<OrderResult> {
        let resp = self.request_json(Method::POST, "/v2/orders", &[], Some(body)).await?;
        let result = parse_order_reply(&resp);
        if result.success {
            debug!(order_id = ?result.order_id, "Delta {} accepted", label);
        } else {
            warn!("Delta {} rejected: {}", label, result.error_text());
        }
        Ok(result)
    }

    async fn order_body(
        &self,
        symbol: &str,
        order_type: &str,
        side: OrderSide,
        quantity: Decimal,
        reduce_only: bool,
    ) -> Result<std::result::Result<Value, OrderResult>> {
        let Some(size) = whole_contracts(quantity) else {
            return Ok(Err(OrderResult::rejected(format!(
                "quantity {} is below one contract",
                quantity
            ))));
        };
        let product_id = self.product_id_number(symbol).await?;
        Ok(Ok(json!({
            "product_id": product_id,
            "order_type": order_type,
            "side": side.as_str(),
            "size": size,
            "reduce_only": reduce_only,
        })))
    }
}

fn classify_response(status: StatusCode, text: &str, method: &Method, path: &str) -> Result<Value> {
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(BotError::RateLimited(format!(
            "Delta API rate limited for {} {}",
            method, path
        )));
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(BotError::Auth(format!(
            "Delta API {} {} unauthorized: {}",
            method, path, text
        )));
    }

    let parsed: Option<Value> = if text.trim().is_empty() {
        Some(Value::Null)
    } else {
        serde_json::from_str(text).ok()
    };

    if status.is_success() {
        return parsed.ok_or_else(|| {
            BotError::Venue(format!("invalid Delta JSON response for {} {}", method, path))
        });
    }

    if status.is_client_error() {
        if let Some(body) = parsed.filter(|b| b.get("success").is_some()) {
            return Ok(body);
        }
    }

    Err(BotError::Venue(format!(
        "Delta API {} {} failed: status={} body={}",
        method, path, status, text
    )))
}

/// Floor to whole contracts; `None` below one contract.
fn whole_contracts(quantity: Decimal) -> Option<i64> {
    quantity.trunc().to_i64().filter(|size| *size >= 1)
}

fn succeeded(resp: &Value) -> bool {
    resp.get("success").and_then(Value::as_bool).unwrap_or(false)
}

fn error_message(resp: &Value) -> String {
    match resp.get("error") {
        Some(Value::String(s)) => s.clone(),
        Some(err) => err
            .get("code")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string()),
        None => resp.to_string(),
    }
}

fn parse_order_reply(resp: &Value) -> OrderResult {
    if !succeeded(resp) {
        return OrderResult::rejected(error_message(resp));
    }
    let result = resp.get("result").unwrap_or(&NULL);
    match id_field(result, &["id"]) {
        Some(order_id) => OrderResult::accepted(
            order_id,
            decimal_field(result, &["average_fill_price"]).filter(|p| !p.is_zero()),
            decimal_field(result, &["size"]),
        ),
        None => OrderResult::rejected("order accepted without an order id"),
    }
}

fn parse_position(symbol: &str, resp: &Value) -> PositionInfo {
    let result = resp.get("result").unwrap_or(&NULL);
    let size = decimal_field(result, &["size"]).unwrap_or_default();
    PositionInfo::from_signed_size(
        symbol,
        size,
        decimal_field(result, &["entry_price"]).unwrap_or_default(),
        decimal_field(result, &["unrealized_pnl"]).unwrap_or_default(),
    )
}

fn parse_order_status(order_id: &str, resp: &Value) -> OrderStatusInfo {
    let result = resp.get("result").unwrap_or(&NULL);
    let state = result
        .get("state")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_ascii_lowercase();
    let status = match state.as_str() {
        "open" | "pending" => OrderState::Open,
        "closed" => OrderState::Filled,
        "cancelled" => OrderState::Cancelled,
        _ => OrderState::Unknown,
    };
    OrderStatusInfo::new(
        order_id,
        status,
        decimal_field(result, &["average_fill_price"]).filter(|p| !p.is_zero()),
    )
}

#[async_trait]
impl VenueAdapter for DeltaClient {
    fn kind(&self) -> VenueKind {
        VenueKind::DeltaDemo
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()> {
        let product_id = self.product_id_number(symbol).await?;
        let resp = self
            .request_json(
                Method::POST,
                "/v2/orders/leverage",
                &[],
                Some(json!({ "product_id": product_id, "leverage": leverage })),
            )
            .await?;
        if !succeeded(&resp) {
            return Err(BotError::Venue(format!(
                "Delta set_leverage failed: {}",
                error_message(&resp)
            )));
        }
        info!("Delta: leverage set to {}x for {}", leverage, symbol);
        Ok(())
    }

    async fn get_position(&self, symbol: &str) -> Result<PositionInfo> {
        let product_id = self.product_id_number(symbol).await?;
        let resp = self
            .request_json(
                Method::GET,
                "/v2/positions",
                &[("product_id", product_id.to_string())],
                None,
            )
            .await?;
        if !succeeded(&resp) {
            return Err(BotError::Venue(format!(
                "Delta get_position failed: {}",
                error_message(&resp)
            )));
        }
        Ok(parse_position(symbol, &resp))
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        reduce_only: bool,
    ) -> Result<OrderResult> {
        match self
            .order_body(symbol, ORDER_TYPE_MARKET, side, quantity, reduce_only)
            .await?
        {
            Ok(body) => self.submit_order(body, "market order").await,
            Err(rejected) => Ok(rejected),
        }
    }

    async fn place_stop_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        stop_price: Decimal,
    ) -> Result<OrderResult> {
        match self
            .order_body(symbol, ORDER_TYPE_STOP, side, quantity, true)
            .await?
        {
            Ok(mut body) => {
                body["stop_price"] = json!(stop_price.round_dp(6).normalize().to_string());
                self.submit_order(body, "stop order").await
            }
            Err(rejected) => Ok(rejected),
        }
    }

    async fn place_limit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
    ) -> Result<OrderResult> {
        match self
            .order_body(symbol, ORDER_TYPE_LIMIT, side, quantity, true)
            .await?
        {
            Ok(mut body) => {
                body["limit_price"] = json!(price.round_dp(6).normalize().to_string());
                self.submit_order(body, "limit order").await
            }
            Err(rejected) => Ok(rejected),
        }
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<bool> {
        let product_id = self.product_id_number(symbol).await?;
        let path = format!("/v2/orders/{}", order_id);
        let resp = self
            .request_json(
                Method::DELETE,
                &path,
                &[],
                Some(json!({ "product_id": product_id })),
            )
            .await?;
        Ok(succeeded(&resp))
    }

    async fn get_order_status(&self, _symbol: &str, order_id: &str) -> Result<OrderStatusInfo> {
        let path = format!("/v2/orders/{}", order_id);
        let resp = self.request_json(Method::GET, &path, &[], None).await?;
        if !succeeded(&resp) {
            return Ok(OrderStatusInfo::unknown(order_id));
        }
        Ok(parse_order_status(order_id, &resp))
    }

    async fn close_position(&self, symbol: &str) -> Result<CloseOutcome> {
        let position = self.get_position(symbol).await?;
        if !position.is_open() {
            return Ok(CloseOutcome::Flat);
        }
        let side = match position.side {
            crate::domain::PositionSide::Long => OrderSide::Sell,
            _ => OrderSide::Buy,
        };
        let result = self
            .place_market_order(symbol, side, position.size, true)
            .await?;
        Ok(CloseOutcome::Submitted(result))
    }

    async fn get_product_id(&self, symbol: &str) -> Result<String> {
        if let Some(id) = self.product_cache.read().await.get(symbol) {
            return Ok(id.clone());
        }

        let resp = self
            .request_json(
                Method::GET,
                "/v2/products",
                &[("contract_type", "perpetual_futures".to_string())],
                None,
            )
            .await?;

        let products = resp
            .get("result")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let id = products
            .iter()
            .find(|p| p.get("symbol").and_then(Value::as_str) == Some(symbol))
            .and_then(|p| id_field(p, &["id"]))
            .ok_or_else(|| {
                BotError::Validation(format!("Delta: product not found for symbol {}", symbol))
            })?;

        self.product_cache
            .write()
            .await
            .insert(symbol.to_string(), id.clone());
        Ok(id)
    }
}
