use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::domain::{CloseOutcome, OrderResult, OrderSide, OrderStatusInfo, PositionInfo};
use crate::error::{BotError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VenueKind {
    /// Delta Exchange India testnet, whole contracts
    #[default]
    DeltaDemo,
    /// CoinSwitch PRO futures, fractional quantities
    #[serde(rename = "coinswitch_live")]
    CoinSwitchLive,
}

impl VenueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DeltaDemo => "delta_demo",
            Self::CoinSwitchLive => "coinswitch_live",
        }
    }

    /// Whether order quantities must be whole contracts
    pub fn whole_contracts(&self) -> bool {
        matches!(self, Self::DeltaDemo)
    }
}

impl std::fmt::Display for VenueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for VenueKind {
    type Err = &'static str;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "delta_demo" | "delta" | "demo" => Ok(Self::DeltaDemo),
            "coinswitch_live" | "coinswitch" | "live" => Ok(Self::CoinSwitchLive),
            _ => Err("invalid venue; expected delta_demo|coinswitch_live"),
        }
    }
}

pub fn parse_venue_kind(raw: &str) -> Result<VenueKind> {
    VenueKind::from_str(raw).map_err(|e| BotError::Validation(e.to_string()))
}

/// Uniform interface over a perpetual-futures venue.
///
/// Implementations never retry; wrap them in [`super::RetryingVenue`].
/// A transport or remote failure is an `Err`. A venue refusing an order is
/// `Ok(OrderResult { success: false, .. })`.
#[async_trait]
pub trait VenueAdapter: Send + Sync {
    fn kind(&self) -> VenueKind;

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()>;

    async fn get_position(&self, symbol: &str) -> Result<PositionInfo>;

    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        reduce_only: bool,
    ) -> Result<OrderResult>;

    /// Reduce-only stop-market order triggered at `stop_price`
    async fn place_stop_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        stop_price: Decimal,
    ) -> Result<OrderResult>;

    /// Reduce-only limit order resting at `price`
    async fn place_limit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
    ) -> Result<OrderResult>;

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<bool>;

    async fn get_order_status(&self, symbol: &str, order_id: &str) -> Result<OrderStatusInfo>;

    /// Market-close whatever position the venue reports for `symbol`
    async fn close_position(&self, symbol: &str) -> Result<CloseOutcome>;

    async fn get_product_id(&self, symbol: &str) -> Result<String>;
}
