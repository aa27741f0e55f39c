use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Direction;

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }

    /// Side that opens a position in `direction`.
    pub fn opening(direction: Direction) -> Self {
        match direction {
            Direction::Long => OrderSide::Buy,
            Direction::Short => OrderSide::Sell,
        }
    }

    /// Side that reduces a position in `direction` (stops, targets, closes).
    pub fn closing(direction: Direction) -> Self {
        match direction {
            Direction::Long => OrderSide::Sell,
            Direction::Short => OrderSide::Buy,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Result of an order placement call.
///
/// `success` is only reported together with a venue order id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderResult {
    pub success: bool,
    pub order_id: Option<String>,
    pub fill_price: Option<Decimal>,
    pub filled_quantity: Option<Decimal>,
    pub error: Option<String>,
}

impl OrderResult {
    pub fn accepted(
        order_id: impl Into<String>,
        fill_price: Option<Decimal>,
        filled_quantity: Option<Decimal>,
    ) -> Self {
        Self {
            success: true,
            order_id: Some(order_id.into()),
            fill_price,
            filled_quantity,
            error: None,
        }
    }

    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            success: false,
            order_id: None,
            fill_price: None,
            filled_quantity: None,
            error: Some(error.into()),
        }
    }

    /// Order id, only when the venue accepted the order.
    pub fn accepted_id(&self) -> Option<&str> {
        if self.success {
            self.order_id.as_deref().filter(|id| !id.is_empty())
        } else {
            None
        }
    }

    pub fn error_text(&self) -> &str {
        self.error.as_deref().unwrap_or("unknown error")
    }
}

/// Outcome of a market close request.
#[derive(Debug, Clone, PartialEq)]
pub enum CloseOutcome {
    /// The venue reported no open position; nothing was sent
    Flat,
    /// A reduce-only market order was sent
    Submitted(OrderResult),
}

/// Order lifecycle as seen by reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderState {
    Open,
    Filled,
    Cancelled,
    Unknown,
}

impl OrderState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::Open => "open",
            OrderState::Filled => "filled",
            OrderState::Cancelled => "cancelled",
            OrderState::Unknown => "unknown",
        }
    }
}

/// Status of a single venue order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderStatusInfo {
    pub order_id: String,
    pub status: OrderState,
    /// Only present when `status` is `Filled`
    pub fill_price: Option<Decimal>,
}

impl OrderStatusInfo {
    pub fn new(order_id: impl Into<String>, status: OrderState, fill_price: Option<Decimal>) -> Self {
        let fill_price = if status == OrderState::Filled {
            fill_price
        } else {
            None
        };
        Self {
            order_id: order_id.into(),
            status,
            fill_price,
        }
    }

    pub fn unknown(order_id: impl Into<String>) -> Self {
        Self::new(order_id, OrderState::Unknown, None)
    }

    pub fn is_filled(&self) -> bool {
        self.status == OrderState::Filled
    }

    pub fn is_open(&self) -> bool {
        self.status == OrderState::Open
    }
}

/// Venue-side direction of a position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
    Flat,
}

impl PositionSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSide::Long => "long",
            PositionSide::Short => "short",
            PositionSide::Flat => "flat",
        }
    }
}

/// The venue's authoritative view of the position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionInfo {
    pub symbol: String,
    pub side: PositionSide,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub unrealized_pnl: Decimal,
}

impl PositionInfo {
    pub fn flat(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            side: PositionSide::Flat,
            size: Decimal::ZERO,
            entry_price: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
        }
    }

    /// Build from a signed size (positive = long, negative = short).
    pub fn from_signed_size(
        symbol: impl Into<String>,
        signed_size: Decimal,
        entry_price: Decimal,
        unrealized_pnl: Decimal,
    ) -> Self {
        if signed_size.is_zero() {
            return Self::flat(symbol);
        }
        let side = if signed_size > Decimal::ZERO {
            PositionSide::Long
        } else {
            PositionSide::Short
        };
        Self {
            symbol: symbol.into(),
            side,
            size: signed_size.abs(),
            entry_price,
            unrealized_pnl,
        }
    }

    pub fn is_open(&self) -> bool {
        self.side != PositionSide::Flat && self.size > Decimal::ZERO
    }
}
