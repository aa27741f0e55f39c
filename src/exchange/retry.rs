use async_trait::async_trait;
use rand::Rng;
use rust_decimal::Decimal;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, warn};

use crate::domain::{CloseOutcome, OrderResult, OrderSide, OrderStatusInfo, PositionInfo};
use crate::error::Result;

use super::{VenueAdapter, VenueKind};

const MIN_DELAY: Duration = Duration::from_millis(100);

/// Bounded exponential backoff with jitter
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    /// Random spread applied to each delay, in percent
    pub jitter_percent: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(1),
            jitter_percent: 20.0,
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (0-based). `spread` in [-1, 1]
    /// selects where in the jitter band the delay lands.
    pub fn delay_with_spread(&self, attempt: u32, spread: f64) -> Duration {
        let base = self.base_delay.as_secs_f64() * 2f64.powi(attempt.min(30) as i32);
        let jitter = base * (self.jitter_percent / 100.0) * spread.clamp(-1.0, 1.0);
        Duration::from_secs_f64((base + jitter).max(0.0)).max(MIN_DELAY)
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let spread = rand::thread_rng().gen_range(-1.0..=1.0);
        self.delay_with_spread(attempt, spread)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or
/// `max_attempts` is exhausted. The last error is returned.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, op_name: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match op().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(op = op_name, attempts = attempt + 1, "succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if !e.is_retryable() => {
                warn!(op = op_name, error = %e, "non-retryable error, giving up");
                return Err(e);
            }
            Err(e) => {
                if attempt + 1 >= max_attempts {
                    error!(
                        op = op_name,
                        attempts = attempt + 1,
                        error = %e,
                        "failed after all retry attempts"
                    );
                    return Err(e);
                }

                let delay = policy.delay_for(attempt);
                warn!(
                    op = op_name,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "attempt failed, retrying"
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Venue decorator that routes every call through a [`RetryPolicy`].
pub struct RetryingVenue {
    inner: Arc<dyn VenueAdapter>,
    policy: RetryPolicy,
}

impl RetryingVenue {
    pub fn new(inner: Arc<dyn VenueAdapter>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl VenueAdapter for RetryingVenue {
    fn kind(&self) -> VenueKind {
        self.inner.kind()
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()> {
        let inner = &self.inner;
        with_retry(&self.policy, "set_leverage", move || {
            inner.set_leverage(symbol, leverage)
        })
        .await
    }

    async fn get_position(&self, symbol: &str) -> Result<PositionInfo> {
        let inner = &self.inner;
        with_retry(&self.policy, "get_position", move || inner.get_position(symbol)).await
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        reduce_only: bool,
    ) -> Result<OrderResult> {
        let inner = &self.inner;
        with_retry(&self.policy, "place_market_order", move || {
            inner.place_market_order(symbol, side, quantity, reduce_only)
        })
        .await
    }

    async fn place_stop_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        stop_price: Decimal,
    ) -> Result<OrderResult> {
        let inner = &self.inner;
        with_retry(&self.policy, "place_stop_order", move || {
            inner.place_stop_order(symbol, side, quantity, stop_price)
        })
        .await
    }

    async fn place_limit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
        price: Decimal,
    ) -> Result<OrderResult> {
        let inner = &self.inner;
        with_retry(&self.policy, "place_limit_order", move || {
            inner.place_limit_order(symbol, side, quantity, price)
        })
        .await
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<bool> {
        let inner = &self.inner;
        with_retry(&self.policy, "cancel_order", move || {
            inner.cancel_order(symbol, order_id)
        })
        .await
    }

    async fn get_order_status(&self, symbol: &str, order_id: &str) -> Result<OrderStatusInfo> {
        let inner = &self.inner;
        with_retry(&self.policy, "get_order_status", move || {
            inner.get_order_status(symbol, order_id)
        })
        .await
    }

    async fn close_position(&self, symbol: &str) -> Result<CloseOutcome> {
        let inner = &self.inner;
        with_retry(&self.policy, "close_position", move || {
            inner.close_position(symbol)
        })
        .await
    }

    async fn get_product_id(&self, symbol: &str) -> Result<String> {
        let inner = &self.inner;
        with_retry(&self.policy, "get_product_id", move || {
            inner.get_product_id(symbol)
        })
        .await
    }
}
