//! Candle-boundary timing and cancellable waits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::watch;

/// Wall time for boundaries, plus a sleep the loop can race against shutdown
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    async fn sleep(&self, duration: Duration);
}

/// `Utc::now` with `tokio::time::sleep`
#[derive(Debug, Default, Clone)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// First multiple of `cycle_secs` strictly after `now`, in unix seconds
pub fn next_boundary_after(now: DateTime<Utc>, cycle_secs: u64) -> i64 {
    let cycle = cycle_secs.max(1) as i64;
    (now.timestamp().div_euclid(cycle) + 1) * cycle
}

/// Time left until unix second `boundary`; zero once it has passed
pub fn until(now: DateTime<Utc>, boundary: i64) -> Duration {
    let remaining_ms = boundary * 1000 - now.timestamp_millis();
    Duration::from_millis(remaining_ms.max(0) as u64)
}

/// Whether `boundary` passed more than `tolerance` before `now`
pub fn missed(now: DateTime<Utc>, boundary: i64, tolerance: Duration) -> bool {
    now.timestamp_millis() - boundary * 1000 > tolerance.as_millis() as i64
}

/// Sleep for `duration` unless shutdown is signalled first.
/// Returns `true` when the loop should stop.
pub async fn wait_or_shutdown(
    clock: &dyn Clock,
    shutdown: &mut watch::Receiver<bool>,
    duration: Duration,
) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    tokio::select! {
        _ = clock.sleep(duration) => false,
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}
