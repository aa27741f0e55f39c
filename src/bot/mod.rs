//! Position lifecycle controller.
//!
//! One task owns the [`RuntimeState`]; the entry pipeline, reconciliation,
//! trailing and command handlers borrow it for the duration of a call.

pub mod commands;
pub mod context;
pub mod controller;
pub mod entry;
pub mod reconcile;
pub mod scheduler;
pub mod trailing;

#[cfg(test)]
mod test_support;

pub use commands::BotCommand;
pub use context::{halt, BotContext, BotSettings, RuntimeState};
pub use controller::{build_bot, TradingBot};
pub use entry::{execute_entry, EntryOutcome};
pub use reconcile::{classify_by_proximity, reconcile, ReconcileOutcome};
pub use scheduler::{next_boundary_after, Clock, SystemClock};
pub use trailing::{manage_trailing_stop, trail_candidate, TrailOutcome};
