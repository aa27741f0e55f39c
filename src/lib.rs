pub mod adapters;
pub mod bot;
pub mod cli;
pub mod collector;
pub mod config;
pub mod domain;
pub mod error;
pub mod exchange;
pub mod notify;
pub mod persistence;
pub mod strategy;

pub use bot::{build_bot, TradingBot};
pub use config::AppConfig;
pub use error::{BotError, Result};
