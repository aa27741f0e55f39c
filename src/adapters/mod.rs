pub mod coinswitch;
pub mod delta;
pub mod sqlite;
pub mod telegram;

pub use coinswitch::CoinSwitchClient;
pub use delta::DeltaClient;
pub use sqlite::SqliteLedger;
pub use telegram::{TelegramCommandSource, TelegramNotifier};

use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde_json::Value;
use sha2::Sha256;

use crate::error::{BotError, Result};

type HmacSha256 = Hmac<Sha256>;

pub(crate) static NULL: Value = Value::Null;

/// Hex-encoded HMAC-SHA256 of `payload` keyed by `secret`
pub(crate) fn hmac_sha256_hex(secret: &str, payload: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| BotError::Auth(format!("invalid API secret: {}", e)))?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// `?k=v&k2=v2`, or empty. Values are signed exactly as sent.
pub(crate) fn query_string(query: &[(&str, String)]) -> String {
    if query.is_empty() {
        return String::new();
    }
    let joined = query
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");
    format!("?{}", joined)
}

pub(crate) fn parse_decimalish(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(s) if !s.trim().is_empty() => s.trim().parse().ok(),
        Value::Number(n) => n.to_string().parse().ok(),
        _ => None,
    }
}

/// First key present in `root` that parses as a decimal
pub(crate) fn decimal_field(root: &Value, keys: &[&str]) -> Option<Decimal> {
    keys.iter()
        .find_map(|key| root.get(*key).and_then(parse_decimalish))
}

/// Order/product ids arrive as numbers or strings
pub(crate) fn id_field(root: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match root.get(*key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}
