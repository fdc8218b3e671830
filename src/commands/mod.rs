//! JSON command handlers.
//!
//! Each handler takes the raw `Option<serde_json::Value>` argument sent by
//! the front end (camelCase keys, snake_case accepted as aliases) and returns
//! `Result<serde_json::Value, String>`. Errors are `"<CODE>: <message>"`.

pub mod reports;
pub mod sales;
pub mod shifts;

use rust_decimal::Decimal;
use serde::Serialize;

use crate::error::PosError;
use crate::money;

/// Wrap a bare string argument as `{ key: value }`; pass objects through.
pub(crate) fn object_payload(arg0: Option<serde_json::Value>, key: &str) -> serde_json::Value {
    match arg0 {
        Some(serde_json::Value::String(s)) => {
            let mut map = serde_json::Map::new();
            map.insert(key.to_string(), serde_json::Value::String(s));
            serde_json::Value::Object(map)
        }
        Some(v) => v,
        None => serde_json::json!({}),
    }
}

/// Deserialize a payload, reporting failures as `INVALID_INPUT`.
pub(crate) fn parse_payload<T: serde::de::DeserializeOwned>(
    payload: serde_json::Value,
    what: &str,
) -> Result<T, String> {
    serde_json::from_value(payload)
        .map_err(|e| String::from(PosError::InvalidInput(format!("Invalid {what} payload: {e}"))))
}

/// An amount coming from JSON. NaN and infinities are rejected.
pub(crate) fn money_field(value: f64, field: &str) -> Result<Decimal, String> {
    money::to_decimal(value).ok_or_else(|| {
        String::from(PosError::InvalidInput(format!(
            "{field} must be a finite number"
        )))
    })
}

pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub(crate) fn require(value: Option<String>, name: &str) -> Result<String, String> {
    non_empty(value).ok_or_else(|| String::from(PosError::InvalidInput(format!("Missing {name}"))))
}

pub(crate) fn to_json<T: Serialize>(value: &T) -> Result<serde_json::Value, String> {
    serde_json::to_value(value).map_err(|e| String::from(PosError::Storage(format!("serialize: {e}"))))
}

#[cfg(test)]
mod dto_tests {
    use super::*;

    #[test]
    fn object_payload_wraps_strings() {
        let payload = object_payload(Some(serde_json::json!("shift-1")), "shiftId");
        assert_eq!(payload["shiftId"], "shift-1");
        let passthrough = object_payload(Some(serde_json::json!({ "a": 1 })), "shiftId");
        assert_eq!(passthrough["a"], 1);
        assert_eq!(object_payload(None, "x"), serde_json::json!({}));
    }

    #[test]
    fn money_field_rejects_non_finite() {
        assert_eq!(money_field(12.345, "total").unwrap(), "12.35".parse::<Decimal>().unwrap());
        let err = money_field(f64::NAN, "total").unwrap_err();
        assert!(err.starts_with("INVALID_INPUT"), "{err}");
    }

    #[test]
    fn require_trims_and_rejects_blank() {
        assert_eq!(require(Some(" s-1 ".into()), "storeId").unwrap(), "s-1");
        assert!(require(Some("  ".into()), "storeId")
            .unwrap_err()
            .contains("Missing storeId"));
    }
}
