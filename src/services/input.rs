//! Lenient deserializers for request bodies.
//!
//! Admin screens post ids and amounts either as JSON numbers or as strings
//! taken straight from form inputs. Both are accepted here.

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::str::FromStr;

/// Integer from a number or a numeric string
pub fn value_to_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Decimal from a number or a numeric string
pub fn value_to_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => Decimal::from_str(&n.to_string())
            .or_else(|_| Decimal::from_scientific(&n.to_string()))
            .ok(),
        Value::String(s) if !s.trim().is_empty() => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

/// `Option<i64>` field; unparsable values become `None`
pub fn opt_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(value_to_i64))
}

/// `Option<Decimal>` field; unparsable values are rejected
pub fn opt_decimal<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(value) => value_to_decimal(&value)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid amount: {}", value))),
    }
}

/// Trimmed string, empty becomes `None`
pub fn clean(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct Probe {
        #[serde(default, deserialize_with = "opt_i64")]
        id: Option<i64>,
        #[serde(default, deserialize_with = "opt_decimal")]
        amount: Option<Decimal>,
    }

    #[test]
    fn test_numbers_and_strings_are_accepted() {
        let p: Probe = serde_json::from_value(json!({ "id": "42", "amount": 1500000 })).unwrap();
        assert_eq!(p.id, Some(42));
        assert_eq!(p.amount, Some(Decimal::from(1_500_000)));

        let p: Probe = serde_json::from_value(json!({ "id": 7, "amount": "12.5" })).unwrap();
        assert_eq!(p.id, Some(7));
        assert_eq!(p.amount, Some(Decimal::new(125, 1)));
    }

    #[test]
    fn test_missing_and_blank_values() {
        let p: Probe = serde_json::from_value(json!({})).unwrap();
        assert_eq!(p.id, None);
        assert_eq!(p.amount, None);

        let p: Probe = serde_json::from_value(json!({ "id": "abc", "amount": "" })).unwrap();
        assert_eq!(p.id, None);
        assert_eq!(p.amount, None);
    }

    #[test]
    fn test_bad_amount_is_rejected() {
        assert!(serde_json::from_value::<Probe>(json!({ "amount": "lots" })).is_err());
    }

    #[test]
    fn test_clean() {
        assert_eq!(clean(Some("  hi ")).as_deref(), Some("hi"));
        assert_eq!(clean(Some("   ")), None);
        assert_eq!(clean(None), None);
    }
}
