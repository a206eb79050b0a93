//! Core types used throughout quote-relay
//!
//! Defines the normalized quote record, its publishable fields and the
//! rounding applied before anything is compared or published.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ProviderError;

/// Decimal places kept for `price`
pub const PRICE_DECIMALS: u32 = 2;
/// Decimal places kept for `change` (percent)
pub const CHANGE_DECIMALS: u32 = 1;

/// Round half up at a fixed number of decimals.
///
/// `floor(value * 10^decimals + 0.5) / 10^decimals`. Feeding the output back
/// in returns the same value.
pub fn round_half_up(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor + 0.5).floor() / factor
}

/// How changes are published downstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishMode {
    /// One retained message per changed field under `<root>/<name>/<field>`
    Fields,
    /// The whole quote under `<root>/<name>` whenever any field changed
    Record,
}

impl Default for PublishMode {
    fn default() -> Self {
        PublishMode::Fields
    }
}

impl PublishMode {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "fields" | "field" => Some(PublishMode::Fields),
            "record" | "whole" => Some(PublishMode::Record),
            _ => None,
        }
    }
}

impl fmt::Display for PublishMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishMode::Fields => write!(f, "fields"),
            PublishMode::Record => write!(f, "record"),
        }
    }
}

/// Un-normalized quote as reported by a provider
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawQuote {
    pub display_name: Option<String>,
    pub quote_type: Option<String>,
    pub currency: Option<String>,
    pub market_state: Option<String>,
    pub price: Option<f64>,
    /// Percent change, e.g. `1.23` for +1.23%
    pub change_percent: Option<f64>,
    /// Provider timestamp in epoch seconds
    pub time: Option<i64>,
}

/// Normalized, rounded snapshot of one symbol at one point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market: Option<String>,
    pub price: f64,
    pub change: f64,
    pub time: DateTime<Utc>,
}

impl Quote {
    /// Normalize a provider record. Missing or non-finite numbers are malformed.
    pub fn from_raw(symbol: &str, raw: RawQuote) -> Result<Self, ProviderError> {
        let malformed = |reason: &str| ProviderError::Malformed {
            symbol: symbol.to_string(),
            reason: reason.to_string(),
        };

        let price = raw
            .price
            .filter(|p| p.is_finite())
            .ok_or_else(|| malformed("missing or invalid price"))?;
        let change = raw
            .change_percent
            .filter(|c| c.is_finite())
            .ok_or_else(|| malformed("missing or invalid change"))?;
        let time = raw
            .time
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
            .ok_or_else(|| malformed("missing or invalid time"))?;

        Ok(Self {
            symbol: symbol.to_string(),
            name: raw.display_name,
            kind: raw.quote_type,
            currency: raw.currency,
            market: raw.market_state,
            price: round_half_up(price, PRICE_DECIMALS),
            change: round_half_up(change, CHANGE_DECIMALS),
            time,
        })
    }

    /// JSON value of a single field, as published in per-field mode
    pub fn field_value(&self, field: QuoteField) -> serde_json::Value {
        use serde_json::Value;

        let opt = |v: &Option<String>| v.clone().map(Value::String).unwrap_or(Value::Null);
        match field {
            QuoteField::Symbol => Value::String(self.symbol.clone()),
            QuoteField::Name => opt(&self.name),
            QuoteField::Type => opt(&self.kind),
            QuoteField::Currency => opt(&self.currency),
            QuoteField::Market => opt(&self.market),
            QuoteField::Price => serde_json::json!(self.price),
            QuoteField::Change => serde_json::json!(self.change),
            QuoteField::Time => serde_json::json!(self.time),
        }
    }

    /// Fields whose value differs from `previous`, in `QuoteField::ALL` order
    pub fn changed_fields(&self, previous: &Quote) -> Vec<QuoteField> {
        QuoteField::ALL
            .iter()
            .copied()
            .filter(|&f| self.field_value(f) != previous.field_value(f))
            .collect()
    }
}

/// Publishable quote fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuoteField {
    Symbol,
    Name,
    Type,
    Currency,
    Market,
    Price,
    Change,
    Time,
}

impl QuoteField {
    pub const ALL: [QuoteField; 8] = [
        QuoteField::Symbol,
        QuoteField::Name,
        QuoteField::Type,
        QuoteField::Currency,
        QuoteField::Market,
        QuoteField::Price,
        QuoteField::Change,
        QuoteField::Time,
    ];

    /// Topic segment for this field
    pub fn as_str(&self) -> &'static str {
        match self {
            QuoteField::Symbol => "symbol",
            QuoteField::Name => "name",
            QuoteField::Type => "type",
            QuoteField::Currency => "currency",
            QuoteField::Market => "market",
            QuoteField::Price => "price",
            QuoteField::Change => "change",
            QuoteField::Time => "time",
        }
    }
}

impl fmt::Display for QuoteField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(price: f64, change: f64, time: i64) -> RawQuote {
        RawQuote {
            display_name: Some("Apple Inc.".to_string()),
            quote_type: Some("EQUITY".to_string()),
            currency: Some("USD".to_string()),
            market_state: Some("REGULAR".to_string()),
            price: Some(price),
            change_percent: Some(change),
            time: Some(time),
        }
    }

    #[test]
    fn round_half_up_matches_fixed_precision() {
        assert_eq!(round_half_up(150.004, 2), 150.0);
        assert_eq!(round_half_up(151.006, 2), 151.01);
        assert_eq!(round_half_up(1.23, 1), 1.2);
        assert_eq!(round_half_up(1.25, 1), 1.3);
        assert_eq!(round_half_up(-1.25, 1), -1.2);
    }

    #[test]
    fn round_half_up_is_a_fixed_point() {
        for raw in [0.0, 0.015, 1.005, 99.995, 150.004, 151.006, 12345.678, -3.14159] {
            for decimals in [1, 2] {
                let once = round_half_up(raw, decimals);
                assert_eq!(round_half_up(once, decimals), once, "raw={raw} decimals={decimals}");
            }
        }
    }

    #[test]
    fn from_raw_rounds_price_and_change() {
        let quote = Quote::from_raw("AAPL", raw(150.004, 1.23, 1_700_000_000)).unwrap();
        assert_eq!(quote.symbol, "AAPL");
        assert_eq!(quote.price, 150.0);
        assert_eq!(quote.change, 1.2);
        assert_eq!(quote.time.timestamp(), 1_700_000_000);
        assert_eq!(quote.name.as_deref(), Some("Apple Inc."));
    }

    #[test]
    fn from_raw_rejects_missing_price() {
        let mut r = raw(1.0, 1.0, 1_700_000_000);
        r.price = None;
        let err = Quote::from_raw("AAPL", r).unwrap_err();
        assert!(matches!(err, ProviderError::Malformed { ref symbol, .. } if symbol == "AAPL"));
    }

    #[test]
    fn from_raw_rejects_non_finite_change() {
        let err = Quote::from_raw("AAPL", raw(1.0, f64::NAN, 1_700_000_000)).unwrap_err();
        assert!(matches!(err, ProviderError::Malformed { .. }));
    }

    #[test]
    fn changed_fields_ignores_sub_precision_noise() {
        let a = Quote::from_raw("AAPL", raw(150.004, 1.23, 1_700_000_000)).unwrap();
        let b = Quote::from_raw("AAPL", raw(150.001, 1.21, 1_700_000_000)).unwrap();
        assert!(b.changed_fields(&a).is_empty());

        let c = Quote::from_raw("AAPL", raw(151.006, 1.23, 1_700_000_000)).unwrap();
        assert_eq!(c.changed_fields(&a), vec![QuoteField::Price]);
    }

    #[test]
    fn quote_serializes_type_field_name() {
        let quote = Quote::from_raw("AAPL", raw(150.0, 1.0, 1_700_000_000)).unwrap();
        let json = serde_json::to_value(&quote).unwrap();
        assert_eq!(json["type"], "EQUITY");
        assert_eq!(json["price"], 150.0);
        assert!(json.get("kind").is_none());
    }

    #[test]
    fn publish_mode_parsing() {
        assert_eq!(PublishMode::from_str("Fields"), Some(PublishMode::Fields));
        assert_eq!(PublishMode::from_str("record"), Some(PublishMode::Record));
        assert_eq!(PublishMode::from_str("bogus"), None);
        assert_eq!(PublishMode::default(), PublishMode::Fields);
    }
}
