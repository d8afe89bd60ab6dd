//! Stored price values.
//!
//! Two on-disk shapes coexist: the legacy close-only number and the full
//! OHLCV object. Both deserialize into [`StoredPrice`]; which one new merges
//! write is selected by [`RecordShape`]. Entries written by older tools are
//! read one by one through [`StoredPrice::from_stored_value`].

use crate::candle::parse_loose_f64;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Normalized daily OHLCV record. Field order matches the store document.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    pub close: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub volume: f64,
}

/// One dated entry in the store.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoredPrice {
    /// Full record, written by current merges.
    Ohlcv(PriceRecord),
    /// Legacy close-only value.
    Close(f64),
}

impl StoredPrice {
    pub fn close(&self) -> f64 {
        match self {
            StoredPrice::Ohlcv(r) => r.close,
            StoredPrice::Close(c) => *c,
        }
    }

    pub fn record(&self) -> Option<&PriceRecord> {
        match self {
            StoredPrice::Ohlcv(r) => Some(r),
            StoredPrice::Close(_) => None,
        }
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, StoredPrice::Close(_))
    }

    /// Read one dated entry from a store document.
    ///
    /// Accepts a number, a complete OHLCV object, or an object that only
    /// carries a usable `close` (kept as a close-only entry). Numeric strings
    /// are accepted. Anything else, `null` included, yields `None`.
    pub fn from_stored_value(value: &Value) -> Option<StoredPrice> {
        match value {
            Value::Number(_) | Value::String(_) => parse_loose_f64(value).map(StoredPrice::Close),
            Value::Object(fields) => {
                let field = |name: &str| fields.get(name).and_then(parse_loose_f64);
                let close = field("close")?;
                match (field("open"), field("high"), field("low"), field("volume")) {
                    (Some(open), Some(high), Some(low), Some(volume)) => Some(StoredPrice::Ohlcv(PriceRecord {
                        close,
                        open,
                        high,
                        low,
                        volume,
                    })),
                    _ => Some(StoredPrice::Close(close)),
                }
            }
            _ => None,
        }
    }
}

impl From<PriceRecord> for StoredPrice {
    fn from(r: PriceRecord) -> Self {
        StoredPrice::Ohlcv(r)
    }
}

/// Which value shape merges produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordShape {
    #[default]
    Ohlcv,
    Close,
}

impl fmt::Display for RecordShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordShape::Ohlcv => f.write_str("ohlcv"),
            RecordShape::Close => f.write_str("close"),
        }
    }
}

impl FromStr for RecordShape {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ohlcv" | "full" => Ok(RecordShape::Ohlcv),
            "close" | "close-only" => Ok(RecordShape::Close),
            other => Err(format!("unknown record shape '{other}' (expected ohlcv or close)")),
        }
    }
}
