//! Raw candle records as delivered by a producer.
//!
//! Producers hand over loosely typed JSON: numeric fields may be JSON numbers
//! or decimal strings (`"16.384"`), and extra fields such as `turnover` are
//! ignored. This module is the only place that ambiguity is tolerated;
//! everything downstream works on strict `f64`.

use chrono::NaiveDate;
use serde_json::{Map, Value};
use thiserror::Error;

/// Separator between the date and time parts of an ISO-8601 timestamp.
pub const TIME_SEPARATOR: char = 'T';

/// Why a single candle could not be normalized.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CandleError {
    #[error("record is not a JSON object")]
    NotAnObject,

    #[error("missing field '{0}'")]
    MissingField(&'static str),

    #[error("field '{field}' is not numeric: {value}")]
    NotNumeric { field: &'static str, value: String },

    #[error("unusable timestamp: {0}")]
    BadTimestamp(String),
}

/// Borrowed view over one raw candle object.
#[derive(Debug, Clone, Copy)]
pub struct RawCandle<'a> {
    fields: &'a Map<String, Value>,
}

impl<'a> RawCandle<'a> {
    pub fn from_value(value: &'a Value) -> Result<Self, CandleError> {
        value
            .as_object()
            .map(|fields| Self { fields })
            .ok_or(CandleError::NotAnObject)
    }

    /// Calendar date of this candle, e.g. `"2022-02-25"` for
    /// `"2022-02-25T05:00:00Z"`.
    pub fn date_key(&self) -> Result<&'a str, CandleError> {
        let ts = match self.fields.get("timestamp") {
            None | Some(Value::Null) => return Err(CandleError::MissingField("timestamp")),
            Some(Value::String(s)) => s.as_str(),
            Some(other) => return Err(CandleError::BadTimestamp(other.to_string())),
        };
        date_key(ts)
    }

    /// Parse a required numeric field.
    pub fn number(&self, field: &'static str) -> Result<f64, CandleError> {
        match self.fields.get(field) {
            None | Some(Value::Null) => Err(CandleError::MissingField(field)),
            Some(value) => parse_loose_f64(value).ok_or_else(|| CandleError::NotNumeric {
                field,
                value: value.to_string(),
            }),
        }
    }
}

/// Truncate an ISO-8601 timestamp to its date component.
///
/// Everything before the first `T` (or space, for `"2022-02-25 05:00:00"`
/// style producers), which must be a calendar date written as `YYYY-MM-DD`.
/// No timezone conversion.
pub fn date_key(timestamp: &str) -> Result<&str, CandleError> {
    let trimmed = timestamp.trim();
    let date = trimmed
        .split(|c| c == TIME_SEPARATOR || c == ' ')
        .next()
        .unwrap_or_default();
    if date.len() != 10 || NaiveDate::parse_from_str(date, "%Y-%m-%d").is_err() {
        return Err(CandleError::BadTimestamp(timestamp.to_string()));
    }
    Ok(date)
}

/// Accept a JSON number or a decimal string. Non-finite values are rejected.
pub fn parse_loose_f64(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    parsed.is_finite().then_some(parsed)
}
