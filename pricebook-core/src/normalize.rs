//! Batch normalizer: raw producer payload → per-symbol date → price maps.
//!
//! Pure transformation. No disk I/O and no knowledge of the store. The shape
//! of the whole payload is checked up front (a wrong shape rejects the batch);
//! individual candles that fail to parse are skipped and reported.

use crate::candle::{CandleError, RawCandle};
use crate::error::{Result, StoreError};
use crate::record::{PriceRecord, RecordShape, StoredPrice};
use serde_json::Value;
use std::collections::BTreeMap;

/// Date key → stored value for one symbol.
pub type PriceMap = BTreeMap<String, StoredPrice>;

/// How a batch payload is laid out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchKind {
    /// JSON array of candles; the symbol is supplied out of band.
    Single(String),
    /// JSON object mapping symbol → array of candles.
    Multi,
}

/// A candle that was dropped during normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedRecord {
    pub symbol: String,
    /// Position of the candle in the symbol's input array.
    pub index: usize,
    pub reason: CandleError,
}

/// Output of normalizing one batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedBatch {
    pub symbols: BTreeMap<String, PriceMap>,
    pub skipped: Vec<SkippedRecord>,
    /// Number of raw candles inspected, including skipped ones.
    pub candles_seen: usize,
}

impl NormalizedBatch {
    /// Number of dated entries across all symbols.
    pub fn record_count(&self) -> usize {
        self.symbols.values().map(|m| m.len()).sum()
    }

    pub fn symbol_count(&self) -> usize {
        self.symbols.len()
    }
}

/// Normalize a raw batch according to its declared layout.
pub fn normalize_batch(raw: &Value, kind: &BatchKind, shape: RecordShape) -> Result<NormalizedBatch> {
    let mut batch = NormalizedBatch::default();

    match kind {
        BatchKind::Single(symbol) => {
            let candles = raw.as_array().ok_or_else(|| {
                StoreError::InvalidBatchShape(format!(
                    "expected a JSON array of candles for {symbol}, found {}",
                    json_kind(raw)
                ))
            })?;
            push_symbol(&mut batch, symbol, candles, shape);
        }
        BatchKind::Multi => {
            let by_symbol = raw.as_object().ok_or_else(|| {
                StoreError::InvalidBatchShape(format!(
                    "expected a JSON object of symbol → candles, found {}",
                    json_kind(raw)
                ))
            })?;
            // Validate every entry before normalizing any of them.
            for (symbol, candles) in by_symbol {
                if !candles.is_array() {
                    return Err(StoreError::InvalidBatchShape(format!(
                        "candles for {symbol} must be an array, found {}",
                        json_kind(candles)
                    )));
                }
            }
            for (symbol, candles) in by_symbol {
                let candles = candles.as_array().map(Vec::as_slice).unwrap_or_default();
                push_symbol(&mut batch, symbol, candles, shape);
            }
        }
    }

    Ok(batch)
}

/// Normalize one symbol's candles. Later candles for the same date replace
/// earlier ones.
pub fn normalize_candles(candles: &[Value], shape: RecordShape) -> (PriceMap, Vec<(usize, CandleError)>) {
    let mut prices = PriceMap::new();
    let mut errors = Vec::new();

    for (index, value) in candles.iter().enumerate() {
        match normalize_candle(value, shape) {
            Ok((date, price)) => {
                prices.insert(date, price);
            }
            Err(reason) => errors.push((index, reason)),
        }
    }

    (prices, errors)
}

/// Normalize a single raw candle into its date key and stored value.
pub fn normalize_candle(value: &Value, shape: RecordShape) -> std::result::Result<(String, StoredPrice), CandleError> {
    let candle = RawCandle::from_value(value)?;
    let date = candle.date_key()?.to_string();

    let price = match shape {
        RecordShape::Close => StoredPrice::Close(candle.number("close")?),
        RecordShape::Ohlcv => StoredPrice::Ohlcv(PriceRecord {
            close: candle.number("close")?,
            open: candle.number("open")?,
            high: candle.number("high")?,
            low: candle.number("low")?,
            volume: candle.number("volume")?,
        }),
    };

    Ok((date, price))
}

fn push_symbol(batch: &mut NormalizedBatch, symbol: &str, candles: &[Value], shape: RecordShape) {
    batch.candles_seen += candles.len();
    let (prices, errors) = normalize_candles(candles, shape);
    batch
        .skipped
        .extend(errors.into_iter().map(|(index, reason)| SkippedRecord {
            symbol: symbol.to_string(),
            index,
            reason,
        }));
    // An empty map still registers the symbol in the store.
    batch.symbols.entry(symbol.to_string()).or_default().extend(prices);
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
