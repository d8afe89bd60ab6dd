//! Candle producer trait and batch collection.
//!
//! The producer abstracts over market-data clients so the merge engine never
//! talks to a network itself. Producers handle their own rate limiting and
//! pagination; this module only orchestrates calls and assembles the
//! multi-symbol batch document that `merge` consumes.

use crate::error::{Result, StoreError};
use crate::store::{write_atomic, PriceStore};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Symbols already holding more than this many dated entries are not fetched
/// again by [`collect_batch`].
pub const DEFAULT_MIN_EXISTING: usize = 10;

/// Source of raw candles for one symbol.
pub trait CandleProducer {
    /// Human-readable name of this producer.
    fn name(&self) -> &str;

    /// Fetch up to `depth` most recent daily candles for `symbol`, as raw
    /// JSON candle objects.
    fn fetch(&self, symbol: &str, depth: usize) -> Result<Vec<Value>>;
}

/// Producer backed by candle arrays held in memory.
#[derive(Debug, Clone, Default)]
pub struct StaticProducer {
    candles: HashMap<String, Vec<Value>>,
}

impl StaticProducer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_symbol(mut self, symbol: impl Into<String>, candles: Vec<Value>) -> Self {
        self.candles.insert(symbol.into(), candles);
        self
    }
}

impl CandleProducer for StaticProducer {
    fn name(&self) -> &str {
        "static"
    }

    fn fetch(&self, symbol: &str, depth: usize) -> Result<Vec<Value>> {
        let candles = self.candles.get(symbol).ok_or_else(|| StoreError::Producer {
            producer: self.name().to_string(),
            symbol: symbol.to_string(),
            message: "no candles for symbol".into(),
        })?;
        Ok(tail(candles, depth))
    }
}

/// Producer that replays previously fetched candle dumps, one
/// `{dir}/{symbol}.json` array per symbol.
#[derive(Debug, Clone)]
pub struct DirectoryProducer {
    dir: PathBuf,
}

impl DirectoryProducer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn symbol_path(&self, symbol: &str) -> PathBuf {
        self.dir.join(format!("{symbol}.json"))
    }
}

impl CandleProducer for DirectoryProducer {
    fn name(&self) -> &str {
        "directory"
    }

    fn fetch(&self, symbol: &str, depth: usize) -> Result<Vec<Value>> {
        let fail = |message: String| StoreError::Producer {
            producer: self.name().to_string(),
            symbol: symbol.to_string(),
            message,
        };
        let path = self.symbol_path(symbol);
        let content =
            fs::read_to_string(&path).map_err(|e| fail(format!("read {}: {e}", path.display())))?;
        match serde_json::from_str::<Value>(&content) {
            Ok(Value::Array(candles)) => Ok(tail(&candles, depth)),
            Ok(_) => Err(fail(format!("{} is not a candle array", path.display()))),
            Err(e) => Err(fail(format!("parse {}: {e}", path.display()))),
        }
    }
}

/// Outcome of assembling a batch from a producer.
#[derive(Debug, Default)]
pub struct CollectSummary {
    /// Multi-symbol batch document: symbol → raw candles.
    pub batch: Map<String, Value>,
    pub fetched: Vec<String>,
    /// Symbols left out because the store already covers them.
    pub already_stored: Vec<String>,
    pub errors: Vec<(String, StoreError)>,
}

impl CollectSummary {
    pub fn all_succeeded(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_batch(self) -> Value {
        Value::Object(self.batch)
    }
}

/// Fetch each symbol and assemble a multi-symbol batch.
///
/// Symbols with more than `min_existing` entries in `existing` are skipped.
/// A failing symbol is recorded and the rest are still collected.
pub fn collect_batch(
    producer: &dyn CandleProducer,
    symbols: &[String],
    depth: usize,
    existing: Option<&PriceStore>,
    min_existing: usize,
) -> CollectSummary {
    let mut summary = CollectSummary::default();
    let total = symbols.len();

    for (i, symbol) in symbols.iter().enumerate() {
        let stored = existing
            .and_then(|store| store.prices(symbol))
            .map_or(0, |prices| prices.len());
        if stored > min_existing {
            info!(symbol = %symbol, stored, "already stored, skipping");
            summary.already_stored.push(symbol.clone());
            continue;
        }

        match producer.fetch(symbol, depth) {
            Ok(candles) => {
                info!(
                    producer = producer.name(),
                    symbol = %symbol,
                    candles = candles.len(),
                    "[{}/{}] fetched",
                    i + 1,
                    total
                );
                summary.batch.insert(symbol.clone(), Value::Array(candles));
                summary.fetched.push(symbol.clone());
            }
            Err(e) => {
                warn!(producer = producer.name(), symbol = %symbol, error = %e, "fetch failed");
                summary.errors.push((symbol.clone(), e));
            }
        }
    }

    summary
}

/// Write a batch document for a later merge.
pub fn write_batch_file(path: &Path, batch: &Value) -> Result<()> {
    let json = serde_json::to_vec_pretty(batch)?;
    write_atomic(path, &json).map_err(|e| StoreError::persistence(path, e))
}

fn tail(candles: &[Value], depth: usize) -> Vec<Value> {
    candles[candles.len().saturating_sub(depth)..].to_vec()
}
