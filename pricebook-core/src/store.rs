//! The consolidated price store.
//!
//! Layout: one JSON document, `{ symbol: { "YYYY-MM-DD": price } }`, where
//! each price is either a legacy close-only number or a full OHLCV object.
//!
//! Features:
//! - Atomic writes (write to `.tmp`, fsync, rename into place)
//! - Entries are read one by one: an unreadable value (e.g. `null`) is dropped
//!   and reported, the rest of the document is kept
//! - Documents that are not JSON, or not an object of objects, are replaced by
//!   an empty store instead of aborting the run; a copy can be quarantined
//!   first (`{file}.corrupt-{timestamp}`)
//! - Content fingerprint (blake3) taken at load and re-checked before the
//!   rename, so a concurrent writer is detected instead of silently overwritten

use crate::error::{Result, StoreError};
use crate::normalize::{NormalizedBatch, PriceMap};
use crate::record::StoredPrice;
use chrono::NaiveDate;
use crate::normalize::json_kind;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Hash of the store bytes as last seen on disk.
pub type Fingerprint = blake3::Hash;

/// In-memory consolidated store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PriceStore {
    symbols: BTreeMap<String, PriceMap>,
}

/// What `load` found on disk.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadStatus {
    /// No store file yet; starting empty.
    Missing,
    /// Parsed successfully.
    Loaded,
    /// The file could not be parsed; an empty store stands in for it.
    Recovered { reason: String },
}

/// A dated value in the store document that could not be read.
#[derive(Debug, Clone, PartialEq)]
pub struct DroppedEntry {
    pub symbol: String,
    pub date: String,
    /// The raw JSON as found on disk.
    pub value: String,
}

/// A store together with what is needed to write it back safely.
#[derive(Debug)]
pub struct LoadedStore {
    pub store: PriceStore,
    pub status: LoadStatus,
    /// Fingerprint of the file currently at the store path, `None` if absent.
    pub fingerprint: Option<Fingerprint>,
    /// Unreadable entries left out of `store`. Always empty unless `Loaded`.
    pub dropped: Vec<DroppedEntry>,
}

/// Counts from overlaying new prices onto the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub symbols: usize,
    /// Symbols that did not exist in the store before this merge.
    pub new_symbols: usize,
    pub added: usize,
    pub replaced: usize,
    pub unchanged: usize,
}

impl MergeStats {
    pub fn records(&self) -> usize {
        self.added + self.replaced + self.unchanged
    }

    /// True when the merge made no observable change.
    pub fn is_noop(&self) -> bool {
        self.new_symbols == 0 && self.added == 0 && self.replaced == 0
    }

    fn absorb(&mut self, other: MergeStats) {
        self.symbols += other.symbols;
        self.new_symbols += other.new_symbols;
        self.added += other.added;
        self.replaced += other.replaced;
        self.unchanged += other.unchanged;
    }
}

/// Per-symbol status line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolSummary {
    pub symbol: String,
    pub entries: usize,
    pub legacy_entries: usize,
    pub first_date: Option<String>,
    pub last_date: Option<String>,
}

impl SymbolSummary {
    /// Calendar days between first and last entry, if both dates parse.
    pub fn span_days(&self) -> Option<i64> {
        let first = parse_date(self.first_date.as_deref()?)?;
        let last = parse_date(self.last_date.as_deref()?)?;
        Some((last - first).num_days())
    }
}

impl PriceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Load the store at `path`.
    ///
    /// A missing file yields an empty store. Each dated entry is read on its
    /// own; unreadable ones are listed in [`LoadedStore::dropped`] and the
    /// rest of the document is kept. A file that is not JSON, or not an object
    /// of objects, yields an empty store reported as
    /// [`LoadStatus::Recovered`]. Loading never modifies the file itself. Use
    /// [`quarantine`] to keep a copy of the bad document before it is
    /// overwritten.
    pub fn load(path: &Path) -> Result<LoadedStore> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no store file, starting empty");
                return Ok(LoadedStore {
                    store: PriceStore::new(),
                    status: LoadStatus::Missing,
                    fingerprint: None,
                    dropped: Vec::new(),
                });
            }
            Err(e) => return Err(StoreError::Io(e)),
        };
        let fingerprint = Some(blake3::hash(&bytes));

        match read_document(&bytes) {
            Ok((store, dropped)) => {
                for entry in &dropped {
                    warn!(
                        symbol = %entry.symbol,
                        date = %entry.date,
                        value = %entry.value,
                        "unreadable store entry dropped"
                    );
                }
                Ok(LoadedStore {
                    store,
                    status: LoadStatus::Loaded,
                    fingerprint,
                    dropped,
                })
            }
            Err(reason) => {
                warn!(
                    path = %path.display(),
                    error = %reason,
                    "store file is corrupt, starting from an empty store"
                );
                Ok(LoadedStore {
                    store: PriceStore::new(),
                    status: LoadStatus::Recovered { reason },
                    fingerprint,
                    dropped: Vec::new(),
                })
            }
        }
    }

    /// Write the store to `path` atomically. Returns the fingerprint of the
    /// newly written document.
    pub fn save(&self, path: &Path) -> Result<Fingerprint> {
        let json = serde_json::to_vec_pretty(self)?;
        write_atomic(path, &json).map_err(|e| StoreError::persistence(path, e))?;
        Ok(blake3::hash(&json))
    }

    /// Overlay one symbol's prices. Existing dates are replaced, others kept.
    pub fn merge_symbol(&mut self, symbol: &str, prices: &PriceMap) -> MergeStats {
        let mut stats = MergeStats {
            symbols: 1,
            new_symbols: usize::from(!self.symbols.contains_key(symbol)),
            ..MergeStats::default()
        };
        let existing = self.symbols.entry(symbol.to_string()).or_default();

        for (date, price) in prices {
            match existing.insert(date.clone(), *price) {
                None => stats.added += 1,
                Some(old) if old == *price => stats.unchanged += 1,
                Some(_) => stats.replaced += 1,
            }
        }

        stats
    }

    /// Overlay every symbol of a normalized batch.
    pub fn merge_batch(&mut self, batch: &NormalizedBatch) -> MergeStats {
        let mut total = MergeStats::default();
        for (symbol, prices) in &batch.symbols {
            total.absorb(self.merge_symbol(symbol, prices));
        }
        total
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.symbols.keys().map(String::as_str)
    }

    pub fn prices(&self, symbol: &str) -> Option<&PriceMap> {
        self.symbols.get(symbol)
    }

    pub fn get(&self, symbol: &str, date: &str) -> Option<&StoredPrice> {
        self.symbols.get(symbol)?.get(date)
    }

    /// Close price for a symbol on a date, whichever shape it is stored in.
    pub fn close_on(&self, symbol: &str, date: &str) -> Option<f64> {
        self.get(symbol, date).map(StoredPrice::close)
    }

    /// Total number of dated entries.
    pub fn entry_count(&self) -> usize {
        self.symbols.values().map(|m| m.len()).sum()
    }

    pub fn summaries(&self) -> Vec<SymbolSummary> {
        self.symbols
            .iter()
            .map(|(symbol, prices)| SymbolSummary {
                symbol: symbol.clone(),
                entries: prices.len(),
                legacy_entries: prices.values().filter(|p| p.is_legacy()).count(),
                first_date: prices.keys().next().cloned(),
                last_date: prices.keys().next_back().cloned(),
            })
            .collect()
    }
}

/// Path the store is written to before being renamed into place.
pub fn temp_path(path: &Path) -> PathBuf {
    sibling_with_suffix(path, ".tmp")
}

/// Where a corrupt store is copied, e.g. `history_prices.json.corrupt-20240102T030405Z`.
pub fn quarantine_path(path: &Path) -> PathBuf {
    let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
    sibling_with_suffix(path, &format!(".corrupt-{stamp}"))
}

fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from("store"));
    name.push(suffix);
    path.with_file_name(name)
}

/// Copy an unreadable store aside before it gets overwritten.
pub fn quarantine(path: &Path) -> Result<PathBuf> {
    let target = quarantine_path(path);
    fs::copy(path, &target)?;
    warn!(backup = %target.display(), "corrupt store copied aside");
    Ok(target)
}

/// Fail with [`StoreError::Conflict`] unless the file at `path` still hashes
/// to `expected` (`None` meaning the file must not exist).
pub fn ensure_unchanged(path: &Path, expected: Option<Fingerprint>) -> Result<()> {
    let on_disk = current_fingerprint(path).map_err(|e| StoreError::persistence(path, e))?;
    if on_disk != expected {
        return Err(StoreError::Conflict {
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

fn current_fingerprint(path: &Path) -> io::Result<Option<Fingerprint>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(blake3::hash(&bytes))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Write `bytes` to `path` via a synced temp file and a rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = temp_path(path);

    let written = (|| {
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()
    })();

    let result = written.and_then(|()| fs::rename(&tmp_path, path));
    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

/// Parse a store document entry by entry. `Err` carries the reason the
/// document as a whole is unusable.
fn read_document(bytes: &[u8]) -> std::result::Result<(PriceStore, Vec<DroppedEntry>), String> {
    let document: Map<String, Value> = match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(document)) => document,
        Ok(other) => return Err(format!("expected an object of symbols, found {}", json_kind(&other))),
        Err(e) => return Err(e.to_string()),
    };

    let mut store = PriceStore::new();
    let mut dropped = Vec::new();
    for (symbol, entries) in document {
        let entries = match entries {
            Value::Object(entries) => entries,
            other => {
                return Err(format!("entries for {symbol} must be an object, found {}", json_kind(&other)))
            }
        };
        let prices = store.symbols.entry(symbol.clone()).or_default();
        for (date, value) in entries {
            match StoredPrice::from_stored_value(&value) {
                Some(price) => {
                    prices.insert(date, price);
                }
                None => dropped.push(DroppedEntry {
                    symbol: symbol.clone(),
                    date,
                    value: value.to_string(),
                }),
            }
        }
    }
    Ok((store, dropped))
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()
}
