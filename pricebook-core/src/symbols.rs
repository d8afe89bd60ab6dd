//! Market-qualified symbol names.
//!
//! Store keys carry the listing market as a suffix (`AAPL.US`, `700.HK`).
//! Watchlists usually hold bare codes plus a market column, so this module
//! turns those into store keys.

use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Suffixes some feeds use that differ from the store's market codes.
const SUFFIX_ALIASES: &[(&str, &str)] = &[("T", "JP")];

/// A code and the market it trades on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradedInstrument {
    pub code: String,
    pub market: String,
}

impl TradedInstrument {
    pub fn new(code: impl Into<String>, market: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            market: market.into(),
        }
    }

    pub fn symbol(&self) -> String {
        qualify_symbol(&self.code, &self.market)
    }
}

/// Qualify `code` with `market`.
///
/// A code that already carries a suffix keeps it (aliases like `.T` are
/// rewritten). The result is upper-cased.
pub fn qualify_symbol(code: &str, market: &str) -> String {
    let code = code.trim();
    let market = market.trim();

    if let Some((base, suffix)) = code.rsplit_once('.') {
        if !base.is_empty() && !suffix.is_empty() {
            let suffix = suffix.to_ascii_uppercase();
            let suffix = SUFFIX_ALIASES
                .iter()
                .find(|&&(from, _)| from == suffix)
                .map_or(suffix.as_str(), |&(_, to)| to);
            return format!("{}.{}", base.to_ascii_uppercase(), suffix);
        }
    }

    if market.is_empty() {
        code.to_ascii_uppercase()
    } else {
        format!("{}.{}", code.to_ascii_uppercase(), market.to_ascii_uppercase())
    }
}

/// Qualify every instrument, dropping duplicates and keeping first-seen order.
pub fn qualify_all<'a, I>(instruments: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a TradedInstrument>,
{
    let mut seen = HashSet::new();
    instruments
        .into_iter()
        .map(TradedInstrument::symbol)
        .filter(|s| !s.is_empty() && seen.insert(s.clone()))
        .collect()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SymbolEntry {
    Instrument(TradedInstrument),
    Symbol(String),
}

/// Read a JSON array of instruments (`{"code","market"}`) or plain symbol
/// strings, in any mix.
pub fn read_symbol_list(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        return Err(StoreError::MissingInput {
            path: path.to_path_buf(),
        });
    }
    let content = std::fs::read_to_string(path)?;
    let entries: Vec<SymbolEntry> = serde_json::from_str(&content).map_err(|e| {
        StoreError::InvalidBatchShape(format!(
            "{}: expected an array of instruments or symbols: {e}",
            path.display()
        ))
    })?;

    let instruments: Vec<TradedInstrument> = entries
        .into_iter()
        .map(|entry| match entry {
            SymbolEntry::Instrument(i) => i,
            SymbolEntry::Symbol(s) => TradedInstrument::new(s, ""),
        })
        .collect();
    Ok(qualify_all(&instruments))
}
