//! CSV export of stored series.
//!
//! One file per symbol with columns `Date,Open,High,Low,Close,Volume`, rows in
//! ascending date order. Legacy close-only entries leave the other price
//! columns empty.

use crate::error::{Result, StoreError};
use crate::store::{write_atomic, PriceStore};
use std::path::{Path, PathBuf};
use tracing::info;

pub const CSV_HEADER: [&str; 6] = ["Date", "Open", "High", "Low", "Close", "Volume"];

/// Render one symbol's series as CSV.
pub fn export_csv(store: &PriceStore, symbol: &str) -> Result<String> {
    let prices = store
        .prices(symbol)
        .ok_or_else(|| StoreError::Export(format!("symbol {symbol} is not in the store")))?;

    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(CSV_HEADER).map_err(csv_error)?;

    for (date, price) in prices {
        let row = match price.record() {
            Some(r) => [
                date.clone(),
                r.open.to_string(),
                r.high.to_string(),
                r.low.to_string(),
                r.close.to_string(),
                r.volume.to_string(),
            ],
            None => [
                date.clone(),
                String::new(),
                String::new(),
                String::new(),
                price.close().to_string(),
                String::new(),
            ],
        };
        wtr.write_record(&row).map_err(csv_error)?;
    }

    let data = wtr
        .into_inner()
        .map_err(|e| StoreError::Export(format!("failed to flush CSV writer: {e}")))?;
    String::from_utf8(data).map_err(|e| StoreError::Export(format!("CSV output is not valid UTF-8: {e}")))
}

/// Write `{dir}/{symbol}.csv` for each requested symbol, or for every symbol
/// when `symbols` is empty. Returns the written paths.
pub fn export_all(store: &PriceStore, dir: &Path, symbols: &[String]) -> Result<Vec<PathBuf>> {
    let selected: Vec<String> = if symbols.is_empty() {
        store.symbols().map(str::to_string).collect()
    } else {
        symbols.to_vec()
    };

    let mut written = Vec::with_capacity(selected.len());
    for symbol in &selected {
        let csv = export_csv(store, symbol)?;
        let path = dir.join(format!("{symbol}.csv"));
        write_atomic(&path, csv.as_bytes()).map_err(|e| StoreError::persistence(&path, e))?;
        written.push(path);
    }

    info!(files = written.len(), dir = %dir.display(), "exported CSV");
    Ok(written)
}

fn csv_error(e: csv::Error) -> StoreError {
    StoreError::Export(format!("CSV write failed: {e}"))
}
