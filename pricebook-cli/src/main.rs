//! Pricebook CLI: merge candle batches into the consolidated price store.
//!
//! Commands:
//! - `merge-single`: merge one symbol's candle array file
//! - `merge`: merge the multi-symbol batch file (no file → nothing to do)
//! - `status`: per-symbol entry counts and date ranges
//! - `export`: write per-symbol CSV files
//! - `symbols`: qualify a watchlist of `{code, market}` entries
//! - `collect`: assemble a multi-symbol batch from per-symbol candle dumps

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pricebook_core::export::export_all;
use pricebook_core::provider::{collect_batch, write_batch_file, DirectoryProducer, DEFAULT_MIN_EXISTING};
use pricebook_core::symbols::read_symbol_list;
use pricebook_core::{
    merge_multi, merge_single, DroppedEntry, LoadStatus, MergeOutcome, MergeReport, PriceStore,
    PricebookConfig, RecordShape, StoreError,
};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "pricebook",
    about = "Pricebook: consolidated daily price history store"
)]
struct Cli {
    /// Config file (TOML). Missing file means defaults.
    #[arg(long, global = true, default_value = "pricebook.toml")]
    config: PathBuf,

    /// Store file, overriding the config.
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Value shape written by merges: ohlcv or close.
    #[arg(long, global = true)]
    shape: Option<RecordShape>,

    /// Do not take the store lock.
    #[arg(long, global = true, default_value_t = false)]
    no_lock: bool,

    /// Wait for another merge to release the store lock instead of failing.
    #[arg(long, global = true, default_value_t = false)]
    wait: bool,

    /// Debug logging (overridden by RUST_LOG).
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge a single symbol's candle array file into the store.
    MergeSingle {
        /// Store key for the candles (e.g., AAPL.US).
        symbol: String,

        /// JSON array of candles.
        batch_file: PathBuf,

        /// Remove the batch file after a successful merge.
        #[arg(long, default_value_t = false)]
        delete_batch: bool,
    },
    /// Merge a multi-symbol batch file into the store.
    Merge {
        /// Batch file. Defaults to the configured batch path.
        #[arg(long)]
        batch: Option<PathBuf>,

        /// Keep the batch file after a successful merge.
        #[arg(long, default_value_t = false)]
        keep_batch: bool,
    },
    /// Report symbols, entry counts, and date ranges in the store.
    Status,
    /// Export stored series as CSV, one file per symbol.
    Export {
        /// Output directory.
        #[arg(long)]
        out: PathBuf,

        /// Symbols to export. Defaults to all.
        symbols: Vec<String>,
    },
    /// Qualify a watchlist into store symbols.
    Symbols {
        /// JSON array of `{code, market}` objects or plain symbols.
        file: PathBuf,

        /// Print a JSON array instead of one symbol per line.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Assemble a multi-symbol batch from per-symbol candle dumps.
    Collect {
        /// Directory holding `{symbol}.json` candle arrays.
        #[arg(long)]
        from: PathBuf,

        /// Watchlist file (same format as `symbols`).
        #[arg(long)]
        symbols: PathBuf,

        /// Most recent candles to keep per symbol.
        #[arg(long, default_value_t = 1000)]
        depth: usize,

        /// Skip symbols already holding more than this many entries.
        #[arg(long, default_value_t = DEFAULT_MIN_EXISTING)]
        min_existing: usize,

        /// Batch file to write. Defaults to the configured batch path.
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = PricebookConfig::from_file_or_default(&cli.config)
        .with_context(|| format!("failed to load config {}", cli.config.display()))?;
    if let Some(store) = cli.store {
        config.store_path = store;
    }
    if let Some(shape) = cli.shape {
        config.record_shape = shape;
    }
    if cli.no_lock {
        config.lock = false;
    }
    if cli.wait {
        config.wait_for_lock = true;
    }
    tracing::debug!(
        store = %config.store_path.display(),
        shape = %config.record_shape,
        lock = config.lock,
        wait = config.wait_for_lock,
        "resolved config"
    );

    match cli.command {
        Commands::MergeSingle {
            symbol,
            batch_file,
            delete_batch,
        } => {
            config.delete_single_batch |= delete_batch;
            run_merge_single(&config, &symbol, &batch_file)
        }
        Commands::Merge { batch, keep_batch } => {
            if keep_batch {
                config.delete_batch = false;
            }
            run_merge(&config, batch.as_deref())
        }
        Commands::Status => run_status(&config.store_path),
        Commands::Export { out, symbols } => run_export(&config.store_path, &out, &symbols),
        Commands::Symbols { file, json } => run_symbols(&file, json),
        Commands::Collect {
            from,
            symbols,
            depth,
            min_existing,
            out,
        } => {
            let out = out.unwrap_or_else(|| config.batch_path.clone());
            run_collect(&config.store_path, &from, &symbols, depth, min_existing, &out)
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run_merge_single(config: &PricebookConfig, symbol: &str, batch_file: &Path) -> Result<()> {
    let report = merge_single(config, symbol, batch_file)
        .map_err(with_retry_hint)
        .with_context(|| format!("failed to merge {} for {symbol}", batch_file.display()))?;
    print_report(&report, &config.store_path);
    Ok(())
}

fn run_merge(config: &PricebookConfig, batch: Option<&Path>) -> Result<()> {
    let outcome = merge_multi(config, batch)
        .map_err(with_retry_hint)
        .context("failed to merge batch")?;
    match outcome {
        MergeOutcome::Merged(report) => print_report(&report, &config.store_path),
        MergeOutcome::NothingToDo { batch_path } => {
            println!("No batch file at {}, nothing to merge.", batch_path.display());
        }
    }
    Ok(())
}

fn run_status(store_path: &Path) -> Result<()> {
    let loaded = PriceStore::load(store_path)
        .with_context(|| format!("failed to read store {}", store_path.display()))?;

    match &loaded.status {
        LoadStatus::Missing => {
            println!("Store does not exist: {}", store_path.display());
            return Ok(());
        }
        LoadStatus::Recovered { reason } => {
            println!("WARNING: store is unreadable ({reason}); the next merge replaces it");
            return Ok(());
        }
        LoadStatus::Loaded => {}
    }
    print_dropped(&loaded.dropped);

    let store = loaded.store;
    if store.is_empty() {
        println!("Store is empty: {}", store_path.display());
        return Ok(());
    }

    println!("Store: {}", store_path.display());
    println!("Symbols: {}", store.len());
    println!("Entries: {}", store.entry_count());
    println!();
    println!(
        "{:<12} {:<25} {:>8} {:>8} {:>8}",
        "Symbol", "Date Range", "Days", "Entries", "Legacy"
    );
    println!("{}", "-".repeat(65));
    for s in store.summaries() {
        let range = match (&s.first_date, &s.last_date) {
            (Some(first), Some(last)) => format!("{first} to {last}"),
            _ => "(no entries)".into(),
        };
        let days = s.span_days().map_or_else(|| "-".to_string(), |d| d.to_string());
        println!(
            "{:<12} {:<25} {:>8} {:>8} {:>8}",
            s.symbol, range, days, s.entries, s.legacy_entries
        );
    }
    Ok(())
}

fn run_export(store_path: &Path, out: &Path, symbols: &[String]) -> Result<()> {
    let loaded = PriceStore::load(store_path)
        .with_context(|| format!("failed to read store {}", store_path.display()))?;
    if let LoadStatus::Recovered { reason } = &loaded.status {
        anyhow::bail!("store {} is unreadable: {reason}", store_path.display());
    }

    let written = export_all(&loaded.store, out, symbols).context("CSV export failed")?;
    for path in &written {
        println!("Wrote {}", path.display());
    }
    println!("Exported {} symbol(s).", written.len());
    Ok(())
}

fn run_symbols(file: &Path, json: bool) -> Result<()> {
    let symbols = read_symbol_list(file)
        .with_context(|| format!("failed to read symbol list {}", file.display()))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&symbols)?);
    } else {
        for symbol in &symbols {
            println!("{symbol}");
        }
    }
    Ok(())
}

fn run_collect(
    store_path: &Path,
    dump_dir: &Path,
    symbols_file: &Path,
    depth: usize,
    min_existing: usize,
    out: &Path,
) -> Result<()> {
    let symbols = read_symbol_list(symbols_file)
        .with_context(|| format!("failed to read symbol list {}", symbols_file.display()))?;
    let existing = PriceStore::load(store_path)
        .with_context(|| format!("failed to read store {}", store_path.display()))?;

    let producer = DirectoryProducer::new(dump_dir);
    let summary = collect_batch(&producer, &symbols, depth, Some(&existing.store), min_existing);

    for (symbol, err) in &summary.errors {
        eprintln!("Error for {symbol}: {err}");
    }
    println!(
        "Collected {} symbol(s), {} already stored, {} failed.",
        summary.fetched.len(),
        summary.already_stored.len(),
        summary.errors.len()
    );

    if summary.fetched.is_empty() {
        println!("Nothing to write.");
        return Ok(());
    }
    write_batch_file(out, &summary.into_batch())
        .with_context(|| format!("failed to write batch {}", out.display()))?;
    println!("Batch written to: {}", out.display());
    Ok(())
}

fn print_report(report: &MergeReport, store_path: &Path) {
    if let LoadStatus::Recovered { reason } = &report.load_status {
        println!("WARNING: existing store was unreadable ({reason}); started from empty");
        if let Some(copy) = &report.quarantined {
            println!("WARNING: unreadable store kept at {}", copy.display());
        }
    }
    print_dropped(&report.dropped_entries);
    println!(
        "Merged {} symbols into {}. Total symbols: {}",
        report.symbols_merged,
        store_path.display(),
        report.total_symbols
    );
    println!(
        "Records: {} added, {} replaced, {} unchanged",
        report.stats.added, report.stats.replaced, report.stats.unchanged
    );
    if !report.skipped.is_empty() {
        println!(
            "Skipped {} of {} candles (unparseable)",
            report.skipped.len(),
            report.candles_seen
        );
    }
    if !report.store_written {
        println!("Store unchanged; nothing written.");
    }
    if report.batch_removed {
        println!("Batch file removed.");
    }
}

fn print_dropped(dropped: &[DroppedEntry]) {
    if dropped.is_empty() {
        return;
    }
    println!("WARNING: {} unreadable store entries ignored", dropped.len());
    for entry in dropped {
        println!("  {} {}: {}", entry.symbol, entry.date, entry.value);
    }
}

/// Point out failures that usually clear up on a second run.
fn with_retry_hint(err: StoreError) -> anyhow::Error {
    let retryable = err.is_retryable();
    let err = anyhow::Error::new(err);
    if retryable {
        err.context("the store was busy or could not be written; rerunning may succeed")
    } else {
        err
    }
}
