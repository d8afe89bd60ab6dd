//! Store merger: one load → normalize → merge → persist → cleanup cycle.
//!
//! Phases per invocation:
//!
//! ```text
//! Idle → Loading → Normalizing → Merging → Persisting → CleaningUp → Done
//!                       │                      │
//!                       └──────── Failed ◄─────┘
//! ```
//!
//! An unparseable store degrades to an empty one during `Loading`. Nothing
//! touches the store file before `Persisting`, so a batch rejected while
//! `Normalizing` leaves the store exactly as it was. The batch file is only
//! removed once the new store is in place.

use crate::config::PricebookConfig;
use crate::error::{Result, StoreError};
use crate::lock::StoreLock;
use crate::normalize::{normalize_batch, BatchKind, SkippedRecord};
use crate::record::RecordShape;
use crate::store::{
    ensure_unchanged, quarantine, DroppedEntry, LoadStatus, LoadedStore, MergeStats, PriceStore,
};
use serde_json::Value;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePhase {
    Idle,
    Loading,
    Normalizing,
    Merging,
    Persisting,
    CleaningUp,
    Done,
    Failed,
}

impl MergePhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, MergePhase::Done | MergePhase::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOptions {
    pub shape: RecordShape,
    /// Remove the batch file after the store has been written.
    pub delete_batch: bool,
    /// Keep a copy of an unparseable store before replacing it.
    pub backup_corrupt: bool,
    /// Hold the advisory store lock for the whole cycle.
    pub lock: bool,
    /// Block until the lock is free instead of failing with `Locked`.
    pub wait_for_lock: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            shape: RecordShape::Ohlcv,
            delete_batch: false,
            backup_corrupt: true,
            lock: true,
            wait_for_lock: false,
        }
    }
}

impl MergeOptions {
    /// Options for a single-symbol merge.
    pub fn single(config: &PricebookConfig) -> Self {
        Self {
            shape: config.record_shape,
            delete_batch: config.delete_single_batch,
            backup_corrupt: config.backup_corrupt,
            lock: config.lock,
            wait_for_lock: config.wait_for_lock,
        }
    }

    /// Options for a multi-symbol merge.
    pub fn multi(config: &PricebookConfig) -> Self {
        Self {
            delete_batch: config.delete_batch,
            ..Self::single(config)
        }
    }
}

/// What a completed merge did.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeReport {
    /// Symbols present in the batch.
    pub symbols_merged: usize,
    /// Symbols in the store after the merge.
    pub total_symbols: usize,
    pub stats: MergeStats,
    pub candles_seen: usize,
    pub skipped: Vec<SkippedRecord>,
    pub load_status: LoadStatus,
    /// Unreadable store entries left out of the merged store.
    pub dropped_entries: Vec<DroppedEntry>,
    /// Copy of the corrupt store taken before it was replaced.
    pub quarantined: Option<PathBuf>,
    /// False when the merge changed nothing and the write was skipped.
    pub store_written: bool,
    pub batch_removed: bool,
}

impl MergeReport {
    pub fn store_recovered(&self) -> bool {
        matches!(self.load_status, LoadStatus::Recovered { .. })
    }
}

/// Result of merging a batch file that may legitimately be absent.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    Merged(MergeReport),
    /// No batch file was present; the store was not touched.
    NothingToDo { batch_path: PathBuf },
}

/// Observer for merge phase transitions.
pub trait MergeProgress: Send + Sync {
    /// Called on entering each phase, before any of its work.
    fn on_phase(&self, store_path: &Path, phase: MergePhase);
}

#[derive(Clone, Copy)]
enum BatchSource<'a> {
    File(&'a Path),
    Value(&'a Value),
}

/// Drives merges into one store file.
pub struct StoreMerger {
    store_path: PathBuf,
    options: MergeOptions,
    phase: MergePhase,
    progress: Option<Box<dyn MergeProgress>>,
}

impl std::fmt::Debug for StoreMerger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreMerger")
            .field("store_path", &self.store_path)
            .field("options", &self.options)
            .field("phase", &self.phase)
            .finish_non_exhaustive()
    }
}

impl StoreMerger {
    pub fn new(store_path: impl Into<PathBuf>, options: MergeOptions) -> Self {
        Self {
            store_path: store_path.into(),
            options,
            phase: MergePhase::Idle,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: impl MergeProgress + 'static) -> Self {
        self.progress = Some(Box::new(progress));
        self
    }

    pub fn phase(&self) -> MergePhase {
        self.phase
    }

    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    /// Merge a batch file.
    ///
    /// A missing multi-symbol batch is not an error: the result is
    /// [`MergeOutcome::NothingToDo`]. A missing single-symbol batch is
    /// [`StoreError::MissingInput`].
    pub fn merge_file(&mut self, batch_path: &Path, kind: &BatchKind) -> Result<MergeOutcome> {
        if !batch_path.exists() {
            return match kind {
                BatchKind::Multi => {
                    info!(batch = %batch_path.display(), "no batch file found, nothing to merge");
                    self.enter(MergePhase::Done);
                    Ok(MergeOutcome::NothingToDo {
                        batch_path: batch_path.to_path_buf(),
                    })
                }
                BatchKind::Single(_) => {
                    self.enter(MergePhase::Failed);
                    Err(StoreError::MissingInput {
                        path: batch_path.to_path_buf(),
                    })
                }
            };
        }
        self.run(BatchSource::File(batch_path), kind)
            .map(MergeOutcome::Merged)
    }

    /// Merge an in-memory batch. There is no batch file to clean up.
    pub fn merge_value(&mut self, raw: &Value, kind: &BatchKind) -> Result<MergeReport> {
        self.run(BatchSource::Value(raw), kind)
    }

    fn run(&mut self, source: BatchSource<'_>, kind: &BatchKind) -> Result<MergeReport> {
        self.phase = MergePhase::Idle;
        let result = self.run_cycle(source, kind);
        if let Err(e) = &result {
            warn!(store = %self.store_path.display(), error = %e, phase = ?self.phase, "merge failed");
            self.enter(MergePhase::Failed);
        }
        result
    }

    fn run_cycle(&mut self, source: BatchSource<'_>, kind: &BatchKind) -> Result<MergeReport> {
        let _lock = match (self.options.lock, self.options.wait_for_lock) {
            (false, _) => None,
            (true, false) => Some(StoreLock::try_acquire(&self.store_path)?),
            (true, true) => Some(StoreLock::acquire(&self.store_path)?),
        };

        self.enter(MergePhase::Loading);
        let LoadedStore {
            mut store,
            status,
            fingerprint,
            dropped,
        } = PriceStore::load(&self.store_path)?;

        self.enter(MergePhase::Normalizing);
        let owned;
        let raw = match source {
            BatchSource::File(path) => {
                owned = read_batch(path)?;
                &owned
            }
            BatchSource::Value(value) => value,
        };
        let batch = normalize_batch(raw, kind, self.options.shape)?;
        for skip in &batch.skipped {
            warn!(
                symbol = %skip.symbol,
                index = skip.index,
                reason = %skip.reason,
                "skipping candle"
            );
        }

        self.enter(MergePhase::Merging);
        let stats = store.merge_batch(&batch);

        self.enter(MergePhase::Persisting);
        let mut quarantined = None;
        let store_written = if stats.is_noop() && status == LoadStatus::Loaded {
            debug!(store = %self.store_path.display(), "batch changes nothing, store left as is");
            false
        } else {
            ensure_unchanged(&self.store_path, fingerprint)?;
            if matches!(status, LoadStatus::Recovered { .. }) && self.options.backup_corrupt {
                quarantined = Some(quarantine(&self.store_path)?);
            }
            store.save(&self.store_path)?;
            true
        };

        self.enter(MergePhase::CleaningUp);
        let batch_removed = match source {
            BatchSource::File(path) if self.options.delete_batch => remove_batch(path),
            _ => false,
        };

        self.enter(MergePhase::Done);
        let report = MergeReport {
            symbols_merged: batch.symbol_count(),
            total_symbols: store.len(),
            stats,
            candles_seen: batch.candles_seen,
            skipped: batch.skipped,
            load_status: status,
            dropped_entries: dropped,
            quarantined,
            store_written,
            batch_removed,
        };
        info!(
            store = %self.store_path.display(),
            symbols = report.symbols_merged,
            total = report.total_symbols,
            records = stats.records(),
            added = stats.added,
            replaced = stats.replaced,
            skipped = report.skipped.len(),
            "merge complete"
        );
        Ok(report)
    }

    fn enter(&mut self, phase: MergePhase) {
        debug!(from = ?self.phase, to = ?phase, "merge phase");
        self.phase = phase;
        if let Some(progress) = &self.progress {
            progress.on_phase(&self.store_path, phase);
        }
    }
}

/// Merge a single symbol's candle array file into the configured store.
pub fn merge_single(config: &PricebookConfig, symbol: &str, batch_path: &Path) -> Result<MergeReport> {
    let mut merger = StoreMerger::new(&config.store_path, MergeOptions::single(config));
    match merger.merge_file(batch_path, &BatchKind::Single(symbol.to_string()))? {
        MergeOutcome::Merged(report) => Ok(report),
        MergeOutcome::NothingToDo { batch_path } => Err(StoreError::MissingInput { path: batch_path }),
    }
}

/// Merge a multi-symbol batch file (the configured one when `batch_path` is
/// `None`) into the configured store.
pub fn merge_multi(config: &PricebookConfig, batch_path: Option<&Path>) -> Result<MergeOutcome> {
    let batch_path = batch_path.unwrap_or(config.batch_path.as_path());
    let mut merger = StoreMerger::new(&config.store_path, MergeOptions::multi(config));
    merger.merge_file(batch_path, &BatchKind::Multi)
}

fn read_batch(path: &Path) -> Result<Value> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(StoreError::MissingInput {
                path: path.to_path_buf(),
            })
        }
        Err(e) => return Err(StoreError::Io(e)),
    };
    serde_json::from_str(&content).map_err(|e| {
        StoreError::InvalidBatchShape(format!("{} is not valid JSON: {e}", path.display()))
    })
}

fn remove_batch(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!(batch = %path.display(), "batch file removed");
            true
        }
        Err(e) => {
            warn!(batch = %path.display(), error = %e, "could not remove batch file");
            false
        }
    }
}
