//! Pricebook Core: candle normalization and the consolidated price store.
//!
//! This crate owns everything between a raw candle batch and the store on disk:
//! - Raw candle parsing (date keys, loose numeric fields)
//! - Batch normalization for single- and multi-symbol batches
//! - The consolidated store with last-write-wins merging by date
//! - Atomic persistence, corrupt-store recovery, and a single-writer lock
//! - The merge state machine tying load → normalize → merge → persist → cleanup
//! - Producer seam for assembling batches, symbol qualification, CSV export

pub mod candle;
pub mod config;
pub mod error;
pub mod export;
pub mod lock;
pub mod merge;
pub mod normalize;
pub mod provider;
pub mod record;
pub mod store;
pub mod symbols;

pub use config::PricebookConfig;
pub use error::{Result, StoreError};
pub use merge::{
    merge_multi, merge_single, MergeOptions, MergeOutcome, MergePhase, MergeProgress, MergeReport, StoreMerger,
};
pub use normalize::{normalize_batch, BatchKind, NormalizedBatch, PriceMap};
pub use record::{PriceRecord, RecordShape, StoredPrice};
pub use store::{DroppedEntry, LoadStatus, MergeStats, PriceStore};
