//! Structured error types for store operations.
//!
//! Messages are displayable in CLI output as-is. Per-record
//! normalization problems are not errors: they surface as
//! [`SkippedRecord`](crate::normalize::SkippedRecord) entries in the
//! normalized batch.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("input file not found: {}", path.display())]
    MissingInput { path: PathBuf },

    #[error("invalid batch shape: {0}")]
    InvalidBatchShape(String),

    #[error("failed to persist store to {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("store {} is locked by another writer", path.display())]
    Locked { path: PathBuf },

    #[error("store {} was modified by another process during merge; rerun to retry", path.display())]
    Conflict { path: PathBuf },

    #[error("config error: {0}")]
    Config(String),

    #[error("producer '{producer}' failed for {symbol}: {message}")]
    Producer {
        producer: String,
        symbol: String,
        message: String,
    },

    #[error("export error: {0}")]
    Export(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Persistence {
            path: path.into(),
            source,
        }
    }

    /// Whether a rerun of the same command can be expected to succeed once
    /// the transient condition is gone.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::Locked { .. } | StoreError::Conflict { .. } | StoreError::Persistence { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
