//! Merge configuration, stored as TOML.
//!
//! Every field has a default matching the historical file layout
//! (`history_prices.json` next to `temp_batch_input.json`), so an absent
//! config file is equivalent to an empty one.

use crate::error::{Result, StoreError};
use crate::record::RecordShape;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_STORE_FILE: &str = "history_prices.json";
pub const DEFAULT_BATCH_FILE: &str = "temp_batch_input.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PricebookConfig {
    /// Consolidated store document.
    pub store_path: PathBuf,
    /// Well-known multi-symbol batch file used by `merge` without arguments.
    pub batch_path: PathBuf,
    /// Value shape written by merges.
    pub record_shape: RecordShape,
    /// Remove the multi-symbol batch file after a successful merge.
    pub delete_batch: bool,
    /// Remove single-symbol batch files after a successful merge.
    pub delete_single_batch: bool,
    /// Copy an unparseable store aside before overwriting it.
    pub backup_corrupt: bool,
    /// Hold the advisory store lock during merges.
    pub lock: bool,
    /// Wait for a held lock instead of failing.
    pub wait_for_lock: bool,
}

impl Default for PricebookConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from(DEFAULT_STORE_FILE),
            batch_path: PathBuf::from(DEFAULT_BATCH_FILE),
            record_shape: RecordShape::Ohlcv,
            delete_batch: true,
            delete_single_batch: false,
            backup_corrupt: true,
            lock: true,
            wait_for_lock: false,
        }
    }
}

impl PricebookConfig {
    /// Load a config from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Config(format!("read {}: {e}", path.display())))?;
        Self::from_toml(&content)
    }

    /// Load from `path` if it exists, defaults otherwise.
    pub fn from_file_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse a config from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| StoreError::Config(format!("parse config TOML: {e}")))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| StoreError::Config(format!("serialize config: {e}")))
    }
}
