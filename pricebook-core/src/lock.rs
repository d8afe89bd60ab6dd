//! Single-writer guard for the store.
//!
//! An exclusive advisory lock on a `{store}.lock` sidecar, held for the whole
//! load → merge → persist cycle. Advisory means only cooperating processes
//! are serialized; the fingerprint check in
//! [`ensure_unchanged`](crate::store::ensure_unchanged) catches writers that
//! ignore it.

use crate::error::{Result, StoreError};
use fs2::FileExt;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Held lock; released on drop.
#[derive(Debug)]
pub struct StoreLock {
    file: File,
    path: PathBuf,
}

impl StoreLock {
    /// Take the lock, failing immediately with [`StoreError::Locked`] if
    /// another process holds it.
    pub fn try_acquire(store_path: &Path) -> Result<Self> {
        let (file, path) = open_lock_file(store_path)?;
        if file.try_lock_exclusive().is_err() {
            return Err(StoreError::Locked {
                path: store_path.to_path_buf(),
            });
        }
        debug!(lock = %path.display(), "store lock acquired");
        Ok(Self { file, path })
    }

    /// Take the lock, blocking until it is available.
    pub fn acquire(store_path: &Path) -> Result<Self> {
        let (file, path) = open_lock_file(store_path)?;
        file.lock_exclusive()?;
        debug!(lock = %path.display(), "store lock acquired");
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
        debug!(lock = %self.path.display(), "store lock released");
    }
}

/// `history_prices.json` → `history_prices.json.lock`
pub fn lock_path(store_path: &Path) -> PathBuf {
    let mut name: OsString = store_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from("store"));
    name.push(".lock");
    store_path.with_file_name(name)
}

fn open_lock_file(store_path: &Path) -> Result<(File, PathBuf)> {
    let path = lock_path(store_path);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&path)?;
    Ok((file, path))
}
