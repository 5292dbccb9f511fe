//! Storage backend for cached files.
//!
//! The engine never keeps an index of what is cached. Every question about
//! the cache (does this file exist, how big is the directory) goes to an
//! [`EntryStore`], so the answer is always the one on disk.

mod fs;
#[cfg(test)]
pub(crate) mod testing;

pub use fs::FsStore;

use std::future::Future;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::error::{FetchError, StoreError};
use crate::key::CacheKey;

/// Suffix of in-progress downloads
pub const PART_SUFFIX: &str = ".part";

/// A cached file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Key derived from the file name
    pub key: CacheKey,
    /// Location on disk
    pub path: PathBuf,
    /// File size in bytes
    pub size_bytes: u64,
    /// Last modification time (eviction order)
    pub last_modified: DateTime<Utc>,
}

/// A file written by [`EntryStore::write_from_fetch`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedFile {
    /// The new cache entry
    pub entry: CacheEntry,
    /// Size announced by the remote end, when it sent one
    pub expected_bytes: Option<u64>,
}

/// Operations the cache needs from a storage backend
pub trait EntryStore: Send + Sync + 'static {
    /// Check whether a file exists
    fn exists(&self, path: &Path) -> impl Future<Output = Result<bool, StoreError>> + Send;

    /// List cached files in a directory and its cache folders
    fn list_entries(
        &self,
        directory: &Path,
    ) -> impl Future<Output = Result<Vec<CacheEntry>, StoreError>> + Send;

    /// Remove a file (a missing file is not an error)
    fn delete(&self, path: &Path) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Download `locator` into `path`, reporting completion percentages
    fn write_from_fetch(
        &self,
        path: &Path,
        locator: &str,
        on_progress: &mut (dyn FnMut(u8) + Send),
    ) -> impl Future<Output = Result<FetchedFile, FetchError>> + Send;
}

/// Whether a file name belongs to an in-progress download
pub fn is_partial(name: &str) -> bool {
    name.ends_with(PART_SUFFIX)
}

/// Completion percentage of a transfer, capped at 100
pub(crate) fn percent(received: u64, expected: u64) -> u8 {
    if expected == 0 {
        return 100;
    }
    (received.saturating_mul(100) / expected).min(100) as u8
}
