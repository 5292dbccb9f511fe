//! In-memory [`EntryStore`] with scripted downloads, for tests.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{TimeDelta, TimeZone, Utc};
use tokio::sync::Notify;

use super::{CacheEntry, EntryStore, FetchedFile};
use crate::error::{FetchError, StoreError};
use crate::key::CacheKey;

/// What the next download does
#[derive(Debug, Clone, Copy)]
pub(crate) enum Script {
    /// Write `size` bytes, reporting 100%
    Complete { size: u64 },
    /// Write `size` bytes but stop reporting at `progress`
    Partial { progress: u8, size: u64 },
    /// Write `size` bytes while the remote end announced `expected`
    ShortOfExpected { size: u64, expected: u64 },
    /// Fail before writing anything
    Transport,
    /// Wait for [`ScriptedStore::release`], then complete
    Gated { size: u64 },
    /// Leave a partial file and never finish
    Stall,
}

#[derive(Default)]
pub(crate) struct ScriptedStore {
    files: Mutex<BTreeMap<PathBuf, CacheEntry>>,
    partials: Arc<Mutex<HashSet<PathBuf>>>,
    scripts: Mutex<VecDeque<Script>>,
    fetches: AtomicUsize,
    deleted: Mutex<Vec<PathBuf>>,
    undeletable: Mutex<HashSet<PathBuf>>,
    exists_fails: AtomicBool,
    list_fails: AtomicBool,
    clock: AtomicI64,
    /// Signalled each time a download starts
    pub fetch_started: Notify,
    release: Notify,
}

impl ScriptedStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue download behaviours; an empty queue fails with a transport error.
    pub fn script(&self, scripts: impl IntoIterator<Item = Script>) {
        self.scripts.lock().unwrap().extend(scripts);
    }

    /// Put a file in place, `tick` orders modification times.
    pub fn seed(&self, path: impl Into<PathBuf>, size: u64, tick: i64) {
        let path = path.into();
        let entry = entry_for(&path, size, tick);
        self.files.lock().unwrap().insert(path, entry);
    }

    pub fn release(&self) {
        self.release.notify_one();
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn deleted(&self) -> Vec<PathBuf> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.files.lock().unwrap().keys().cloned().collect()
    }

    pub fn partials(&self) -> usize {
        self.partials.lock().unwrap().len()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.files.lock().unwrap().contains_key(path)
    }

    pub fn refuse_delete(&self, path: impl Into<PathBuf>) {
        self.undeletable.lock().unwrap().insert(path.into());
    }

    pub fn fail_exists(&self) {
        self.exists_fails.store(true, Ordering::SeqCst);
    }

    pub fn fail_list(&self) {
        self.list_fails.store(true, Ordering::SeqCst);
    }

    fn next_script(&self) -> Script {
        self.scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Script::Transport)
    }

    fn store_file(&self, path: &Path, size: u64) -> CacheEntry {
        let tick = 1_000 + self.clock.fetch_add(1, Ordering::SeqCst);
        let entry = entry_for(path, size, tick);
        self.files
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), entry.clone());
        entry
    }

    fn unavailable(path: &Path) -> StoreError {
        StoreError::io(path, std::io::Error::other("backend offline"))
    }
}

fn entry_for(path: &Path, size: u64, tick: i64) -> CacheEntry {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let epoch = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    CacheEntry {
        key: CacheKey::from_file_name(&name),
        path: path.to_path_buf(),
        size_bytes: size,
        last_modified: epoch + TimeDelta::seconds(tick),
    }
}

/// Removes its partial marker when a stalled download is dropped
struct PartialGuard {
    partials: Arc<Mutex<HashSet<PathBuf>>>,
    path: PathBuf,
}

impl Drop for PartialGuard {
    fn drop(&mut self) {
        self.partials.lock().unwrap().remove(&self.path);
    }
}

impl EntryStore for ScriptedStore {
    async fn exists(&self, path: &Path) -> Result<bool, StoreError> {
        if self.exists_fails.load(Ordering::SeqCst) {
            return Err(Self::unavailable(path));
        }
        Ok(self.contains(path))
    }

    async fn list_entries(&self, directory: &Path) -> Result<Vec<CacheEntry>, StoreError> {
        if self.list_fails.load(Ordering::SeqCst) {
            return Err(Self::unavailable(directory));
        }
        Ok(self
            .files
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.path.starts_with(directory))
            .cloned()
            .collect())
    }

    async fn delete(&self, path: &Path) -> Result<(), StoreError> {
        if self.undeletable.lock().unwrap().contains(path) {
            return Err(Self::unavailable(path));
        }
        self.files.lock().unwrap().remove(path);
        self.deleted.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }

    async fn write_from_fetch(
        &self,
        path: &Path,
        _locator: &str,
        on_progress: &mut (dyn FnMut(u8) + Send),
    ) -> Result<FetchedFile, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let script = self.next_script();
        self.fetch_started.notify_one();

        match script {
            Script::Complete { size } => {
                on_progress(50);
                on_progress(100);
                Ok(FetchedFile {
                    entry: self.store_file(path, size),
                    expected_bytes: None,
                })
            }
            Script::Partial { progress, size } => {
                on_progress(progress);
                Ok(FetchedFile {
                    entry: self.store_file(path, size),
                    expected_bytes: None,
                })
            }
            Script::ShortOfExpected { size, expected } => {
                on_progress(100);
                Ok(FetchedFile {
                    entry: self.store_file(path, size),
                    expected_bytes: Some(expected),
                })
            }
            Script::Transport => Err(FetchError::Transport("connection reset".to_string())),
            Script::Gated { size } => {
                self.release.notified().await;
                on_progress(100);
                Ok(FetchedFile {
                    entry: self.store_file(path, size),
                    expected_bytes: None,
                })
            }
            Script::Stall => {
                self.partials.lock().unwrap().insert(path.to_path_buf());
                let _guard = PartialGuard {
                    partials: Arc::clone(&self.partials),
                    path: path.to_path_buf(),
                };
                on_progress(10);
                std::future::pending().await
            }
        }
    }
}
