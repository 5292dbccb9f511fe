//! Filesystem store with HTTP downloads.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::{CacheEntry, EntryStore, FetchedFile, PART_SUFFIX, is_partial, percent};
use crate::error::{FetchError, StoreError};
use crate::key::CacheKey;

/// Default timeout for a whole download
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Cache files on the local filesystem, downloaded with reqwest.
#[derive(Debug, Clone)]
pub struct FsStore {
    client: reqwest::Client,
}

impl Default for FsStore {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl FsStore {
    /// Create a store whose downloads time out after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("imgstash/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to build HTTP client, using defaults: {e}");
                reqwest::Client::new()
            });
        Self::with_client(client)
    }

    /// Create a store around an existing HTTP client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl EntryStore for FsStore {
    async fn exists(&self, path: &Path) -> Result<bool, StoreError> {
        fs::try_exists(path)
            .await
            .map_err(|e| StoreError::io(path, e))
    }

    async fn list_entries(&self, directory: &Path) -> Result<Vec<CacheEntry>, StoreError> {
        let mut entries = Vec::new();
        // Cache folders are one level deep
        let mut pending = vec![(directory.to_path_buf(), true)];

        while let Some((dir, top_level)) = pending.pop() {
            let mut reader = match fs::read_dir(&dir).await {
                Ok(reader) => reader,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) if top_level => return Err(StoreError::io(dir, e)),
                Err(e) => {
                    tracing::warn!("Skipping cache folder {}: {e}", dir.display());
                    continue;
                }
            };

            while let Some(item) = reader
                .next_entry()
                .await
                .map_err(|e| StoreError::io(&dir, e))?
            {
                let path = item.path();
                let file_type = match item.file_type().await {
                    Ok(file_type) => file_type,
                    Err(e) => {
                        tracing::debug!("Skipping {}: {e}", path.display());
                        continue;
                    }
                };

                if file_type.is_dir() {
                    if top_level {
                        pending.push((path, false));
                    }
                    continue;
                }

                if !file_type.is_file() || is_partial(&item.file_name().to_string_lossy()) {
                    continue;
                }

                match stat(&path).await {
                    Ok(entry) => entries.push(entry),
                    // Deleted between listing and stat
                    Err(e) => tracing::debug!("Skipping {}: {e}", path.display()),
                }
            }
        }

        Ok(entries)
    }

    async fn delete(&self, path: &Path) -> Result<(), StoreError> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    async fn write_from_fetch(
        &self,
        path: &Path,
        locator: &str,
        on_progress: &mut (dyn FnMut(u8) + Send),
    ) -> Result<FetchedFile, FetchError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::io(parent, e))?;
        }

        tracing::debug!("Downloading {locator} to {}", path.display());

        let mut response = self.client.get(locator).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Transport(format!("HTTP {status}")));
        }

        let expected = response.content_length();
        let mut partial = PartialFile::new(path);
        partial.open().await?;

        let mut received = 0u64;
        let mut progress = 0u8;
        while let Some(chunk) = response.chunk().await? {
            partial.write(&chunk).await?;
            received += chunk.len() as u64;

            if let Some(total) = expected {
                let current = percent(received, total);
                if current != progress {
                    progress = current;
                    on_progress(current);
                }
            }
        }

        if expected.is_none() {
            on_progress(100);
        }

        let entry = partial.commit().await?;
        tracing::debug!("Cached {locator} ({} bytes)", entry.size_bytes);

        Ok(FetchedFile {
            entry,
            expected_bytes: expected,
        })
    }
}

/// Read size and modification time of a cached file
async fn stat(path: &Path) -> Result<CacheEntry, StoreError> {
    let metadata = fs::metadata(path)
        .await
        .map_err(|e| StoreError::io(path, e))?;
    let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_default();

    Ok(CacheEntry {
        key: CacheKey::from_file_name(&name),
        path: path.to_path_buf(),
        size_bytes: metadata.len(),
        last_modified: DateTime::<Utc>::from(modified),
    })
}

/// A download in progress, written beside its target.
///
/// The file only appears under the target name once [`PartialFile::commit`]
/// renames it. Dropping an uncommitted `PartialFile` (failed stream,
/// cancelled task) removes whatever was written.
struct PartialFile {
    file: Option<fs::File>,
    temp: PathBuf,
    target: PathBuf,
    committed: bool,
}

impl PartialFile {
    fn new(target: &Path) -> Self {
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp = target.with_file_name(format!(
            "{name}.{}{PART_SUFFIX}",
            Uuid::new_v4().simple()
        ));

        Self {
            file: None,
            temp,
            target: target.to_path_buf(),
            committed: false,
        }
    }

    async fn open(&mut self) -> Result<(), StoreError> {
        let file = fs::File::create(&self.temp)
            .await
            .map_err(|e| StoreError::io(&self.temp, e))?;
        self.file = Some(file);
        Ok(())
    }

    async fn write(&mut self, bytes: &[u8]) -> Result<(), StoreError> {
        if let Some(file) = self.file.as_mut() {
            file.write_all(bytes)
                .await
                .map_err(|e| StoreError::io(&self.temp, e))?;
        }
        Ok(())
    }

    async fn commit(mut self) -> Result<CacheEntry, StoreError> {
        if let Some(mut file) = self.file.take() {
            file.flush()
                .await
                .map_err(|e| StoreError::io(&self.temp, e))?;
        }

        fs::rename(&self.temp, &self.target)
            .await
            .map_err(|e| StoreError::io(&self.target, e))?;
        self.committed = true;

        stat(&self.target).await
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if self.committed {
            return;
        }

        drop(self.file.take());
        // Drop can't await; a single unlink is fine to block on
        match std::fs::remove_file(&self.temp) {
            Ok(()) => tracing::debug!("Removed partial download {}", self.temp.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                "Failed to remove partial download {}: {e}",
                self.temp.display()
            ),
        }
    }
}
