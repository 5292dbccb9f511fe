//! Process-wide cache configuration and the eviction trigger.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::time::{Duration, interval};

use crate::eviction::{self, EvictionReport};
use crate::store::EntryStore;

/// Cache settings fixed at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfiguration {
    /// Byte budget for the whole cache directory
    pub total_capacity_bytes: u64,
    /// Name of the cache directory under `base_dir`
    pub directory_name: String,
    /// Where the cache directory lives
    pub base_dir: PathBuf,
    /// Run eviction before every download
    pub evict_on_miss: bool,
    /// Run eviction once when the cache is opened
    pub evict_on_start: bool,
}

impl CacheConfiguration {
    /// Full path of the cache directory
    pub fn directory(&self) -> PathBuf {
        self.base_dir.join(&self.directory_name)
    }
}

/// Shared cache state: configuration plus the store it applies to.
///
/// Holds nothing per request, so one context serves every resolver.
pub struct CacheContext<S> {
    config: CacheConfiguration,
    store: Arc<S>,
}

impl<S> std::fmt::Debug for CacheContext<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheContext")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S: EntryStore> CacheContext<S> {
    /// Create a context over `store`
    pub fn new(config: CacheConfiguration, store: Arc<S>) -> Self {
        Self { config, store }
    }

    /// Get the configuration
    pub fn config(&self) -> &CacheConfiguration {
        &self.config
    }

    /// Get the storage backend
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Full path of the cache directory
    pub fn directory(&self) -> PathBuf {
        self.config.directory()
    }

    /// Bring the cache directory back under its capacity.
    ///
    /// Listing failures are logged and produce an empty report.
    pub async fn trigger_eviction(&self) -> EvictionReport {
        let directory = self.directory();
        let entries = match self.store.list_entries(&directory).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Cannot list cache directory: {e}");
                return EvictionReport::default();
            }
        };

        let selected = eviction::plan(entries, self.config.total_capacity_bytes);
        if selected.is_empty() {
            return EvictionReport::default();
        }

        let report = eviction::execute(&*self.store, &selected).await;
        tracing::info!(
            "Evicted {} of {} cached files ({} bytes freed)",
            report.deleted,
            report.planned,
            report.bytes_freed
        );
        report
    }

    /// Startup pass: evict once if `evict_on_start` is set.
    ///
    /// Returns `None` when the pass is disabled.
    pub async fn evict_on_start(&self) -> Option<EvictionReport> {
        if !self.config.evict_on_start {
            return None;
        }

        tracing::debug!("Startup eviction in {}", self.directory().display());
        Some(self.trigger_eviction().await)
    }

    /// Run eviction on a fixed interval until the task is dropped.
    pub async fn run_periodic_eviction(self: Arc<Self>, every: Duration) {
        if every.is_zero() {
            return; // Miss-triggered eviction only
        }

        let mut ticker = interval(every);

        loop {
            ticker.tick().await;
            self.trigger_eviction().await;
        }
    }
}
