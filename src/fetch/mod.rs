//! Resolving locators to cached files.
//!
//! A [`Resolver`] is what a display layer talks to: hand it a locator and
//! it answers with a local path, downloading into the cache on a miss.
//! Concurrent requests for the same file share one download, and a request
//! started with [`Resolver::spawn`] is cancelled (partial file included)
//! when its [`ResolveHandle`] is dropped.

mod inflight;
pub mod session;

pub use session::{COMPLETION_THRESHOLD, FetchSession, FetchState, RETRY_LIMIT, RetryPolicy};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use self::inflight::{InFlight, Slot};
use crate::config::Config;
use crate::context::CacheContext;
use crate::error::ResolveError;
use crate::key;
use crate::store::{EntryStore, FsStore};

/// Per-request options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveOptions {
    /// Serve through the cache; `false` hands back the remote locator
    pub from_cache: bool,
    /// Sub-folder of the cache directory to use
    pub cache_folder: Option<String>,
    /// Never download; only already cached files resolve
    pub offline: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            from_cache: true,
            cache_folder: None,
            offline: false,
        }
    }
}

impl ResolveOptions {
    /// Use a cache sub-folder
    pub fn in_folder(mut self, folder: &str) -> Self {
        self.cache_folder = Some(folder.to_string());
        self
    }
}

/// Where the image can be loaded from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// A file in the cache
    Cached(PathBuf),
    /// The remote locator, unchanged
    Remote(String),
}

impl Resolution {
    /// URI a renderer can load
    pub fn uri(&self) -> String {
        match self {
            Self::Cached(path) => format!("file://{}", path.display()),
            Self::Remote(locator) => locator.clone(),
        }
    }
}

/// Observable state of a spawned request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageState {
    /// Still working
    Loading {
        /// Download percentage
        progress: u8,
    },
    /// Ready to display
    Ready(Resolution),
    /// Show a placeholder instead
    Failed(ResolveError),
}

impl ImageState {
    /// Whether the request has finished
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Loading { .. })
    }
}

/// Resolves locators against one cache context.
pub struct Resolver<S> {
    context: Arc<CacheContext<S>>,
    policy: RetryPolicy,
    in_flight: Arc<InFlight>,
}

impl<S> Clone for Resolver<S> {
    fn clone(&self) -> Self {
        Self {
            context: Arc::clone(&self.context),
            policy: self.policy,
            in_flight: Arc::clone(&self.in_flight),
        }
    }
}

impl<S> std::fmt::Debug for Resolver<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("context", &self.context)
            .field("policy", &self.policy)
            .field("in_flight", &self.in_flight)
            .finish()
    }
}

impl Resolver<FsStore> {
    /// Build a filesystem-backed resolver from user configuration.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let store = FsStore::new(Duration::from_secs(config.request_timeout_secs));
        let context = CacheContext::new(config.cache_configuration()?, Arc::new(store));
        Ok(Self::new(Arc::new(context)).with_policy(config.retry_policy()))
    }
}

impl<S: EntryStore> Resolver<S> {
    /// Create a resolver with the default retry policy
    pub fn new(context: Arc<CacheContext<S>>) -> Self {
        Self {
            context,
            policy: RetryPolicy::default(),
            in_flight: Arc::new(InFlight::default()),
        }
    }

    /// Use a different retry policy
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Get the cache context
    pub fn context(&self) -> &Arc<CacheContext<S>> {
        &self.context
    }

    /// Number of downloads currently running
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Path a locator is cached at
    pub fn cache_path(&self, locator: &str, folder: Option<&str>) -> PathBuf {
        let mut path = self.context.directory();
        if let Some(folder) = folder.map(sanitize_folder).filter(|f| !f.is_empty()) {
            path.push(folder);
        }
        path.push(key::file_name(locator));
        path
    }

    /// Resolve a locator, downloading it into the cache if needed.
    pub async fn resolve(
        &self,
        locator: &str,
        options: &ResolveOptions,
    ) -> Result<Resolution, ResolveError> {
        self.resolve_with(locator, options, None).await
    }

    /// Resolve on a background task and observe its state.
    ///
    /// Dropping the handle cancels the request.
    pub fn spawn(&self, locator: &str, options: ResolveOptions) -> ResolveHandle {
        let (tx, rx) = watch::channel(ImageState::Loading { progress: 0 });
        let resolver = self.clone();
        let locator = locator.to_string();

        let task = tokio::spawn(async move {
            let state = match resolver.resolve_with(&locator, &options, Some(&tx)).await {
                Ok(resolution) => ImageState::Ready(resolution),
                Err(e) => ImageState::Failed(e),
            };
            tx.send_replace(state);
        });

        ResolveHandle { state: rx, task }
    }

    /// Delete the cached copy of a locator.
    ///
    /// Returns `true` if a file was removed.
    pub async fn remove(&self, locator: &str, folder: Option<&str>) -> bool {
        let path = self.cache_path(locator, folder);
        let store = self.context.store();

        match store.exists(&path).await {
            Ok(true) => {}
            Ok(false) => return false,
            Err(e) => {
                tracing::warn!("Cannot check {}: {e}", path.display());
                return false;
            }
        }

        match store.delete(&path).await {
            Ok(()) => {
                tracing::info!("Removed cached file {}", path.display());
                true
            }
            Err(e) => {
                tracing::warn!("Failed to remove {}: {e}", path.display());
                false
            }
        }
    }

    async fn resolve_with(
        &self,
        locator: &str,
        options: &ResolveOptions,
        progress: Option<&watch::Sender<ImageState>>,
    ) -> Result<Resolution, ResolveError> {
        if !options.from_cache {
            return Ok(Resolution::Remote(locator.to_string()));
        }

        let path = self.cache_path(locator, options.cache_folder.as_deref());
        if options.offline {
            return self.resolve_offline(locator, path).await;
        }

        loop {
            match self.in_flight.join(&path) {
                Slot::Leader(guard) => {
                    let mut session = FetchSession::new(locator, path.clone(), self.policy);
                    let outcome = session.run(&self.context, progress).await;
                    guard.finish(&outcome);
                    return outcome.map(Resolution::Cached);
                }
                Slot::Follower(pending) => {
                    tracing::debug!("Joining in-flight fetch of {}", path.display());
                    if let Some(outcome) = inflight::wait(pending).await {
                        return outcome.map(Resolution::Cached);
                    }
                    tracing::debug!("Fetch of {} was abandoned, starting over", path.display());
                }
            }
        }
    }

    async fn resolve_offline(
        &self,
        locator: &str,
        path: PathBuf,
    ) -> Result<Resolution, ResolveError> {
        match self.context.store().exists(&path).await {
            Ok(true) => Ok(Resolution::Cached(path)),
            Ok(false) => Err(ResolveError::Offline {
                locator: locator.to_string(),
            }),
            Err(e) => {
                tracing::warn!("Treating {} as missing: {e}", path.display());
                Err(ResolveError::Offline {
                    locator: locator.to_string(),
                })
            }
        }
    }
}

/// A request running on its own task.
#[derive(Debug)]
pub struct ResolveHandle {
    state: watch::Receiver<ImageState>,
    task: JoinHandle<()>,
}

impl ResolveHandle {
    /// Get the current state
    pub fn state(&self) -> ImageState {
        self.state.borrow().clone()
    }

    /// Get a receiver that sees every state change
    pub fn subscribe(&self) -> watch::Receiver<ImageState> {
        self.state.clone()
    }

    /// Wait until the request succeeds or fails.
    pub async fn finished(&mut self) -> ImageState {
        if let Ok(state) = self.state.wait_for(ImageState::is_terminal).await {
            return (*state).clone();
        }
        self.state()
    }

    /// Cancel the request and wait for it to unwind.
    pub async fn cancel(mut self) {
        self.task.abort();
        let _ = (&mut self.task).await;
    }
}

impl Drop for ResolveHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Keep folder names to a single safe path component
fn sanitize_folder(folder: &str) -> String {
    folder
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect()
}
