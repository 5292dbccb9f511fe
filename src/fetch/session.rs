//! The per-request fetch state machine.

use std::path::{Path, PathBuf};

use tokio::sync::watch;

use super::ImageState;
use crate::context::CacheContext;
use crate::error::{FetchError, ResolveError};
use crate::key::{self, CacheKey};
use crate::store::{EntryStore, FetchedFile};

/// Default number of re-downloads after a failed attempt
pub const RETRY_LIMIT: u32 = 1;

/// Default minimum reported progress (percent) for a download to count
pub const COMPLETION_THRESHOLD: u8 = 50;

/// How hard a session tries before giving up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Re-downloads allowed after the first attempt
    pub retry_limit: u32,
    /// Minimum final progress percentage when the size is unknown
    pub completion_threshold: u8,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retry_limit: RETRY_LIMIT,
            completion_threshold: COMPLETION_THRESHOLD,
        }
    }
}

/// Where a session is in its lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchState {
    /// Looking for an existing file
    CheckingCache,
    /// Streaming the resource to disk
    Downloading,
    /// Deciding whether the new file is complete
    Validating,
    /// A download failed; deciding whether to try again
    Retrying,
    /// The file is cached at this path
    Valid(PathBuf),
    /// Attempts are exhausted
    Failed,
}

impl FetchState {
    /// Whether the session has finished
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Valid(_) | Self::Failed)
    }
}

/// One attempt, retries included, to get a locator into the cache.
#[derive(Debug)]
pub struct FetchSession {
    locator: String,
    key: CacheKey,
    path: PathBuf,
    policy: RetryPolicy,
    retry_count: u32,
    state: FetchState,
    last_progress: u8,
    fetched: Option<FetchedFile>,
    last_error: Option<String>,
    history: Vec<FetchState>,
}

impl FetchSession {
    /// Start a session that caches `locator` at `path`.
    pub fn new(locator: &str, path: PathBuf, policy: RetryPolicy) -> Self {
        Self {
            locator: locator.to_string(),
            key: key::derive_key(locator),
            path,
            policy,
            retry_count: 0,
            state: FetchState::CheckingCache,
            last_progress: 0,
            fetched: None,
            last_error: None,
            history: vec![FetchState::CheckingCache],
        }
    }

    /// Get the current state
    pub fn state(&self) -> &FetchState {
        &self.state
    }

    /// Get the cache key
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Get the cache path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-downloads performed so far
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Every state visited, in order
    pub fn history(&self) -> &[FetchState] {
        &self.history
    }

    /// Drive the session to a terminal state.
    ///
    /// Download progress is published on `progress` when given.
    pub async fn run<S: EntryStore>(
        &mut self,
        context: &CacheContext<S>,
        progress: Option<&watch::Sender<ImageState>>,
    ) -> Result<PathBuf, ResolveError> {
        loop {
            match self.state {
                FetchState::CheckingCache => self.check_cache(context).await,
                FetchState::Downloading => self.download(context.store(), progress).await,
                FetchState::Validating => self.validate(context.store()).await,
                FetchState::Retrying => self.retry(),
                FetchState::Valid(ref path) => return Ok(path.clone()),
                FetchState::Failed => {
                    return Err(ResolveError::RetryExhausted {
                        locator: self.locator.clone(),
                        attempts: self.retry_count + 1,
                        last_error: self.last_error.clone().unwrap_or_default(),
                    });
                }
            }
        }
    }

    async fn check_cache<S: EntryStore>(&mut self, context: &CacheContext<S>) {
        let cached = match context.store().exists(&self.path).await {
            Ok(cached) => cached,
            Err(e) => {
                tracing::warn!("Treating {} as missing: {e}", self.path.display());
                false
            }
        };

        if cached {
            self.transition(FetchState::Valid(self.path.clone()));
            return;
        }

        if context.config().evict_on_miss {
            context.trigger_eviction().await;
        }
        self.transition(FetchState::Downloading);
    }

    async fn download<S: EntryStore>(
        &mut self,
        store: &S,
        progress: Option<&watch::Sender<ImageState>>,
    ) {
        let mut last = 0u8;
        let mut on_progress = |percent: u8| {
            last = percent;
            if let Some(tx) = progress {
                tx.send_replace(ImageState::Loading { progress: percent });
            }
        };

        let result = store
            .write_from_fetch(&self.path, &self.locator, &mut on_progress)
            .await;
        self.last_progress = last;

        match result {
            Ok(fetched) => {
                self.fetched = Some(fetched);
                self.transition(FetchState::Validating);
            }
            Err(e) => {
                tracing::warn!("Download of {} failed: {e}", self.locator);
                self.discard(store).await;
                self.last_error = Some(e.to_string());
                self.transition(FetchState::Retrying);
            }
        }
    }

    async fn validate<S: EntryStore>(&mut self, store: &S) {
        let Some(fetched) = self.fetched.take() else {
            self.transition(FetchState::Retrying);
            return;
        };

        // A size announced by the server beats the progress heuristic
        let complete = match fetched.expected_bytes {
            Some(expected) => fetched.entry.size_bytes == expected,
            None => self.last_progress >= self.policy.completion_threshold,
        };

        if complete {
            self.transition(FetchState::Valid(fetched.entry.path));
            return;
        }

        let error = FetchError::IncompleteDownload {
            progress: self.last_progress,
            received: fetched.entry.size_bytes,
            expected: fetched.expected_bytes,
        };
        tracing::warn!("Discarding {}: {error}", self.path.display());
        self.discard(store).await;
        self.last_error = Some(error.to_string());
        self.transition(FetchState::Retrying);
    }

    fn retry(&mut self) {
        if self.retry_count < self.policy.retry_limit {
            self.retry_count += 1;
            self.transition(FetchState::Downloading);
        } else {
            self.transition(FetchState::Failed);
        }
    }

    async fn discard<S: EntryStore>(&self, store: &S) {
        if let Err(e) = store.delete(&self.path).await {
            tracing::warn!("Failed to delete {}: {e}", self.path.display());
        }
    }

    fn transition(&mut self, next: FetchState) {
        tracing::debug!("{}: {:?} -> {:?}", self.locator, self.state, next);
        self.history.push(next.clone());
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CacheConfiguration;
    use crate::store::testing::{Script, ScriptedStore};
    use std::sync::Arc;

    const URL: &str = "https://img.example.com/cats/1.jpg?w=400";

    fn context(store: &Arc<ScriptedStore>, capacity: u64) -> CacheContext<ScriptedStore> {
        CacheContext::new(
            CacheConfiguration {
                total_capacity_bytes: capacity,
                directory_name: "imageCache".to_string(),
                base_dir: PathBuf::from("/cache"),
                evict_on_miss: true,
                evict_on_start: true,
            },
            Arc::clone(store),
        )
    }

    fn target() -> PathBuf {
        PathBuf::from("/cache/imageCache/1.jpg")
    }

    fn session() -> FetchSession {
        FetchSession::new(URL, target(), RetryPolicy::default())
    }

    #[tokio::test]
    async fn test_cache_hit_skips_download() {
        let store = ScriptedStore::new();
        store.seed(target(), 10, 0);
        let context = context(&store, 1_000);

        let mut session = session();
        let path = tokio_test::assert_ok!(session.run(&context, None).await);

        assert_eq!(path, target());
        assert_eq!(store.fetches(), 0);
        assert_eq!(
            session.history(),
            &[FetchState::CheckingCache, FetchState::Valid(target())]
        );
    }

    #[tokio::test]
    async fn test_miss_downloads() {
        let store = ScriptedStore::new();
        store.script([Script::Complete { size: 10 }]);
        let context = context(&store, 1_000);

        let mut session = session();
        let path = tokio_test::assert_ok!(session.run(&context, None).await);

        assert_eq!(path, target());
        assert!(store.contains(&target()));
        assert_eq!(session.key().as_str(), "1");
        assert_eq!(
            session.history(),
            &[
                FetchState::CheckingCache,
                FetchState::Downloading,
                FetchState::Validating,
                FetchState::Valid(target()),
            ]
        );
    }

    #[tokio::test]
    async fn test_miss_triggers_eviction_first() {
        let store = ScriptedStore::new();
        store.seed("/cache/imageCache/old.png", 100, 0);
        store.script([Script::Complete { size: 10 }]);
        let context = context(&store, 50);

        let mut session = session();
        tokio_test::assert_ok!(session.run(&context, None).await);

        assert_eq!(store.deleted(), vec![PathBuf::from("/cache/imageCache/old.png")]);
        assert_eq!(store.paths(), vec![target()]);
    }

    #[tokio::test]
    async fn test_low_progress_is_discarded_and_retried() {
        let store = ScriptedStore::new();
        store.script([
            Script::Partial { progress: 30, size: 3 },
            Script::Complete { size: 10 },
        ]);
        let context = context(&store, 1_000);

        let mut session = session();
        tokio_test::assert_ok!(session.run(&context, None).await);

        assert_eq!(store.fetches(), 2);
        assert_eq!(store.deleted(), vec![target()]);
        assert_eq!(session.retry_count(), 1);
        assert_eq!(
            &session.history()[..5],
            &[
                FetchState::CheckingCache,
                FetchState::Downloading,
                FetchState::Validating,
                FetchState::Retrying,
                FetchState::Downloading,
            ]
        );
        assert_eq!(session.state(), &FetchState::Valid(target()));
    }

    #[tokio::test]
    async fn test_progress_at_threshold_is_valid() {
        let store = ScriptedStore::new();
        store.script([Script::Partial { progress: 50, size: 3 }]);
        let context = context(&store, 1_000);

        let mut session = session();
        tokio_test::assert_ok!(session.run(&context, None).await);
        assert_eq!(store.fetches(), 1);
        assert!(store.deleted().is_empty());
    }

    #[tokio::test]
    async fn test_size_mismatch_is_incomplete() {
        let store = ScriptedStore::new();
        store.script([
            Script::ShortOfExpected { size: 40, expected: 100 },
            Script::ShortOfExpected { size: 40, expected: 100 },
        ]);
        let context = context(&store, 1_000);

        let mut session = session();
        let err = tokio_test::assert_err!(session.run(&context, None).await);

        match err {
            ResolveError::RetryExhausted { last_error, .. } => {
                assert!(last_error.contains("incomplete"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!store.contains(&target()));
    }

    #[tokio::test]
    async fn test_retry_limit_reached() {
        let store = ScriptedStore::new();
        store.script([Script::Transport, Script::Transport, Script::Complete { size: 10 }]);
        let context = context(&store, 1_000);

        let mut session = session();
        let err = tokio_test::assert_err!(session.run(&context, None).await);

        assert_eq!(
            err,
            ResolveError::RetryExhausted {
                locator: URL.to_string(),
                attempts: 2,
                last_error: "transport error: connection reset".to_string(),
            }
        );
        // The queued success is never used
        assert_eq!(store.fetches(), 2);
        assert_eq!(session.state(), &FetchState::Failed);
        assert!(session.state().is_terminal());
    }

    #[tokio::test]
    async fn test_no_retries_when_limit_is_zero() {
        let store = ScriptedStore::new();
        store.script([Script::Transport, Script::Complete { size: 10 }]);
        let context = context(&store, 1_000);

        let policy = RetryPolicy {
            retry_limit: 0,
            ..RetryPolicy::default()
        };
        let mut session = FetchSession::new(URL, target(), policy);
        tokio_test::assert_err!(session.run(&context, None).await);
        assert_eq!(store.fetches(), 1);
    }

    #[tokio::test]
    async fn test_failed_existence_check_counts_as_miss() {
        let store = ScriptedStore::new();
        store.seed(target(), 10, 0);
        store.fail_exists();
        store.script([Script::Complete { size: 12 }]);
        let context = context(&store, 1_000);

        let mut session = session();
        tokio_test::assert_ok!(session.run(&context, None).await);
        assert_eq!(store.fetches(), 1);
    }

    #[tokio::test]
    async fn test_progress_is_published() {
        let store = ScriptedStore::new();
        store.script([Script::Complete { size: 10 }]);
        let context = context(&store, 1_000);
        let (tx, rx) = watch::channel(ImageState::Loading { progress: 0 });

        let mut session = session();
        tokio_test::assert_ok!(session.run(&context, Some(&tx)).await);
        assert_eq!(*rx.borrow(), ImageState::Loading { progress: 100 });
    }
}
