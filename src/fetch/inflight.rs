//! Single-flight registry: at most one download per cache path.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

use crate::error::ResolveError;

/// Final result of a fetch, as shared with waiting requests
pub(crate) type Outcome = Result<PathBuf, ResolveError>;

type Pending = watch::Receiver<Option<Outcome>>;

/// Fetches currently running, keyed by cache path
#[derive(Debug, Default)]
pub(crate) struct InFlight {
    fetches: Mutex<HashMap<PathBuf, Pending>>,
}

/// A request's role for one cache path
pub(crate) enum Slot {
    /// Nobody else is fetching: run the session and publish the outcome
    Leader(LeaderGuard),
    /// Another request is fetching: wait for its outcome
    Follower(Pending),
}

impl InFlight {
    /// Lead the fetch for `path`, or follow the one already running.
    pub fn join(self: &Arc<Self>, path: &Path) -> Slot {
        let mut fetches = self.lock();
        if let Some(pending) = fetches.get(path) {
            return Slot::Follower(pending.clone());
        }

        let (tx, rx) = watch::channel(None);
        fetches.insert(path.to_path_buf(), rx);
        Slot::Leader(LeaderGuard {
            registry: Arc::clone(self),
            path: path.to_path_buf(),
            tx,
        })
    }

    /// Number of fetches in progress
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PathBuf, Pending>> {
        self.fetches.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Held by the leading request; unregisters the fetch when dropped.
///
/// A leader dropped without [`LeaderGuard::finish`] (cancelled) closes the
/// channel, and followers start over.
pub(crate) struct LeaderGuard {
    registry: Arc<InFlight>,
    path: PathBuf,
    tx: watch::Sender<Option<Outcome>>,
}

impl LeaderGuard {
    /// Publish the outcome to every follower
    pub fn finish(self, outcome: &Outcome) {
        self.tx.send_replace(Some(outcome.clone()));
    }
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.path);
    }
}

/// Wait for the leader's outcome; `None` if the leader went away.
pub(crate) async fn wait(mut pending: Pending) -> Option<Outcome> {
    match pending.wait_for(Option::is_some).await {
        Ok(outcome) => (*outcome).clone(),
        Err(_) => None,
    }
}
