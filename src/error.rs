//! Error types for the cache engine

use std::path::PathBuf;

use thiserror::Error;

/// Failure reported by the storage backend
#[derive(Debug, Error)]
pub enum StoreError {
    /// A filesystem call failed
    #[error("storage unavailable at {}: {source}", path.display())]
    Unavailable {
        /// Path the call was made against
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Unavailable {
            path: path.into(),
            source,
        }
    }
}

/// Failure of a single download attempt
#[derive(Debug, Error)]
pub enum FetchError {
    /// Connection, status or stream failure
    #[error("transport error: {0}")]
    Transport(String),

    /// The stream finished but the file is too short to trust
    #[error("download incomplete: {received} bytes written, {progress}% reported")]
    IncompleteDownload {
        /// Last progress percentage reported during the stream
        progress: u8,
        /// Bytes actually written
        received: u64,
        /// Size announced by the remote end, if any
        expected: Option<u64>,
    },

    /// Writing the file locally failed
    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Terminal failure of a resolve request
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// Every download attempt failed
    #[error("giving up on {locator} after {attempts} attempts: {last_error}")]
    RetryExhausted {
        /// Locator that was requested
        locator: String,
        /// Number of downloads attempted
        attempts: u32,
        /// Description of the final failure
        last_error: String,
    },

    /// Nothing cached and downloads are disabled
    #[error("{locator} is not cached and the cache is offline")]
    Offline {
        /// Locator that was requested
        locator: String,
    },
}
