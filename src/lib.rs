//! # imgstash
//!
//! A disk cache for remote images.
//!
//! ## Overview
//!
//! imgstash turns image URLs into local files. The first request for a URL
//! downloads it into a cache directory; later requests are served from disk.
//! Downloads that fail or come back truncated are retried a bounded number
//! of times, and the directory is kept under a byte budget by deleting the
//! least recently modified files.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Resolver                            │
//! │   Single-flight per file, spawn/cancel, offline & remote    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!          ┌───────────────────┼───────────────────┐
//!          ▼                   ▼                   ▼
//! ┌─────────────────┐ ┌─────────────────┐ ┌─────────────────┐
//! │       Key       │ │  FetchSession   │ │  CacheContext   │
//! │                 │ │                 │ │                 │
//! │ • Cache key     │ │ • Check cache   │ │ • Capacity      │
//! │ • Extension     │ │ • Download      │ │ • Directory     │
//! │ • File name     │ │ • Validate/retry│ │ • Eviction hook │
//! └─────────────────┘ └─────────────────┘ └─────────────────┘
//!                              │                   │
//!                              ▼                   ▼
//!                     ┌─────────────────┐ ┌─────────────────┐
//!                     │   EntryStore    │◀│    Eviction     │
//!                     │                 │ │                 │
//!                     │ • exists / list │ │ • Oldest first  │
//!                     │ • delete        │ │ • Best effort   │
//!                     │ • download      │ │                 │
//!                     └─────────────────┘ └─────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`key`] - Cache keys and file names from URLs
//! - [`store`] - Storage backend trait and the filesystem implementation
//! - [`fetch`] - Resolver and the per-request fetch state machine
//! - [`eviction`] - Capacity enforcement
//! - [`context`] - Shared cache configuration and eviction trigger
//! - [`config`] - User configuration file
//!
//! ## Example
//!
//! ```no_run
//! use imgstash::{Config, ResolveOptions, Resolver};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let resolver = Resolver::from_config(&Config::load()?)?;
//!     let image = resolver
//!         .resolve("https://img.example.com/cats/1.jpg", &ResolveOptions::default())
//!         .await?;
//!     println!("{}", image.uri());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::cast_possible_truncation)]

pub mod config;
pub mod context;
pub mod error;
pub mod eviction;
pub mod fetch;
pub mod key;
pub mod paths;
pub mod store;

// Re-export main types for convenience
pub use config::Config;
pub use context::{CacheConfiguration, CacheContext};
pub use error::{FetchError, ResolveError, StoreError};
pub use eviction::EvictionReport;
pub use fetch::{
    FetchSession, FetchState, ImageState, Resolution, ResolveHandle, ResolveOptions, Resolver,
    RetryPolicy,
};
pub use key::CacheKey;
pub use store::{CacheEntry, EntryStore, FsStore};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
