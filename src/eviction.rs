//! Capacity enforcement for the cache directory.
//!
//! Eviction removes the least recently modified files until the directory
//! fits its byte budget. Modification time is the only recency signal, so a
//! file that is read often but never rewritten still ages out.

use crate::store::{CacheEntry, EntryStore};

/// Outcome of one eviction pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionReport {
    /// Entries selected for deletion
    pub planned: usize,
    /// Entries actually deleted
    pub deleted: usize,
    /// Entries the store refused to delete
    pub failed: usize,
    /// Bytes released by successful deletions
    pub bytes_freed: u64,
}

/// Choose which entries to delete so the rest fit in `capacity_bytes`.
///
/// Entries are taken oldest first and no more are taken once the total is
/// back under capacity. Entries with equal modification times keep their
/// listing order, which depends on the backend.
pub fn plan(mut entries: Vec<CacheEntry>, capacity_bytes: u64) -> Vec<CacheEntry> {
    let total: u64 = entries.iter().map(|e| e.size_bytes).sum();
    if total <= capacity_bytes {
        return Vec::new();
    }

    entries.sort_by_key(|e| e.last_modified);

    let mut overflow = total - capacity_bytes;
    let mut selected = Vec::new();
    for entry in entries {
        if overflow == 0 {
            break;
        }
        overflow = overflow.saturating_sub(entry.size_bytes);
        selected.push(entry);
    }

    selected
}

/// Delete every planned entry, carrying on past individual failures.
pub async fn execute<S: EntryStore>(store: &S, plan: &[CacheEntry]) -> EvictionReport {
    let mut report = EvictionReport {
        planned: plan.len(),
        ..EvictionReport::default()
    };

    for entry in plan {
        match store.delete(&entry.path).await {
            Ok(()) => {
                tracing::debug!(
                    "Evicted {} ({} bytes)",
                    entry.path.display(),
                    entry.size_bytes
                );
                report.deleted += 1;
                report.bytes_freed += entry.size_bytes;
            }
            Err(e) => {
                tracing::warn!("Failed to evict {}: {e}", entry.path.display());
                report.failed += 1;
            }
        }
    }

    report
}
