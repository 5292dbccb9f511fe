//! Cache key derivation from resource locators.
//!
//! Keys depend only on the last path segment of a locator. Query strings
//! and fragments never take part, so `a.jpg?w=1` and `a.jpg?w=2` share one
//! cached file.

use std::fmt;

/// Stem used when a locator has no usable path segment
const EMPTY_KEY_STEM: &str = "unnamed";

/// Filesystem-safe identifier for a cached resource
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Key for a file already on disk, taken from its name.
    pub fn from_file_name(name: &str) -> Self {
        Self(sanitize(strip_extension(name)))
    }

    /// Get the key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the locator had nothing to derive a key from
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the cache key for a locator.
pub fn derive_key(locator: &str) -> CacheKey {
    CacheKey(sanitize(strip_extension(last_segment(locator))))
}

/// Derive the file extension of a locator, without the dot.
///
/// Returns an empty string when the final path segment has no `.`.
pub fn derive_extension(locator: &str) -> String {
    let segment = last_segment(locator);
    segment
        .rfind('.')
        .map(|i| segment[i + 1..].to_string())
        .unwrap_or_default()
}

/// Name of the file a locator is cached under.
pub fn file_name(locator: &str) -> String {
    let key = derive_key(locator);
    let extension = sanitize(&derive_extension(locator));
    let stem = if key.is_empty() {
        EMPTY_KEY_STEM
    } else {
        key.as_str()
    };

    if extension.is_empty() {
        stem.to_string()
    } else {
        format!("{stem}.{extension}")
    }
}

/// Final path segment, with query, fragment and authority removed
fn last_segment(locator: &str) -> &str {
    let end = locator.find(['?', '#']).unwrap_or(locator.len());
    let locator = &locator[..end];

    let path = match locator.find("://") {
        Some(i) => {
            let rest = &locator[i + 3..];
            rest.find('/').map_or("", |j| &rest[j..])
        }
        None => locator,
    };

    path.rsplit('/').next().unwrap_or("")
}

fn strip_extension(segment: &str) -> &str {
    segment.rfind('.').map_or(segment, |i| &segment[..i])
}

fn sanitize(input: &str) -> String {
    input
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}
