//! Key-value storage for rate limit state.
//!
//! The limiter talks to storage through the [`KeyValueStore`] trait, which
//! mirrors the small subset of a remote cache's command surface it needs:
//! scalar values with optional TTL, counters, and score-ordered member sets.

mod memory;
mod scored;

use std::time::Duration;

use serde_json::Value;

pub use memory::MemoryStore;
pub use scored::ScoredSet;

/// Trait for rate limit state storage.
///
/// Implementations must be safe to call from many threads at once. None of
/// the operations can fail; a missing or expired key simply reads as absent.
pub trait KeyValueStore: Send + Sync {
    /// Get a scalar value, applying lazy expiry first.
    fn get(&self, key: &str) -> Option<Value>;

    /// Overwrite a value. `None` for `ttl` clears any previous expiry.
    fn set(&self, key: &str, value: Value, ttl: Option<Duration>);

    /// Add `delta` to an integer counter, treating a missing key as 0.
    fn increment(&self, key: &str, delta: i64) -> i64;

    /// Insert a member into the key's score-ordered set.
    fn add_scored(&self, key: &str, score: f64, member: &str);

    /// Remove every member whose score lies in `[min, max]`.
    ///
    /// Returns the number of members removed.
    fn remove_scored_range(&self, key: &str, min: f64, max: f64) -> usize;

    /// Number of members in the key's ordered set.
    fn cardinality(&self, key: &str) -> usize;

    /// Lowest score currently in the key's ordered set.
    fn min_score(&self, key: &str) -> Option<f64>;

    /// Delete a key of any kind. Returns whether it existed.
    fn delete(&self, key: &str) -> bool;

    /// Whether a live (non-expired) key exists.
    fn exists(&self, key: &str) -> bool;

    /// Number of live keys.
    fn len(&self) -> usize;

    /// Whether the store holds no live keys.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Eagerly drop every expired key. Returns how many were dropped.
    fn purge_expired(&self) -> usize;
}
