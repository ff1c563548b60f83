//! In-memory key-value store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{trace, warn};

use super::scored::ScoredSet;
use super::KeyValueStore;
use crate::clock::{Clock, SystemClock};

#[derive(Debug)]
enum Slot {
    Scalar(Value),
    Scored(ScoredSet),
}

#[derive(Debug)]
struct Entry {
    slot: Slot,
    /// Epoch seconds at which the entry stops existing
    expires_at: Option<f64>,
}

impl Entry {
    fn scalar(value: Value) -> Self {
        Self {
            slot: Slot::Scalar(value),
            expires_at: None,
        }
    }

    fn is_expired(&self, now: f64) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

/// Look up a key, deleting it first if its TTL has elapsed.
fn live<'a>(entries: &'a mut HashMap<String, Entry>, key: &str, now: f64) -> Option<&'a mut Entry> {
    if entries.get(key).is_some_and(|e| e.is_expired(now)) {
        trace!(key = %key, "Expiring key");
        entries.remove(key);
        return None;
    }
    entries.get_mut(key)
}

/// Process-local store guarded by a single mutex.
///
/// Every operation takes the lock once, so compound steps such as
/// expire-then-read or read-then-increment are atomic per call.
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("keys", &self.entries.lock().len())
            .finish()
    }
}

impl MemoryStore {
    /// Create a store on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a store that measures TTLs against `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Value> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        match live(&mut entries, key, now) {
            Some(Entry {
                slot: Slot::Scalar(value),
                ..
            }) => Some(value.clone()),
            _ => None,
        }
    }

    fn set(&self, key: &str, value: Value, ttl: Option<Duration>) {
        let now = self.clock.now();
        let mut entry = Entry::scalar(value);
        entry.expires_at = ttl.map(|ttl| now + ttl.as_secs_f64());
        self.entries.lock().insert(key.to_string(), entry);
    }

    fn increment(&self, key: &str, delta: i64) -> i64 {
        let now = self.clock.now();
        let mut entries = self.entries.lock();

        if let Some(entry) = live(&mut entries, key, now) {
            let current = match &entry.slot {
                Slot::Scalar(value) => value.as_i64().unwrap_or_else(|| {
                    warn!(key = %key, "Incrementing a non-integer value, treating it as 0");
                    0
                }),
                Slot::Scored(_) => {
                    warn!(key = %key, "Incrementing an ordered set, replacing it with a counter");
                    0
                }
            };
            let next = current.wrapping_add(delta);
            // TTL survives the increment
            entry.slot = Slot::Scalar(Value::from(next));
            return next;
        }

        entries.insert(key.to_string(), Entry::scalar(Value::from(delta)));
        delta
    }

    fn add_scored(&self, key: &str, score: f64, member: &str) {
        let now = self.clock.now();
        let mut entries = self.entries.lock();

        if let Some(entry) = live(&mut entries, key, now) {
            match &mut entry.slot {
                Slot::Scored(set) => set.insert(score, member),
                Slot::Scalar(_) => {
                    warn!(key = %key, "Adding a scored member over a scalar, replacing it");
                    let mut set = ScoredSet::new();
                    set.insert(score, member);
                    entry.slot = Slot::Scored(set);
                }
            }
            return;
        }

        let mut set = ScoredSet::new();
        set.insert(score, member);
        entries.insert(
            key.to_string(),
            Entry {
                slot: Slot::Scored(set),
                expires_at: None,
            },
        );
    }

    fn remove_scored_range(&self, key: &str, min: f64, max: f64) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock();

        let (removed, now_empty) = match live(&mut entries, key, now) {
            Some(Entry {
                slot: Slot::Scored(set),
                ..
            }) => {
                let removed = set.remove_range(min, max);
                (removed, set.is_empty())
            }
            _ => return 0,
        };

        if now_empty {
            entries.remove(key);
        }
        removed
    }

    fn cardinality(&self, key: &str) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        match live(&mut entries, key, now) {
            Some(Entry {
                slot: Slot::Scored(set),
                ..
            }) => set.len(),
            _ => 0,
        }
    }

    fn min_score(&self, key: &str) -> Option<f64> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        match live(&mut entries, key, now) {
            Some(Entry {
                slot: Slot::Scored(set),
                ..
            }) => set.min_score(),
            _ => None,
        }
    }

    fn delete(&self, key: &str) -> bool {
        self.entries.lock().remove(key).is_some()
    }

    fn exists(&self, key: &str) -> bool {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        live(&mut entries, key, now).is_some()
    }

    fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries
            .lock()
            .values()
            .filter(|e| !e.is_expired(now))
            .count()
    }

    fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(now));
        before - entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use serde_json::json;

    fn store_with_clock() -> (MemoryStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        (MemoryStore::with_clock(clock.clone()), clock)
    }

    #[test]
    fn test_get_set() {
        let (store, _) = store_with_clock();
        assert_eq!(store.get("missing"), None);

        store.set("k", json!({"tokens": 3}), None);
        assert_eq!(store.get("k"), Some(json!({"tokens": 3})));
    }

    #[test]
    fn test_ttl_expires_lazily() {
        let (store, clock) = store_with_clock();
        store.set("k", json!(1), Some(Duration::from_secs(2)));

        clock.advance(Duration::from_millis(1999));
        assert!(store.exists("k"));

        clock.advance(Duration::from_millis(1));
        assert!(!store.exists("k"));
        assert_eq!(store.get("k"), None);
    }

    #[test]
    fn test_set_without_ttl_clears_expiry() {
        let (store, clock) = store_with_clock();
        store.set("k", json!(1), Some(Duration::from_secs(1)));
        store.set("k", json!(2), None);

        clock.advance(Duration::from_secs(10));
        assert_eq!(store.get("k"), Some(json!(2)));
    }

    #[test]
    fn test_increment() {
        let (store, _) = store_with_clock();
        assert_eq!(store.increment("hits", 1), 1);
        assert_eq!(store.increment("hits", 5), 6);
        assert_eq!(store.increment("hits", -2), 4);
        assert_eq!(store.get("hits"), Some(json!(4)));
    }

    #[test]
    fn test_increment_preserves_ttl() {
        let (store, clock) = store_with_clock();
        store.set("hits", json!(10), Some(Duration::from_secs(5)));
        assert_eq!(store.increment("hits", 1), 11);

        clock.advance(Duration::from_secs(5));
        assert!(!store.exists("hits"));
        // Expired counter restarts from zero
        assert_eq!(store.increment("hits", 1), 1);
    }

    #[test]
    fn test_increment_non_integer_counts_as_zero() {
        let (store, _) = store_with_clock();
        store.set("k", json!("text"), None);
        assert_eq!(store.increment("k", 3), 3);
    }

    #[test]
    fn test_scored_set_operations() {
        let (store, _) = store_with_clock();
        store.add_scored("z", 10.0, "a");
        store.add_scored("z", 5.0, "b");
        store.add_scored("z", 10.0, "a");

        assert_eq!(store.cardinality("z"), 3);
        assert_eq!(store.min_score("z"), Some(5.0));
        assert_eq!(store.cardinality("absent"), 0);

        assert_eq!(store.remove_scored_range("z", 0.0, 5.0), 1);
        assert_eq!(store.cardinality("z"), 2);
        assert_eq!(store.min_score("z"), Some(10.0));
    }

    #[test]
    fn test_emptied_scored_set_is_dropped() {
        let (store, _) = store_with_clock();
        store.add_scored("z", 1.0, "a");
        assert_eq!(store.len(), 1);

        assert_eq!(store.remove_scored_range("z", 0.0, 1.0), 1);
        assert!(!store.exists("z"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_get_on_scored_key_is_absent() {
        let (store, _) = store_with_clock();
        store.add_scored("z", 1.0, "a");
        assert_eq!(store.get("z"), None);
        assert!(store.exists("z"));
    }

    #[test]
    fn test_delete() {
        let (store, _) = store_with_clock();
        store.set("k", json!(true), None);
        assert!(store.delete("k"));
        assert!(!store.delete("k"));
        assert!(!store.exists("k"));
    }

    #[test]
    fn test_len_and_purge_expired() {
        let (store, clock) = store_with_clock();
        store.set("short", json!(1), Some(Duration::from_secs(1)));
        store.set("long", json!(1), Some(Duration::from_secs(100)));
        store.set("forever", json!(1), None);
        assert_eq!(store.len(), 3);

        clock.advance(Duration::from_secs(2));
        assert_eq!(store.len(), 2);
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.purge_expired(), 0);
    }

    #[test]
    fn test_concurrent_increments() {
        let store = Arc::new(MemoryStore::new());

        std::thread::scope(|s| {
            for _ in 0..8 {
                let store = store.clone();
                s.spawn(move || {
                    for _ in 0..1000 {
                        store.increment("shared", 1);
                    }
                });
            }
        });

        assert_eq!(store.get("shared"), Some(json!(8000)));
    }
}
