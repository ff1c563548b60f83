//! Token bucket burst guard.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::rules::Rule;
use crate::store::KeyValueStore;

/// Persisted bucket state for one client.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketState {
    /// Tokens currently available, never above the rule's burst limit
    pub tokens: u32,
    /// Epoch seconds of the last refill
    pub last_refill: f64,
}

impl BucketState {
    /// A full bucket.
    pub fn full(rule: &Rule, now: f64) -> Self {
        Self {
            tokens: rule.burst_limit,
            last_refill: now,
        }
    }

    /// Credit one token per whole refill window elapsed since the last refill.
    ///
    /// Partial windows are not carried over: a refill resets the reference
    /// point to `now`.
    pub fn refill(&mut self, rule: &Rule, now: f64) {
        let window = rule.burst_window_seconds.max(1) as f64;
        let elapsed = (now - self.last_refill).max(0.0);
        let tokens_to_add = (elapsed / window).floor() as u64;

        if tokens_to_add > 0 {
            let refilled = (self.tokens as u64).saturating_add(tokens_to_add);
            self.tokens = refilled.min(rule.burst_limit as u64) as u32;
            self.last_refill = now;
        }
        // A replaced rule may have lowered the cap
        self.tokens = self.tokens.min(rule.burst_limit);
    }

    /// Consume a token if one is available.
    pub fn try_take(&mut self) -> bool {
        if self.tokens == 0 {
            return false;
        }
        self.tokens -= 1;
        true
    }
}

/// Bucket status after an admitted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BurstUsage {
    pub tokens_remaining: u32,
    pub burst_limit: u32,
}

/// Why the burst check refused a request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BurstDenial {
    pub burst_limit: u32,
    /// Earliest time a token becomes available again
    pub refill_time: f64,
}

/// Store key of a client's bucket.
pub fn burst_key(client_id: &str) -> String {
    format!("burst:{}", client_id)
}

/// Refill, then try to take one token from the client's bucket.
///
/// State is written back either way, with a TTL of two refill windows so
/// idle buckets disappear. Callers serialize invocations for the same client.
pub(crate) fn check_burst(
    store: &dyn KeyValueStore,
    client_id: &str,
    rule: &Rule,
    now: f64,
) -> Result<BurstUsage, BurstDenial> {
    let key = burst_key(client_id);

    let mut state = match store.get(&key) {
        Some(value) => serde_json::from_value(value).unwrap_or_else(|e| {
            debug!(key = %key, error = %e, "Discarding unreadable bucket state");
            BucketState::full(rule, now)
        }),
        None => {
            debug!(client_id = %client_id, tokens = rule.burst_limit, "Creating new burst bucket");
            BucketState::full(rule, now)
        }
    };

    state.refill(rule, now);
    let taken = state.try_take();

    let ttl = rule
        .burst_window()
        .checked_mul(2)
        .unwrap_or(Duration::MAX);
    match serde_json::to_value(state) {
        Ok(value) => store.set(&key, value, Some(ttl)),
        Err(e) => debug!(key = %key, error = %e, "Failed to encode bucket state"),
    }

    if taken {
        Ok(BurstUsage {
            tokens_remaining: state.tokens,
            burst_limit: rule.burst_limit,
        })
    } else {
        Err(BurstDenial {
            burst_limit: rule.burst_limit,
            refill_time: state.last_refill + rule.burst_window_seconds as f64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::sync::Arc;

    const NOW: f64 = 1_700_000_000.0;

    fn auth_rule() -> Rule {
        Rule::default().with_limits(10, 100).with_burst(3, 1)
    }

    #[test]
    fn test_refill_is_capped() {
        let rule = auth_rule();
        let mut state = BucketState { tokens: 0, last_refill: NOW };

        state.refill(&rule, NOW + 1000.0);
        assert_eq!(state.tokens, 3);
        assert_eq!(state.last_refill, NOW + 1000.0);
    }

    #[test]
    fn test_refill_ignores_partial_windows() {
        let rule = Rule::default().with_burst(5, 2);
        let mut state = BucketState { tokens: 0, last_refill: NOW };

        state.refill(&rule, NOW + 1.9);
        assert_eq!(state.tokens, 0);
        assert_eq!(state.last_refill, NOW);

        state.refill(&rule, NOW + 5.0);
        assert_eq!(state.tokens, 2);
        assert_eq!(state.last_refill, NOW + 5.0);
    }

    #[test]
    fn test_refill_tolerates_clock_going_backwards() {
        let rule = auth_rule();
        let mut state = BucketState { tokens: 1, last_refill: NOW };

        state.refill(&rule, NOW - 100.0);
        assert_eq!(state.tokens, 1);
    }

    #[test]
    fn test_refill_clamps_to_lowered_cap() {
        let rule = auth_rule();
        let mut state = BucketState { tokens: 10, last_refill: NOW };

        state.refill(&rule, NOW);
        assert_eq!(state.tokens, 3);
    }

    #[test]
    fn test_try_take_never_goes_negative() {
        let mut state = BucketState { tokens: 1, last_refill: NOW };
        assert!(state.try_take());
        assert!(!state.try_take());
        assert_eq!(state.tokens, 0);
    }

    #[test]
    fn test_check_burst_exhausts_then_denies() {
        let store = MemoryStore::new();
        let rule = auth_rule();

        for expected in [2, 1, 0] {
            let usage = check_burst(&store, "c", &rule, NOW).unwrap();
            assert_eq!(usage.tokens_remaining, expected);
            assert_eq!(usage.burst_limit, 3);
        }

        let denial = check_burst(&store, "c", &rule, NOW + 0.5).unwrap_err();
        assert_eq!(denial.refill_time, NOW + 1.0);

        // One window later a single token is back
        let usage = check_burst(&store, "c", &rule, NOW + 1.1).unwrap();
        assert_eq!(usage.tokens_remaining, 0);
    }

    #[test]
    fn test_check_burst_persists_with_ttl() {
        let clock = Arc::new(ManualClock::new(NOW));
        let store = MemoryStore::with_clock(clock.clone());
        let rule = auth_rule();

        check_burst(&store, "c", &rule, clock.now()).unwrap();
        let stored: BucketState = serde_json::from_value(store.get("burst:c").unwrap()).unwrap();
        assert_eq!(stored.tokens, 2);

        clock.advance(Duration::from_secs(2));
        assert!(!store.exists("burst:c"));
    }

    #[test]
    fn test_check_burst_with_huge_refill_window() {
        let clock = Arc::new(ManualClock::new(NOW));
        let store = MemoryStore::with_clock(clock.clone());
        let rule = Rule::default().with_burst(2, u64::MAX);

        let usage = check_burst(&store, "c", &rule, clock.now()).unwrap();
        assert_eq!(usage.tokens_remaining, 1);
        check_burst(&store, "c", &rule, clock.now()).unwrap();

        let denial = check_burst(&store, "c", &rule, clock.now()).unwrap_err();
        assert!(denial.refill_time > NOW);

        // The saturated TTL keeps the bucket around
        clock.advance(Duration::from_secs(10 * 86400));
        assert!(store.exists("burst:c"));
    }

    #[test]
    fn test_check_burst_recovers_from_garbage_state() {
        let store = MemoryStore::new();
        store.set("burst:c", json!("garbage"), None);

        let usage = check_burst(&store, "c", &auth_rule(), NOW).unwrap();
        assert_eq!(usage.tokens_remaining, 2);
    }
}
