//! Sliding window counters.
//!
//! Each client has one score-ordered set per horizon. A member's score is the
//! arrival time of the request it stands for, so counting the members newer
//! than `now - horizon` gives an exact sliding-window count.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::trace;
use uuid::Uuid;

use super::rules::Rule;
use crate::store::KeyValueStore;

/// Time horizon of a sliding window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Horizon {
    /// Trailing 60 seconds
    Minute,
    /// Trailing hour
    Hour,
    /// Trailing day
    Day,
}

impl Horizon {
    /// All horizons, shortest first. Checks run in this order.
    pub const ALL: [Horizon; 3] = [Horizon::Minute, Horizon::Hour, Horizon::Day];

    /// Get the duration of this horizon.
    pub fn duration(&self) -> Duration {
        match self {
            Horizon::Minute => Duration::from_secs(60),
            Horizon::Hour => Duration::from_secs(3600),
            Horizon::Day => Duration::from_secs(86400),
        }
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.duration().as_secs_f64()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Horizon::Minute => "minute",
            Horizon::Hour => "hour",
            Horizon::Day => "day",
        }
    }

    /// Store key of this horizon's set for a client.
    pub fn key(&self, client_id: &str) -> String {
        format!("ratelimit:{}:{}", self.as_str(), client_id)
    }
}

impl std::fmt::Display for Horizon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Window counts after an admitted request, including that request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WindowUsage {
    pub minute_count: u64,
    pub hour_count: u64,
    pub day_count: u64,
}

/// Why the window check refused a request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WindowDenial {
    /// The shortest horizon that was full
    pub horizon: Horizon,
    /// Requests already counted in that horizon
    pub current: u64,
    /// The horizon's limit
    pub limit: u64,
    /// When the oldest counted request leaves the window, i.e. its score
    /// plus the horizon length. This is the earliest moment a slot frees up,
    /// not the start of the window plus the horizon.
    pub reset_time: f64,
}

/// Purge stale members, count, and admit the request into every horizon
/// if none of them is full.
///
/// Callers serialize invocations for the same client.
pub(crate) fn check_windows(
    store: &dyn KeyValueStore,
    client_id: &str,
    rule: &Rule,
    now: f64,
) -> Result<WindowUsage, WindowDenial> {
    let keys = Horizon::ALL.map(|h| h.key(client_id));
    let mut counts = [0u64; 3];

    for (i, horizon) in Horizon::ALL.iter().enumerate() {
        store.remove_scored_range(&keys[i], 0.0, now - horizon.as_secs_f64());
        counts[i] = store.cardinality(&keys[i]) as u64;
    }

    trace!(
        client_id = %client_id,
        minute = counts[0],
        hour = counts[1],
        day = counts[2],
        "Window counts"
    );

    for (i, horizon) in Horizon::ALL.iter().enumerate() {
        let limit = rule.limit_for(*horizon);
        if counts[i] >= limit {
            let oldest = store.min_score(&keys[i]).unwrap_or(now);
            return Err(WindowDenial {
                horizon: *horizon,
                current: counts[i],
                limit,
                reset_time: oldest + horizon.as_secs_f64(),
            });
        }
    }

    let member = Uuid::new_v4().to_string();
    for key in &keys {
        store.add_scored(key, now, &member);
    }

    Ok(WindowUsage {
        minute_count: counts[0] + 1,
        hour_count: counts[1] + 1,
        day_count: counts[2] + 1,
    })
}

/// Drop a client's members that have aged out of every horizon.
///
/// Sets left empty disappear from the store. Returns members removed.
pub(crate) fn prune_windows(store: &dyn KeyValueStore, client_id: &str, now: f64) -> usize {
    Horizon::ALL
        .iter()
        .map(|h| store.remove_scored_range(&h.key(client_id), 0.0, now - h.as_secs_f64()))
        .sum()
}
