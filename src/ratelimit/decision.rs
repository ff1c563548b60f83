//! Outcome of a rate limit check.

use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{json, Map, Value};
use std::time::Duration;

use super::bucket::{BurstDenial, BurstUsage};
use super::window::{WindowDenial, WindowUsage};

/// Why a request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DenyReason {
    Blacklisted,
    BurstLimitExceeded,
    RateLimitExceeded,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::Blacklisted => "blacklisted",
            DenyReason::BurstLimitExceeded => "burst_limit_exceeded",
            DenyReason::RateLimitExceeded => "rate_limit_exceeded",
        }
    }
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which branch of the check produced the decision.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// The rule is switched off
    Disabled,
    /// The address is on the rule's whitelist
    Whitelisted,
    /// Both quantitative checks passed
    Allowed {
        burst: BurstUsage,
        window: WindowUsage,
    },
    /// The address is on the rule's blacklist
    Blacklisted,
    /// The burst bucket is empty
    BurstLimited(BurstDenial),
    /// A sliding window is full
    RateLimited(WindowDenial),
}

/// The result of [`RateLimiter::check_rate_limit`](super::RateLimiter::check_rate_limit).
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    /// Name of the rule that was applied
    pub rule: String,
    /// Name the caller asked for, when it was unknown and the default applied
    pub requested_rule: Option<String>,
    /// Masked client identifier; absent when the rule is disabled
    pub client_id: Option<String>,
    pub verdict: Verdict,
}

impl Decision {
    pub fn allowed(&self) -> bool {
        matches!(
            self.verdict,
            Verdict::Disabled | Verdict::Whitelisted | Verdict::Allowed { .. }
        )
    }

    pub fn reason(&self) -> Option<DenyReason> {
        match self.verdict {
            Verdict::Blacklisted => Some(DenyReason::Blacklisted),
            Verdict::BurstLimited(_) => Some(DenyReason::BurstLimitExceeded),
            Verdict::RateLimited(_) => Some(DenyReason::RateLimitExceeded),
            _ => None,
        }
    }

    /// Status label for admitted requests.
    pub fn status(&self) -> Option<&'static str> {
        match self.verdict {
            Verdict::Disabled => Some("disabled"),
            Verdict::Whitelisted => Some("whitelisted"),
            Verdict::Allowed { .. } => Some("allowed"),
            _ => None,
        }
    }

    /// Epoch seconds after which a refused request may succeed.
    ///
    /// `None` for admitted requests and for blacklisting, which never clears.
    pub fn retry_at(&self) -> Option<f64> {
        match &self.verdict {
            Verdict::BurstLimited(denial) => Some(denial.refill_time),
            Verdict::RateLimited(denial) => Some(denial.reset_time),
            _ => None,
        }
    }

    /// How long a refused client should wait, suitable for `Retry-After`.
    pub fn retry_after(&self, now: f64) -> Option<Duration> {
        self.retry_at()
            .map(|at| Duration::from_secs_f64((at - now).max(0.0)))
    }

    /// Diagnostic details as a flat string-keyed map.
    pub fn info(&self) -> Map<String, Value> {
        let mut info = Map::new();
        info.insert("rule".into(), json!(self.rule));
        if let Some(requested) = &self.requested_rule {
            info.insert("requested_rule".into(), json!(requested));
        }
        if let Some(client_id) = &self.client_id {
            info.insert("client_id".into(), json!(client_id));
        }
        if let Some(status) = self.status() {
            info.insert("status".into(), json!(status));
        }
        if let Some(reason) = self.reason() {
            info.insert("reason".into(), json!(reason.as_str()));
        }

        match &self.verdict {
            Verdict::Allowed { burst, window } => {
                info.insert("minute_count".into(), json!(window.minute_count));
                info.insert("hour_count".into(), json!(window.hour_count));
                info.insert("day_count".into(), json!(window.day_count));
                info.insert("tokens_remaining".into(), json!(burst.tokens_remaining));
                info.insert("burst_limit".into(), json!(burst.burst_limit));
            }
            Verdict::BurstLimited(denial) => {
                info.insert("limit_type".into(), json!("burst"));
                info.insert("tokens_remaining".into(), json!(0));
                info.insert("burst_limit".into(), json!(denial.burst_limit));
                info.insert("refill_time".into(), json!(denial.refill_time));
            }
            Verdict::RateLimited(denial) => {
                info.insert("limit_type".into(), json!(denial.horizon.as_str()));
                info.insert("current".into(), json!(denial.current));
                info.insert("limit".into(), json!(denial.limit));
                info.insert("reset_time".into(), json!(denial.reset_time));
            }
            Verdict::Disabled | Verdict::Whitelisted | Verdict::Blacklisted => {}
        }

        info
    }
}

impl Serialize for Decision {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let info = self.info();
        let mut map = serializer.serialize_map(Some(info.len() + 1))?;
        map.serialize_entry("allowed", &self.allowed())?;
        for (key, value) in &info {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}
