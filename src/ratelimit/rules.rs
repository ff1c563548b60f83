//! Rate limit rules and the named rule set.
//!
//! A rule bundles the three window limits, the burst bucket parameters and
//! the address allow/deny lists. Rules are shared as `Arc<Rule>` and never
//! mutated in place; changing a policy means replacing the rule by name.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::window::Horizon;
use crate::error::{Result, TurnstileError};

/// Name of the rule that always exists and backs unknown rule names.
pub const DEFAULT_RULE: &str = "default";

/// A named rate limiting policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Rule {
    /// Requests allowed in any 60 second window
    pub requests_per_minute: u64,
    /// Requests allowed in any hour
    pub requests_per_hour: u64,
    /// Requests allowed in any day
    pub requests_per_day: u64,
    /// Bucket capacity for rapid-fire requests
    pub burst_limit: u32,
    /// Seconds it takes to earn back one burst token
    pub burst_window_seconds: u64,
    /// Disabled rules admit everything without touching state
    pub enabled: bool,
    /// Addresses that skip the quantitative checks
    pub whitelist: BTreeSet<String>,
    /// Addresses that are always rejected
    pub blacklist: BTreeSet<String>,
}

impl Default for Rule {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            requests_per_hour: 1000,
            requests_per_day: 10000,
            burst_limit: 10,
            burst_window_seconds: 1,
            enabled: true,
            whitelist: BTreeSet::new(),
            blacklist: BTreeSet::new(),
        }
    }
}

impl Rule {
    /// Set the per-minute and per-hour limits.
    pub fn with_limits(mut self, per_minute: u64, per_hour: u64) -> Self {
        self.requests_per_minute = per_minute;
        self.requests_per_hour = per_hour;
        self
    }

    /// Set the per-day limit.
    pub fn with_daily_limit(mut self, per_day: u64) -> Self {
        self.requests_per_day = per_day;
        self
    }

    /// Set the burst bucket capacity and refill granularity.
    pub fn with_burst(mut self, limit: u32, window_seconds: u64) -> Self {
        self.burst_limit = limit;
        self.burst_window_seconds = window_seconds;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_whitelisted(mut self, address: impl Into<String>) -> Self {
        self.whitelist.insert(address.into());
        self
    }

    pub fn with_blacklisted(mut self, address: impl Into<String>) -> Self {
        self.blacklist.insert(address.into());
        self
    }

    /// The configured limit for a window horizon.
    pub fn limit_for(&self, horizon: Horizon) -> u64 {
        match horizon {
            Horizon::Minute => self.requests_per_minute,
            Horizon::Hour => self.requests_per_hour,
            Horizon::Day => self.requests_per_day,
        }
    }

    /// Time to earn back a single burst token.
    pub fn burst_window(&self) -> Duration {
        Duration::from_secs(self.burst_window_seconds)
    }

    pub fn is_blacklisted(&self, address: &str) -> bool {
        self.blacklist.contains(address)
    }

    pub fn is_whitelisted(&self, address: &str) -> bool {
        self.whitelist.contains(address)
    }

    /// Reject rules with zero limits or a zero refill window.
    pub fn validate(&self, name: &str) -> Result<()> {
        let invalid = |reason: &str| TurnstileError::InvalidRule {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        if name.is_empty() {
            return Err(invalid("rule name must not be empty"));
        }
        for horizon in Horizon::ALL {
            if self.limit_for(horizon) == 0 {
                return Err(invalid(&format!("requests per {} must be positive", horizon)));
            }
        }
        if self.burst_limit == 0 {
            return Err(invalid("burst_limit must be positive"));
        }
        if self.burst_window_seconds == 0 {
            return Err(invalid("burst_window_seconds must be positive"));
        }
        Ok(())
    }
}

/// Named rules, always containing [`DEFAULT_RULE`].
#[derive(Debug, Clone)]
pub struct RuleSet {
    rules: BTreeMap<String, Arc<Rule>>,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::builtin()
    }
}

impl RuleSet {
    /// The built-in rules: `default`, `api`, `admin` and `auth`.
    pub fn builtin() -> Self {
        let mut rules = BTreeMap::new();
        rules.insert(DEFAULT_RULE.to_string(), Arc::new(Rule::default()));
        rules.insert(
            "api".to_string(),
            Arc::new(Rule::default().with_limits(120, 2000)),
        );
        rules.insert(
            "admin".to_string(),
            Arc::new(Rule::default().with_limits(200, 5000)),
        );
        rules.insert(
            "auth".to_string(),
            Arc::new(Rule::default().with_limits(10, 100).with_burst(3, 1)),
        );
        Self { rules }
    }

    /// Built-in rules with `overrides` layered on top.
    pub fn with_overrides(overrides: BTreeMap<String, Rule>) -> Result<Self> {
        let mut set = Self::builtin();
        for (name, rule) in overrides {
            set.insert(name, rule)?;
        }
        Ok(set)
    }

    /// Load rule overrides from a YAML file of `name: rule` entries.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit rules");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse rule overrides from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let overrides: BTreeMap<String, Rule> = serde_yaml::from_str(yaml)
            .map_err(|e| TurnstileError::Config(format!("Failed to parse rules: {}", e)))?;
        Self::with_overrides(overrides)
    }

    /// Render the effective rules as YAML.
    pub fn to_yaml(&self) -> Result<String> {
        let plain: BTreeMap<&str, &Rule> = self
            .rules
            .iter()
            .map(|(name, rule)| (name.as_str(), rule.as_ref()))
            .collect();
        serde_yaml::to_string(&plain)
            .map_err(|e| TurnstileError::Config(format!("Failed to render rules: {}", e)))
    }

    pub fn get(&self, name: &str) -> Option<Arc<Rule>> {
        self.rules.get(name).cloned()
    }

    /// Look up a rule, falling back to the default rule for unknown names.
    ///
    /// Returns the name of the rule actually applied.
    pub fn resolve(&self, name: &str) -> (&str, Arc<Rule>) {
        match self.rules.get_key_value(name) {
            Some((name, rule)) => (name.as_str(), rule.clone()),
            None => (DEFAULT_RULE, self.default_rule()),
        }
    }

    fn default_rule(&self) -> Arc<Rule> {
        self.rules
            .get(DEFAULT_RULE)
            .cloned()
            .unwrap_or_else(|| Arc::new(Rule::default()))
    }

    /// Insert or replace a rule. Returns the rule it replaced.
    pub fn insert(&mut self, name: impl Into<String>, rule: Rule) -> Result<Option<Arc<Rule>>> {
        let name = name.into();
        rule.validate(&name)?;
        Ok(self.rules.insert(name, Arc::new(rule)))
    }

    /// Remove a rule. The default rule cannot be removed.
    pub fn remove(&mut self, name: &str) -> bool {
        if name == DEFAULT_RULE {
            return false;
        }
        self.rules.remove(name).is_some()
    }

    /// Rule names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.rules.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
