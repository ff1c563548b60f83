//! Core rate limiter implementation.

use parking_lot::{Mutex, RwLock};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tracing::{debug, info, trace};

use super::bucket::{burst_key, check_burst};
use super::client::{self, mask_client_id, RequestMeta};
use super::decision::{Decision, Verdict};
use super::rules::{Rule, RuleSet, DEFAULT_RULE};
use super::stats::{ClientStats, GlobalStats, StatsRegistry};
use super::window::{check_windows, prune_windows, Horizon};
use crate::clock::{Clock, SystemClock};
use crate::config::{LimiterConfig, TurnstileConfig};
use crate::error::Result;
use crate::store::{KeyValueStore, MemoryStore};

/// What one maintenance pass cleaned up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// Store keys dropped because their TTL elapsed
    pub expired_keys: usize,
    /// Client statistics forgotten for being idle
    pub evicted_clients: usize,
}

/// Per-client admission control.
///
/// Requests are checked against a named rule in fixed precedence: blacklist,
/// whitelist, burst bucket, then the minute/hour/day sliding windows. The
/// limiter is thread-safe and meant to be shared behind an `Arc`.
pub struct RateLimiter {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    rules: RwLock<RuleSet>,
    stats: StatsRegistry,
    /// Serializes the read-modify-write sequence of each client
    client_locks: Box<[Mutex<()>]>,
    client_idle_ttl: Option<f64>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("rules", &self.rules.read().names())
            .field("clients", &self.stats.len())
            .field("shards", &self.client_locks.len())
            .finish()
    }
}

impl RateLimiter {
    /// Create a rate limiter with the built-in rules and default settings.
    pub fn new() -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self::with_parts(
            Arc::new(MemoryStore::with_clock(clock.clone())),
            clock,
            &LimiterConfig::default(),
            RuleSet::builtin(),
        )
    }

    /// Create a rate limiter from loaded configuration.
    pub fn from_config(config: &TurnstileConfig) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Ok(Self::with_parts(
            Arc::new(MemoryStore::with_clock(clock.clone())),
            clock,
            &config.limiter,
            config.rule_set()?,
        ))
    }

    /// Assemble a rate limiter from explicit collaborators.
    pub fn with_parts(
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        config: &LimiterConfig,
        rules: RuleSet,
    ) -> Self {
        let shards = config.shards.max(1);
        Self {
            store,
            clock,
            rules: RwLock::new(rules),
            stats: StatsRegistry::new(config.history_capacity),
            client_locks: (0..shards).map(|_| Mutex::new(())).collect(),
            client_idle_ttl: config.client_idle_ttl().map(|ttl| ttl.as_secs_f64()),
        }
    }

    /// Derive the hashed client identifier for a request.
    pub fn resolve_client_id(&self, meta: &RequestMeta) -> String {
        client::client_id(meta)
    }

    /// Decide whether a request may proceed under the named rule.
    ///
    /// Unknown rule names fall back to the default rule. This never fails:
    /// refusals are reported through the returned [`Decision`].
    pub fn check_rate_limit(&self, meta: &RequestMeta, requested: &str) -> Decision {
        let (rule_name, rule) = {
            let rules = self.rules.read();
            let (name, rule) = rules.resolve(requested);
            (name.to_string(), rule)
        };
        let requested_rule = (rule_name != requested).then(|| requested.to_string());

        if !rule.enabled {
            trace!(rule = %rule_name, "Rule disabled, admitting request");
            return Decision {
                rule: rule_name,
                requested_rule,
                client_id: None,
                verdict: Verdict::Disabled,
            };
        }

        let client_id = self.resolve_client_id(meta);
        let address = meta.remote_address();

        let verdict = {
            let _guard = self.client_lock(&client_id).lock();
            let now = self.clock.now();

            trace!(
                client_id = %client_id,
                rule = %rule_name,
                path = %meta.path,
                "Checking rate limit"
            );

            self.stats.observe(&client_id, meta, now);
            let verdict = self.evaluate(&client_id, address, &rule, now);
            self.stats.record_outcome(&client_id, Self::admits(&verdict));
            verdict
        };

        let decision = Decision {
            rule: rule_name,
            requested_rule,
            client_id: Some(mask_client_id(&client_id)),
            verdict,
        };

        if let Some(reason) = decision.reason() {
            debug!(
                client_id = %client_id,
                rule = %decision.rule,
                reason = %reason,
                "Request refused"
            );
        }
        decision
    }

    fn evaluate(&self, client_id: &str, address: &str, rule: &Rule, now: f64) -> Verdict {
        if rule.is_blacklisted(address) {
            return Verdict::Blacklisted;
        }
        if rule.is_whitelisted(address) {
            return Verdict::Whitelisted;
        }

        let burst = match check_burst(self.store.as_ref(), client_id, rule, now) {
            Ok(usage) => usage,
            Err(denial) => return Verdict::BurstLimited(denial),
        };

        match check_windows(self.store.as_ref(), client_id, rule, now) {
            Ok(window) => Verdict::Allowed { burst, window },
            Err(denial) => Verdict::RateLimited(denial),
        }
    }

    fn admits(verdict: &Verdict) -> bool {
        matches!(
            verdict,
            Verdict::Disabled | Verdict::Whitelisted | Verdict::Allowed { .. }
        )
    }

    fn client_lock(&self, client_id: &str) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        client_id.hash(&mut hasher);
        let index = (hasher.finish() % self.client_locks.len() as u64) as usize;
        &self.client_locks[index]
    }

    /// Add or replace a rule.
    pub fn add_rule(&self, name: &str, rule: Rule) -> Result<()> {
        let replaced = self.rules.write().insert(name, rule)?;
        info!(rule = %name, replaced = replaced.is_some(), "Rate limit rule added/updated");
        Ok(())
    }

    /// Remove a rule. Returns `false` for the default rule or unknown names.
    pub fn remove_rule(&self, name: &str) -> bool {
        let removed = self.rules.write().remove(name);
        if removed {
            info!(rule = %name, "Rate limit rule removed");
        } else if name == DEFAULT_RULE {
            debug!("Refusing to remove the default rule");
        }
        removed
    }

    /// Look up a rule by exact name, without the default fallback.
    pub fn rule(&self, name: &str) -> Option<Arc<Rule>> {
        self.rules.read().get(name)
    }

    /// Names of all registered rules, sorted.
    pub fn rule_names(&self) -> Vec<String> {
        self.rules.read().names()
    }

    /// Snapshot of the effective rules.
    pub fn rules(&self) -> RuleSet {
        self.rules.read().clone()
    }

    /// Snapshot of one client's statistics.
    pub fn client_stats(&self, client_id: &str) -> Option<ClientStats> {
        self.stats.snapshot(client_id)
    }

    /// Aggregate statistics over all clients.
    pub fn all_stats(&self) -> GlobalStats {
        let (total_clients, total_requests, total_blocked) = self.stats.totals();
        GlobalStats {
            total_clients,
            total_requests,
            total_blocked,
            block_rate: total_blocked as f64 / total_requests.max(1) as f64,
            active_rules: self.rule_names(),
            backend_keys: self.store.len(),
        }
    }

    /// Forget clients idle longer than the configured TTL and drop their
    /// aged-out window entries. A no-op when no TTL is configured.
    pub fn sweep_idle_clients(&self) -> usize {
        let Some(ttl) = self.client_idle_ttl else {
            return 0;
        };

        let now = self.clock.now();
        let evicted = self.stats.evict_idle(now - ttl);
        for client_id in &evicted {
            let _guard = self.client_lock(client_id).lock();
            let pruned = prune_windows(self.store.as_ref(), client_id, now);
            trace!(client_id = %client_id, pruned, "Evicted idle client");
        }
        evicted.len()
    }

    /// Drop expired store keys and idle clients.
    pub fn run_maintenance(&self) -> MaintenanceReport {
        MaintenanceReport {
            expired_keys: self.store.purge_expired(),
            evicted_clients: self.sweep_idle_clients(),
        }
    }

    /// Current window count for a client, after purging aged-out entries.
    pub fn window_count(&self, client_id: &str, horizon: Horizon) -> usize {
        let _guard = self.client_lock(client_id).lock();
        let now = self.clock.now();
        let key = horizon.key(client_id);
        self.store
            .remove_scored_range(&key, 0.0, now - horizon.as_secs_f64());
        self.store.cardinality(&key)
    }

    /// Whether a client currently has burst bucket state.
    pub fn has_burst_state(&self, client_id: &str) -> bool {
        self.store.exists(&burst_key(client_id))
    }

    /// The backing key-value store.
    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
