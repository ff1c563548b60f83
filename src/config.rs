//! Configuration management for Turnstile.
//!
//! Configuration is read from a YAML file and then overlaid with
//! environment variables prefixed `TURNSTILE__`, using `__` between nested
//! keys (for example `TURNSTILE__LIMITER__SHARDS=32`).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, TurnstileError};
use crate::ratelimit::{Rule, RuleSet, DEFAULT_HISTORY_CAPACITY};

/// Environment variable prefix for overrides.
const ENV_PREFIX: &str = "TURNSTILE";

/// Main configuration for Turnstile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Limiter tuning
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Rules layered over the built-in set, keyed by name
    #[serde(default)]
    pub rules: BTreeMap<String, Rule>,
}

/// Limiter tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Number of per-client lock partitions
    #[serde(default = "default_shards")]
    pub shards: usize,

    /// Recent requests remembered per client
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Forget clients idle for this long; unset keeps them forever
    #[serde(default)]
    pub client_idle_ttl_secs: Option<u64>,

    /// Period of the background maintenance sweep
    #[serde(default = "default_maintenance_interval")]
    pub maintenance_interval_secs: u64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            shards: default_shards(),
            history_capacity: default_history_capacity(),
            client_idle_ttl_secs: None,
            maintenance_interval_secs: default_maintenance_interval(),
        }
    }
}

fn default_shards() -> usize {
    16
}

fn default_history_capacity() -> usize {
    DEFAULT_HISTORY_CAPACITY
}

fn default_maintenance_interval() -> u64 {
    60
}

impl LimiterConfig {
    pub fn client_idle_ttl(&self) -> Option<Duration> {
        self.client_idle_ttl_secs.map(Duration::from_secs)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs.max(1))
    }
}

impl TurnstileConfig {
    /// Load configuration from a YAML file, then apply environment overrides.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(TurnstileError::Config(format!(
                "configuration file not found: {}",
                path.display()
            )));
        }
        info!(path = %path.display(), "Loading configuration");

        let settings = ::config::Config::builder()
            .add_source(::config::File::from(path).format(::config::FileFormat::Yaml))
            .add_source(Self::env_source())
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    /// Defaults with environment overrides only.
    pub fn from_env() -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(Self::env_source())
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    /// Parse configuration from a YAML string, without environment overrides.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| TurnstileError::Config(format!("Failed to parse configuration: {}", e)))
    }

    fn env_source() -> ::config::Environment {
        ::config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
    }

    /// Built-in rules with the configured rules layered on top.
    pub fn rule_set(&self) -> Result<RuleSet> {
        RuleSet::with_overrides(self.rules.clone())
    }
}
