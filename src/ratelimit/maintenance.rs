//! Background maintenance task.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::limiter::RateLimiter;

/// Periodically purge expired store keys and idle clients.
///
/// The task runs until the returned handle is aborted or the runtime shuts
/// down. Must be called from within a tokio runtime.
pub fn spawn_maintenance(limiter: Arc<RateLimiter>, every: Duration) -> JoinHandle<()> {
    info!(interval_secs = every.as_secs_f64(), "Starting rate limiter maintenance");

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let report = limiter.run_maintenance();
            if report.expired_keys > 0 || report.evicted_clients > 0 {
                debug!(
                    expired_keys = report.expired_keys,
                    evicted_clients = report.evicted_clients,
                    "Maintenance pass"
                );
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::LimiterConfig;
    use crate::ratelimit::{RequestMeta, RuleSet};
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_maintenance_evicts_idle_clients() {
        let clock = Arc::new(ManualClock::default());
        let config = LimiterConfig {
            client_idle_ttl_secs: Some(60),
            ..LimiterConfig::default()
        };
        let limiter = Arc::new(RateLimiter::with_parts(
            Arc::new(MemoryStore::with_clock(clock.clone())),
            clock.clone(),
            &config,
            RuleSet::builtin(),
        ));

        let meta = RequestMeta::new("GET", "/").with_remote_addr("10.9.9.9");
        limiter.check_rate_limit(&meta, "default");
        assert_eq!(limiter.all_stats().total_clients, 1);

        clock.advance(Duration::from_secs(120));
        let handle = spawn_maintenance(limiter.clone(), Duration::from_millis(10));

        // The first tick fires immediately; give the task a moment to run it
        for _ in 0..50 {
            if limiter.all_stats().total_clients == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.abort();

        let stats = limiter.all_stats();
        assert_eq!(stats.total_clients, 0);
        // Burst state expired; minute entry pruned; hour and day entries remain
        assert_eq!(stats.backend_keys, 2);
    }
}
