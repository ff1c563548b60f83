//! Rate limiting logic and state management.

mod bucket;
mod client;
mod decision;
mod limiter;
mod maintenance;
mod rules;
mod stats;
mod window;

pub use bucket::{burst_key, BucketState, BurstDenial, BurstUsage};
pub use client::{client_id, mask_client_id, RequestMeta, UNKNOWN};
pub use decision::{Decision, DenyReason, Verdict};
pub use limiter::{MaintenanceReport, RateLimiter};
pub use maintenance::spawn_maintenance;
pub use rules::{Rule, RuleSet, DEFAULT_RULE};
pub use stats::{ClientStats, GlobalStats, RequestRecord, DEFAULT_HISTORY_CAPACITY};
pub use window::{Horizon, WindowDenial, WindowUsage};
