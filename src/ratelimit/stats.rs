//! Per-client usage statistics.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use super::client::RequestMeta;

/// Default number of recent requests remembered per client.
pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

/// One entry of a client's recent request history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub timestamp: f64,
    pub path: String,
    pub method: String,
}

/// Counters and recent history for a single client.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub blocked_requests: u64,
    pub last_request_time: f64,
    pub first_seen: f64,
    /// Most recent requests, oldest first
    pub request_history: VecDeque<RequestRecord>,
}

impl ClientStats {
    fn new(now: f64) -> Self {
        Self {
            total_requests: 0,
            successful_requests: 0,
            blocked_requests: 0,
            last_request_time: now,
            first_seen: now,
            request_history: VecDeque::new(),
        }
    }

    fn record(&mut self, record: RequestRecord, capacity: usize) {
        self.total_requests += 1;
        self.last_request_time = record.timestamp;

        if capacity == 0 {
            return;
        }
        while self.request_history.len() >= capacity {
            self.request_history.pop_front();
        }
        self.request_history.push_back(record);
    }
}

/// Aggregate view over every tracked client.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GlobalStats {
    pub total_clients: usize,
    pub total_requests: u64,
    pub total_blocked: u64,
    /// `total_blocked / total_requests`, 0 when nothing was seen
    pub block_rate: f64,
    pub active_rules: Vec<String>,
    pub backend_keys: usize,
}

/// Concurrent map of client statistics.
#[derive(Debug)]
pub(crate) struct StatsRegistry {
    clients: DashMap<String, ClientStats>,
    history_capacity: usize,
}

impl StatsRegistry {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            clients: DashMap::new(),
            history_capacity,
        }
    }

    /// Count a request against the client, creating its stats on first sight.
    pub fn observe(&self, client_id: &str, meta: &RequestMeta, now: f64) {
        let record = RequestRecord {
            timestamp: now,
            path: meta.path.clone(),
            method: meta.method.clone(),
        };
        self.clients
            .entry(client_id.to_string())
            .or_insert_with(|| ClientStats::new(now))
            .record(record, self.history_capacity);
    }

    pub fn record_outcome(&self, client_id: &str, allowed: bool) {
        if let Some(mut stats) = self.clients.get_mut(client_id) {
            if allowed {
                stats.successful_requests += 1;
            } else {
                stats.blocked_requests += 1;
            }
        }
    }

    pub fn snapshot(&self, client_id: &str) -> Option<ClientStats> {
        self.clients.get(client_id).map(|stats| stats.clone())
    }

    /// `(clients, requests, blocked)` across all clients.
    pub fn totals(&self) -> (usize, u64, u64) {
        let mut clients = 0;
        let mut requests = 0;
        let mut blocked = 0;
        for entry in self.clients.iter() {
            clients += 1;
            requests += entry.total_requests;
            blocked += entry.blocked_requests;
        }
        (clients, requests, blocked)
    }

    /// Forget clients whose last request is at or before `cutoff`.
    ///
    /// Returns the evicted client IDs.
    pub fn evict_idle(&self, cutoff: f64) -> Vec<String> {
        let idle: Vec<String> = self
            .clients
            .iter()
            .filter(|entry| entry.last_request_time <= cutoff)
            .map(|entry| entry.key().clone())
            .collect();

        idle.into_iter()
            .filter(|id| {
                self.clients
                    .remove_if(id, |_, stats| stats.last_request_time <= cutoff)
                    .is_some()
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }
}
