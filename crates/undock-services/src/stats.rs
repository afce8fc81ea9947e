//! Stats ledger — per-service traffic counters.
//!
//! One entry per service id, created on the first request or error routed to
//! that service and never removed. Counters only ever increase.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Counters for one logical service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStats {
    pub requests: u64,
    pub errors: u64,
    /// Response body bytes returned to callers.
    pub bandwidth: u64,
    pub last_update: Option<DateTime<Utc>>,
}

/// Process-wide stats ledger. Clones share state.
///
/// A single lock covers the whole map so `snapshot` is point-in-time across
/// every service, not just per entry.
#[derive(Clone, Default)]
pub struct StatsLedger {
    stats: Arc<RwLock<HashMap<String, ServiceStats>>>,
}

impl StatsLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one successful request and the bytes it returned.
    pub fn record_request(&self, service: &str, bytes: u64) {
        self.update(service, |s| {
            s.requests += 1;
            s.bandwidth = s.bandwidth.saturating_add(bytes);
        });
    }

    /// Count one failed forward.
    pub fn record_error(&self, service: &str) {
        self.update(service, |s| s.errors += 1);
    }

    /// Deep copy of every entry, sorted by service id.
    pub fn snapshot(&self) -> BTreeMap<String, ServiceStats> {
        let stats = self.stats.read().unwrap_or_else(|e| e.into_inner());
        stats.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    /// Stats for one service, if it has seen any traffic.
    pub fn get(&self, service: &str) -> Option<ServiceStats> {
        let stats = self.stats.read().unwrap_or_else(|e| e.into_inner());
        stats.get(service).cloned()
    }

    fn update(&self, service: &str, f: impl FnOnce(&mut ServiceStats)) {
        let mut stats = self.stats.write().unwrap_or_else(|e| e.into_inner());
        let entry = stats.entry(service.to_string()).or_default();
        f(entry);
        entry.last_update = Some(Utc::now());
    }
}
