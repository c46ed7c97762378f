use crate::cache::{CacheSnapshot, Freshness};
use crate::models::SensorCategory;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Body of `GET /status`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ExporterHealth {
    pub uptime_seconds: u64,
    pub bmc_status: String,
    pub freshness: String,
    pub age_seconds: Option<f64>,
    pub collected_at: Option<String>,
    pub last_error: Option<String>,
    pub samples: usize,
    pub counters: HealthCounters,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HealthCounters {
    pub cycles_total: u64,
    pub cycle_failures_total: u64,
    pub category_failures_total: BTreeMap<SensorCategory, u64>,
    pub skipped_records_total: u64,
    pub reauthentications_total: u64,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    cycles: Arc<AtomicU64>,
    cycle_failures: Arc<AtomicU64>,
    category_failures: Arc<[AtomicU64; 3]>,
    skipped_records: Arc<AtomicU64>,
    reauthentications: Arc<AtomicU64>,
    bmc_status: Arc<parking_lot::Mutex<String>>,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            cycles: Arc::new(AtomicU64::new(0)),
            cycle_failures: Arc::new(AtomicU64::new(0)),
            category_failures: Arc::new([AtomicU64::new(0), AtomicU64::new(0), AtomicU64::new(0)]),
            skipped_records: Arc::new(AtomicU64::new(0)),
            reauthentications: Arc::new(AtomicU64::new(0)),
            bmc_status: Arc::new(parking_lot::Mutex::new("unknown".to_string())),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn record_cycle(&self, ok: bool) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.cycle_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_category_failure(&self, category: SensorCategory) {
        self.category_failures[category_index(category)].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self, count: usize) {
        self.skipped_records.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_reauthentication(&self) {
        self.reauthentications.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mark_bmc_reachable(&self) {
        *self.bmc_status.lock() = "reachable".to_string();
    }

    pub fn mark_bmc_unreachable(&self) {
        *self.bmc_status.lock() = "unreachable".to_string();
    }

    pub fn mark_auth_failed(&self) {
        *self.bmc_status.lock() = "auth_failed".to_string();
    }

    pub fn bmc_status(&self) -> String {
        self.bmc_status.lock().clone()
    }

    pub fn counters(&self) -> HealthCounters {
        let category_failures_total = SensorCategory::ALL
            .iter()
            .map(|c| (*c, self.category_failures[category_index(*c)].load(Ordering::Relaxed)))
            .collect();
        HealthCounters {
            cycles_total: self.cycles.load(Ordering::Relaxed),
            cycle_failures_total: self.cycle_failures.load(Ordering::Relaxed),
            category_failures_total,
            skipped_records_total: self.skipped_records.load(Ordering::Relaxed),
            reauthentications_total: self.reauthentications.load(Ordering::Relaxed),
        }
    }

    pub fn get_health(&self, snapshot: &CacheSnapshot) -> ExporterHealth {
        ExporterHealth {
            uptime_seconds: self.uptime_seconds(),
            bmc_status: self.bmc_status(),
            freshness: snapshot.freshness.as_str().to_string(),
            age_seconds: snapshot.age.map(|a| a.as_secs_f64()),
            collected_at: snapshot.collected_at_rfc3339(),
            last_error: snapshot.last_error.clone(),
            samples: if snapshot.freshness == Freshness::Uninitialized { 0 } else { snapshot.metrics.len() },
            counters: self.counters(),
        }
    }
}

fn category_index(category: SensorCategory) -> usize {
    match category {
        SensorCategory::Power => 0,
        SensorCategory::Fan => 1,
        SensorCategory::Temperature => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CollectionCache;

    #[test]
    fn test_counters() {
        let health = HealthTracker::new();
        health.record_cycle(true);
        health.record_cycle(false);
        health.record_category_failure(SensorCategory::Fan);
        health.record_skipped(3);
        health.record_reauthentication();

        let c = health.counters();
        assert_eq!(c.cycles_total, 2);
        assert_eq!(c.cycle_failures_total, 1);
        assert_eq!(c.category_failures_total[&SensorCategory::Fan], 1);
        assert_eq!(c.category_failures_total[&SensorCategory::Power], 0);
        assert_eq!(c.skipped_records_total, 3);
        assert_eq!(c.reauthentications_total, 1);
    }

    #[test]
    fn test_health_before_first_cycle() {
        let health = HealthTracker::new();
        let cache = CollectionCache::new();
        let view = health.get_health(&cache.get());
        assert_eq!(view.bmc_status, "unknown");
        assert_eq!(view.freshness, "uninitialized");
        assert!(view.age_seconds.is_none());
        assert_eq!(view.samples, 0);

        health.mark_auth_failed();
        assert_eq!(health.bmc_status(), "auth_failed");
    }
}
