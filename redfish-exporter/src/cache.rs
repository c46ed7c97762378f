//! Cache de collecte : l'unique jeu de métriques courant.
//!
//! Seul le scheduler écrit (`publish` / `record_failure`) ; les scrapes lisent
//! via `get`, qui clone un `Arc` et ne touche jamais le réseau.

use crate::error::CollectionError;
use crate::models::MetricSet;
use crate::state::SwapCell;
use std::sync::Arc;
use std::time::{Duration, Instant};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// No cycle has succeeded yet.
    Uninitialized,
    Fresh,
    /// Last cycle failed, or the last success is older than the stale threshold.
    Stale,
}

impl Freshness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Fresh => "fresh",
            Self::Stale => "stale",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheSnapshot {
    pub metrics: Arc<MetricSet>,
    pub freshness: Freshness,
    /// Time since the last successful cycle.
    pub age: Option<Duration>,
    pub last_error: Option<String>,
    pub last_attempt: Option<OffsetDateTime>,
}

impl CacheSnapshot {
    pub fn is_initialized(&self) -> bool {
        self.freshness != Freshness::Uninitialized
    }

    pub fn collected_at_rfc3339(&self) -> Option<String> {
        self.metrics.collected_at().and_then(|t| t.format(&Rfc3339).ok())
    }
}

#[derive(Debug, Clone)]
struct CacheState {
    metrics: Arc<MetricSet>,
    last_success: Option<Instant>,
    last_error: Option<String>,
    last_attempt: Option<OffsetDateTime>,
}

pub struct CollectionCache {
    cell: SwapCell<CacheState>,
    stale_after: Option<Duration>,
}

impl Default for CollectionCache {
    fn default() -> Self {
        Self::new()
    }
}

impl CollectionCache {
    pub fn new() -> Self {
        Self {
            cell: SwapCell::new(CacheState {
                metrics: Arc::new(MetricSet::empty()),
                last_success: None,
                last_error: None,
                last_attempt: None,
            }),
            stale_after: None,
        }
    }

    /// Reports `Stale` once the last success is older than `threshold`, even
    /// without a recorded failure (stalled collector).
    pub fn with_stale_after(mut self, threshold: Duration) -> Self {
        self.stale_after = Some(threshold);
        self
    }

    pub fn get(&self) -> CacheSnapshot {
        let state = self.cell.load();
        let age = state.last_success.map(|t| t.elapsed());
        let freshness = match age {
            None => Freshness::Uninitialized,
            Some(_) if state.last_error.is_some() => Freshness::Stale,
            Some(age) if self.stale_after.is_some_and(|limit| age > limit) => Freshness::Stale,
            Some(_) => Freshness::Fresh,
        };
        CacheSnapshot {
            metrics: state.metrics.clone(),
            freshness,
            age,
            last_error: state.last_error.clone(),
            last_attempt: state.last_attempt,
        }
    }

    /// Replaces the current set wholesale and clears the last error.
    pub fn publish(&self, metrics: MetricSet) {
        self.cell.store(CacheState {
            metrics: Arc::new(metrics),
            last_success: Some(Instant::now()),
            last_error: None,
            last_attempt: Some(OffsetDateTime::now_utc()),
        });
    }

    /// Keeps the current set (last-known-good) and records why the cycle failed.
    pub fn record_failure(&self, error: &CollectionError) {
        let message = error.to_string();
        self.cell.update(|prev| CacheState {
            metrics: prev.metrics.clone(),
            last_success: prev.last_success,
            last_error: Some(message),
            last_attempt: Some(OffsetDateTime::now_utc()),
        });
    }
}
