//! Cycles de collecte et boucle à intervalle fixe qui les déclenche.
//!
//! Un cycle interroge les trois catégories en parallèle. Une catégorie en
//! échec (transport, auth, timeout) est écartée de ce cycle seulement ; le
//! cycle n'échoue que s'il ne reste aucune lecture exploitable.

use crate::cache::CollectionCache;
use crate::config::{ExporterConfig, SourceConf};
use crate::error::{CollectionError, RedfishError};
use crate::health::HealthTracker;
use crate::models::{MetricSet, SensorCategory, SensorReading};
use crate::normalize::{build_metric_set, Normalizer};
use crate::redfish::{IndexMemo, RedfishClient};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

#[derive(Debug, Default)]
pub struct CycleReport {
    pub published: usize,
    pub absent: usize,
    /// Malformed or unreadable records (fetch + normalize).
    pub skipped: usize,
    /// Readings left out of the set (offline sensors, duplicate components).
    pub dropped: usize,
    pub failed_categories: Vec<(SensorCategory, RedfishError)>,
}

struct CategoryOutcome {
    readings: Vec<SensorReading>,
    absent: usize,
    skipped: usize,
}

pub struct Collector {
    client: Arc<RedfishClient>,
    normalizer: Normalizer,
    sources: Vec<(SensorCategory, SourceConf)>,
    category_timeout: Duration,
    health: HealthTracker,
}

impl Collector {
    pub fn new(cfg: &ExporterConfig, client: Arc<RedfishClient>, health: HealthTracker) -> Self {
        Self {
            client,
            normalizer: Normalizer::new(cfg.naming.clone()),
            sources: SensorCategory::ALL.iter().map(|c| (*c, cfg.source(*c))).collect(),
            category_timeout: cfg.cycle_timeout(),
            health,
        }
    }

    pub fn client(&self) -> &RedfishClient {
        &self.client
    }

    async fn collect_category(
        &self,
        category: SensorCategory,
        source: &SourceConf,
        memo: &IndexMemo,
    ) -> Result<CategoryOutcome, RedfishError> {
        let fetch = tokio::time::timeout(
            self.category_timeout,
            self.client.fetch_sensors_with(category, source, memo),
        )
        .await
            .map_err(|_| RedfishError::Transport {
                category,
                reason: format!("no answer within {:?}", self.category_timeout),
            })??;

        let normalized = self.normalizer.normalize(&fetch.records, category);
        debug!(
            category = %category,
            records = fetch.records.len(),
            readings = normalized.readings.len(),
            absent = normalized.absent,
            "category collected"
        );
        Ok(CategoryOutcome {
            readings: normalized.readings,
            absent: normalized.absent,
            skipped: fetch.skipped.len() + normalized.rejected.len(),
        })
    }

    /// One full cycle: authenticate-if-needed, fetch, normalize, merge.
    pub async fn run_cycle(&self) -> Result<(MetricSet, CycleReport), CollectionError> {
        if let Err(e) = self.client.ensure_session().await {
            self.health.mark_auth_failed();
            return Err(CollectionError::Auth(e.to_string()));
        }

        let memo = IndexMemo::default();
        let memo = &memo;
        let results = futures::future::join_all(self.sources.iter().map(|(category, source)| async move {
            (*category, self.collect_category(*category, source, memo).await)
        }))
        .await;

        let mut report = CycleReport::default();
        let mut readings = Vec::new();
        for (category, result) in results {
            match result {
                Ok(outcome) => {
                    readings.extend(outcome.readings);
                    report.absent += outcome.absent;
                    report.skipped += outcome.skipped;
                }
                Err(e) => {
                    warn!(category = %category, "dropping category for this cycle: {}", e);
                    self.health.record_category_failure(category);
                    report.failed_categories.push((category, e));
                }
            }
        }
        self.health.record_skipped(report.skipped);

        if report.failed_categories.len() == self.sources.len() {
            let all_auth = report
                .failed_categories
                .iter()
                .all(|(_, e)| matches!(e, RedfishError::Auth(_)));
            if all_auth {
                self.health.mark_auth_failed();
                let reason = report.failed_categories[0].1.to_string();
                return Err(CollectionError::Auth(reason));
            }
            self.health.mark_bmc_unreachable();
            return Err(CollectionError::AllCategoriesFailed(
                report
                    .failed_categories
                    .iter()
                    .map(|(c, e)| format!("{c}: {e}"))
                    .collect(),
            ));
        }
        self.health.mark_bmc_reachable();

        let (set, dropped) = build_metric_set(&readings, OffsetDateTime::now_utc());
        report.dropped = dropped;
        report.published = set.len();
        if set.is_empty() {
            return Err(CollectionError::NoReadings { skipped: report.skipped });
        }
        Ok((set, report))
    }

    /// Runs one cycle and records its outcome in the cache. Returns true on success.
    pub async fn collect_into(&self, cache: &CollectionCache) -> bool {
        match self.run_cycle().await {
            Ok((set, report)) => {
                info!(
                    samples = report.published,
                    absent = report.absent,
                    skipped = report.skipped,
                    failed_categories = report.failed_categories.len(),
                    "collection cycle complete"
                );
                cache.publish(set);
                self.health.record_cycle(true);
                true
            }
            Err(e) => {
                error!("collection cycle failed, serving last known data: {}", e);
                cache.record_failure(&e);
                self.health.record_cycle(false);
                false
            }
        }
    }
}

/// Starts the collection loop. The first cycle runs immediately; later ones
/// follow the interval whatever the outcome. Stops when `shutdown` changes,
/// abandoning a cycle in flight.
pub fn spawn_scheduler(
    collector: Arc<Collector>,
    cache: Arc<CollectionCache>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    info!("starting collection loop (every {:?})", interval);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            tokio::select! {
                _ = collector.collect_into(&cache) => {}
                _ = shutdown.changed() => {
                    warn!("shutdown during a collection cycle, abandoning it");
                    break;
                }
            }
        }
        info!("collection loop stopped");
    })
}
