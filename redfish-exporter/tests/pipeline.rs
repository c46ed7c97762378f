//! End-to-end collection against the mock BMC from `redfish-devkit`.

use redfish_devkit::{Fault, MiramarChassis, RedfishPayloadBuilder, TestHarness};
use redfish_exporter::cache::{CollectionCache, Freshness};
use redfish_exporter::config::{AuthMode, ExporterConfig};
use redfish_exporter::error::CollectionError;
use redfish_exporter::health::{ExporterHealth, HealthTracker};
use redfish_exporter::http::{build_router, AppState};
use redfish_exporter::models::{MetricKey, MetricSet, SensorCategory};
use redfish_exporter::redfish::RedfishClient;
use redfish_exporter::render::UNINITIALIZED_MARKER;
use redfish_exporter::scheduler::{spawn_scheduler, Collector};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

fn config_for(harness: &TestHarness, auth: AuthMode) -> ExporterConfig {
    let env = harness.env();
    let mut cfg = ExporterConfig::default();
    cfg.apply_env(|key| env.get(key).cloned()).unwrap();
    cfg.bmc.auth = auth;
    cfg.bmc.timeout_secs = 1;
    cfg.bmc.retry_backoff_ms = 10;
    cfg.cycle_timeout_secs = 5;
    cfg.validate().unwrap();
    cfg
}

fn collector_for(harness: &TestHarness, cfg: &ExporterConfig) -> (Collector, HealthTracker) {
    let env = harness.env();
    let creds = cfg.credentials(|key| env.get(key).cloned()).unwrap();
    let health = HealthTracker::new();
    let client = Arc::new(RedfishClient::new(cfg, creds).unwrap().with_health(health.clone()));
    (Collector::new(cfg, client, health.clone()), health)
}

fn reading(set: &MetricSet, metric: &str, component: &str) -> Option<f64> {
    set.get(&MetricKey::new(metric, &[("component", component)]))
}

#[tokio::test]
async fn test_full_cycle_publishes_every_category() {
    let harness = TestHarness::start().await.unwrap();
    let cfg = config_for(&harness, AuthMode::Basic);
    let (collector, health) = collector_for(&harness, &cfg);

    let (set, report) = collector.run_cycle().await.unwrap();

    assert_eq!(reading(&set, "psu_power_watts", "GPU_TRAY_PSU1"), Some(1210.0));
    assert_eq!(reading(&set, "psu_power_watts", "GPU_TRAY_PSU2"), Some(1190.5));
    assert_eq!(reading(&set, "psu_power_watts", "CPU_TRAY_PSU1"), Some(450.5));
    assert_eq!(reading(&set, "fan_speed_rpm", "FAN_1 Front"), Some(5200.0));
    assert_eq!(reading(&set, "fan_speed_rpm", "FAN_1 Rear"), Some(4980.0));
    assert_eq!(reading(&set, "temperature_celsius", "TEMP_CPU0"), Some(48.0));
    assert_eq!(reading(&set, "temperature_celsius", "TEMP_GPU_TRAY_PSU1"), Some(35.5));
    assert_eq!(reading(&set, "temperature_celsius", "TEMP_CPU_TRAY_PSU1"), Some(31.0));

    // absent fan leaves no entry at all
    assert_eq!(reading(&set, "fan_speed_rpm", "FAN_2 Front"), None);
    assert_eq!(set.len(), 8);
    assert_eq!(report.absent, 1);
    assert!(report.failed_categories.is_empty());

    // non-PSU sensors are filtered before any member request
    let sensors = harness.chassis.sensors_path();
    harness.assert_not_requested(&format!("{sensors}/voltage_VOLT_P12V")).unwrap();
    harness.assert_requested(&format!("{sensors}/power_PWR_MB_PSU1"), 1).unwrap();
    // fans and temperatures share one Thermal GET
    assert_eq!(harness.bmc.request_count(&harness.chassis.thermal_path()), 1);
    assert_eq!(health.bmc_status(), "reachable");
}

#[tokio::test]
async fn test_category_timing_out_twice_is_dropped_alone() {
    let harness = TestHarness::start().await.unwrap();
    let cfg = config_for(&harness, AuthMode::Basic);
    let (collector, health) = collector_for(&harness, &cfg);
    let sensors = harness.chassis.sensors_path();

    // longer than the 1s request timeout, for the first attempt and its retry
    harness.bmc.inject_fault(&sensors, Fault::Delay(Duration::from_secs(2)), 2);

    let (set, report) = collector.run_cycle().await.unwrap();
    assert_eq!(harness.bmc.request_count(&sensors), 2);
    assert_eq!(report.failed_categories.len(), 1);
    assert_eq!(report.failed_categories[0].0, SensorCategory::Power);
    assert!(set.iter().all(|(key, _)| key.name != "psu_power_watts"));
    assert_eq!(reading(&set, "fan_speed_rpm", "FAN_1 Front"), Some(5200.0));
    assert_eq!(reading(&set, "temperature_celsius", "TEMP_CPU0"), Some(48.0));
    assert_eq!(health.counters().category_failures_total[&SensorCategory::Power], 1);

    // the fault is spent, so the next cycle is complete again
    let (set, report) = collector.run_cycle().await.unwrap();
    assert!(report.failed_categories.is_empty());
    assert_eq!(reading(&set, "psu_power_watts", "CPU_TRAY_PSU1"), Some(450.5));
}

#[tokio::test]
async fn test_transient_server_error_is_retried() {
    let harness = TestHarness::start().await.unwrap();
    let cfg = config_for(&harness, AuthMode::Basic);
    let (collector, _health) = collector_for(&harness, &cfg);
    let thermal = harness.chassis.thermal_path();

    harness.bmc.inject_fault(&thermal, Fault::Status(503), 1);

    let (set, report) = collector.run_cycle().await.unwrap();
    assert!(report.failed_categories.is_empty());
    assert_eq!(set.len(), 8);
}

#[tokio::test]
async fn test_failed_cycle_keeps_last_known_good() {
    let harness = TestHarness::start().await.unwrap();
    let cfg = config_for(&harness, AuthMode::Basic);
    let (collector, health) = collector_for(&harness, &cfg);
    let cache = CollectionCache::new();

    assert!(collector.collect_into(&cache).await);
    let first = cache.get();
    assert_eq!(first.freshness, Freshness::Fresh);

    harness.bmc.inject_fault(harness.chassis.sensors_path(), Fault::Status(500), 10);
    harness.bmc.inject_fault(harness.chassis.thermal_path(), Fault::Status(500), 10);
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(!collector.collect_into(&cache).await);
    let snap = cache.get();
    assert_eq!(snap.freshness, Freshness::Stale);
    assert_eq!(*snap.metrics, *first.metrics);
    assert!(snap.age.unwrap() > Duration::ZERO);
    assert!(snap.last_error.unwrap().contains("all sensor categories failed"));

    let counters = health.counters();
    assert_eq!(counters.cycles_total, 2);
    assert_eq!(counters.cycle_failures_total, 1);
    assert_eq!(health.bmc_status(), "unreachable");

    harness.bmc.clear_faults();
    assert!(collector.collect_into(&cache).await);
    let snap = cache.get();
    assert_eq!(snap.freshness, Freshness::Fresh);
    assert!(snap.last_error.is_none());
}

#[tokio::test]
async fn test_identity_survives_member_reordering() {
    let harness = TestHarness::start().await.unwrap();
    let cfg = config_for(&harness, AuthMode::Basic);
    let (collector, _health) = collector_for(&harness, &cfg);

    let (before, _) = collector.run_cycle().await.unwrap();

    let mut shuffled: MiramarChassis = harness.chassis.clone();
    shuffled.power.reverse();
    shuffled.fans.reverse();
    shuffled.temperatures.rotate_left(1);
    harness.reinstall(&shuffled);
    harness.bmc.clear_requests();

    let (after, _) = collector.run_cycle().await.unwrap();
    assert_eq!(harness.bmc.request_count(&harness.chassis.thermal_path()), 1);
    let keys = |set: &MetricSet| set.iter().map(|(k, v)| (k.clone(), v)).collect::<Vec<_>>();
    assert_eq!(keys(&before), keys(&after));
}

#[tokio::test]
async fn test_broken_member_is_skipped() {
    let harness = TestHarness::start().await.unwrap();
    let cfg = config_for(&harness, AuthMode::Basic);
    let (collector, health) = collector_for(&harness, &cfg);
    let broken = format!("{}/power_PWR_PDB_PSU2", harness.chassis.sensors_path());

    harness.bmc.inject_fault(&broken, Fault::Garbage, usize::MAX);

    let (set, report) = collector.run_cycle().await.unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(reading(&set, "psu_power_watts", "GPU_TRAY_PSU2"), None);
    assert_eq!(reading(&set, "psu_power_watts", "GPU_TRAY_PSU1"), Some(1210.0));
    assert_eq!(health.counters().skipped_records_total, 1);
}

#[tokio::test]
async fn test_session_is_reused_and_recreated_after_expiry() {
    let harness = TestHarness::start_session_only().await.unwrap();
    let cfg = config_for(&harness, AuthMode::Session);
    let (collector, health) = collector_for(&harness, &cfg);

    collector.run_cycle().await.unwrap();
    collector.run_cycle().await.unwrap();
    assert_eq!(harness.bmc.login_count(), 1);

    harness.bmc.expire_sessions();
    let (set, report) = collector.run_cycle().await.unwrap();
    assert!(report.failed_categories.is_empty());
    assert_eq!(set.len(), 8);
    assert_eq!(harness.bmc.login_count(), 2);
    assert!(health.counters().reauthentications_total >= 1);

    collector.client().logout().await;
    assert_eq!(harness.bmc.logout_count(), 1);
    assert_eq!(harness.bmc.active_sessions(), 0);
}

#[tokio::test]
async fn test_rejected_credentials_fail_the_cycle() {
    let harness = TestHarness::start_session_only().await.unwrap();
    let cfg = config_for(&harness, AuthMode::Session);
    let creds = cfg.credentials(|_| Some("not-the-password".into())).unwrap();
    let health = HealthTracker::new();
    let client = Arc::new(RedfishClient::new(&cfg, creds).unwrap());
    let collector = Collector::new(&cfg, client, health.clone());

    match collector.run_cycle().await {
        Err(CollectionError::Auth(reason)) => assert!(reason.contains("401")),
        other => panic!("expected an auth failure, got {other:?}"),
    }
    assert_eq!(health.bmc_status(), "auth_failed");
    harness.assert_not_requested(&harness.chassis.thermal_path()).unwrap();
}

#[tokio::test]
async fn test_scrape_before_and_after_first_cycle() {
    let harness = TestHarness::start().await.unwrap();
    let cfg = config_for(&harness, AuthMode::Basic);
    let (collector, health) = collector_for(&harness, &cfg);
    let cache = Arc::new(CollectionCache::new());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = build_router(AppState { cache: cache.clone(), health });
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    let base = format!("http://{addr}");

    let body = reqwest::get(format!("{base}/metrics")).await.unwrap().text().await.unwrap();
    assert!(body.starts_with(UNINITIALIZED_MARKER));
    assert!(!body.contains("psu_power_watts"));

    let (tx, rx) = watch::channel(false);
    let scheduler = spawn_scheduler(Arc::new(collector), cache.clone(), Duration::from_millis(200), rx);
    for _ in 0..100 {
        if cache.get().is_initialized() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(30)).await;
    }

    let body = reqwest::get(format!("{base}/metrics")).await.unwrap().text().await.unwrap();
    assert!(body.contains("psu_power_watts{component=\"CPU_TRAY_PSU1\"} 450.5"));
    assert!(body.contains("fan_speed_rpm{component=\"FAN_1 Front\"} 5200"));
    assert!(body.contains("redfish_exporter_initialized 1"));

    let status: ExporterHealth = reqwest::get(format!("{base}/status")).await.unwrap().json().await.unwrap();
    assert_eq!(status.freshness, "fresh");
    assert_eq!(status.samples, 8);

    tx.send(true).unwrap();
    scheduler.await.unwrap();
}

#[tokio::test]
async fn test_slow_category_is_cut_by_cycle_timeout() {
    let harness = TestHarness::start().await.unwrap();
    let mut cfg = config_for(&harness, AuthMode::Basic);
    cfg.bmc.timeout_secs = 5;
    cfg.cycle_timeout_secs = 1;
    let (collector, health) = collector_for(&harness, &cfg);

    harness.bmc.inject_fault(harness.chassis.thermal_path(), Fault::Delay(Duration::from_secs(3)), usize::MAX);

    let started = Instant::now();
    let (set, report) = collector.run_cycle().await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(3));

    let mut failed: Vec<SensorCategory> = report.failed_categories.iter().map(|(c, _)| *c).collect();
    failed.sort();
    assert_eq!(failed, vec![SensorCategory::Fan, SensorCategory::Temperature]);
    assert!(report.failed_categories.iter().all(|(_, e)| e.to_string().contains("no answer within")));
    assert_eq!(set.len(), 3);
    assert_eq!(reading(&set, "psu_power_watts", "CPU_TRAY_PSU1"), Some(450.5));
    assert_eq!(health.counters().category_failures_total[&SensorCategory::Fan], 1);
}

#[tokio::test]
async fn test_link_only_array_entries_are_fetched() {
    let harness = TestHarness::start().await.unwrap();
    let cfg = config_for(&harness, AuthMode::Basic);
    let (collector, _health) = collector_for(&harness, &cfg);
    let thermal = harness.chassis.thermal_path();
    let fan_path = format!("{thermal}/Fans/F1");

    harness.bmc.set_resource(
        thermal.clone(),
        RedfishPayloadBuilder::thermal(
            &thermal,
            vec![json!({"@odata.id": fan_path})],
            vec![RedfishPayloadBuilder::temperature(&thermal, 0, "TEMP_CPU0", Some(48.0), "Enabled")],
        ),
    );
    harness.bmc.set_resource(
        fan_path.clone(),
        json!({"@odata.id": fan_path, "MemberId": "SPD_FAN9_R", "Reading": 4000, "ReadingUnits": "RPM"}),
    );

    let (set, report) = collector.run_cycle().await.unwrap();
    assert!(report.failed_categories.is_empty());
    assert_eq!(harness.bmc.request_count(&fan_path), 1);
    assert_eq!(reading(&set, "fan_speed_rpm", "FAN9 Rear"), Some(4000.0));
    assert_eq!(reading(&set, "temperature_celsius", "TEMP_CPU0"), Some(48.0));
}

#[tokio::test]
async fn test_missing_member_is_skipped() {
    let harness = TestHarness::start().await.unwrap();
    let cfg = config_for(&harness, AuthMode::Basic);
    let (collector, _health) = collector_for(&harness, &cfg);

    harness
        .bmc
        .remove_resource(&format!("{}/power_PWR_PDB_PSU1", harness.chassis.sensors_path()));

    let (set, report) = collector.run_cycle().await.unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(reading(&set, "psu_power_watts", "GPU_TRAY_PSU1"), None);
    assert_eq!(reading(&set, "psu_power_watts", "GPU_TRAY_PSU2"), Some(1190.5));
}

#[tokio::test]
async fn test_basic_auth_rejection_is_not_retried() {
    let harness = TestHarness::start().await.unwrap();
    let cfg = config_for(&harness, AuthMode::Basic);
    let creds = cfg.credentials(|_| Some("not-the-password".into())).unwrap();
    let health = HealthTracker::new();
    let client = Arc::new(RedfishClient::new(&cfg, creds).unwrap().with_health(health.clone()));
    let collector = Collector::new(&cfg, client, health.clone());

    match collector.run_cycle().await {
        Err(CollectionError::Auth(reason)) => assert!(reason.contains("401")),
        other => panic!("expected an auth failure, got {other:?}"),
    }
    // one rejected GET per source, no login, no retry
    assert_eq!(harness.bmc.request_count(&harness.chassis.sensors_path()), 1);
    assert_eq!(harness.bmc.request_count(&harness.chassis.thermal_path()), 1);
    assert_eq!(harness.bmc.login_count(), 0);
    assert_eq!(health.counters().reauthentications_total, 0);
    assert_eq!(health.bmc_status(), "auth_failed");
}

#[tokio::test]
async fn test_rejected_relogin_after_expiry_fails_the_cycle() {
    let harness = TestHarness::start_session_only().await.unwrap();
    let cfg = config_for(&harness, AuthMode::Session);
    let (collector, health) = collector_for(&harness, &cfg);

    collector.run_cycle().await.unwrap();
    assert_eq!(harness.bmc.login_count(), 1);

    harness.bmc.set_password("rotated");
    harness.bmc.expire_sessions();

    match collector.run_cycle().await {
        Err(CollectionError::Auth(reason)) => assert!(reason.contains("credentials rejected")),
        other => panic!("expected an auth failure, got {other:?}"),
    }
    assert_eq!(harness.bmc.login_count(), 1);
    assert!(health.counters().reauthentications_total >= 1);
    assert_eq!(health.bmc_status(), "auth_failed");
}

#[tokio::test]
async fn test_shutdown_abandons_cycle_in_flight() {
    let harness = TestHarness::start().await.unwrap();
    let mut cfg = config_for(&harness, AuthMode::Basic);
    cfg.bmc.timeout_secs = 10;
    cfg.cycle_timeout_secs = 10;
    let (collector, _health) = collector_for(&harness, &cfg);
    let cache = Arc::new(CollectionCache::new());
    let thermal = harness.chassis.thermal_path();

    harness.bmc.inject_fault(harness.chassis.sensors_path(), Fault::Delay(Duration::from_secs(5)), usize::MAX);
    harness.bmc.inject_fault(&thermal, Fault::Delay(Duration::from_secs(5)), usize::MAX);

    let (tx, rx) = watch::channel(false);
    let scheduler = spawn_scheduler(Arc::new(collector), cache.clone(), Duration::from_secs(60), rx);
    assert!(harness.wait_for_requests(&thermal, 1, 2000).await);

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(1), scheduler)
        .await
        .expect("loop stops without waiting for the cycle")
        .unwrap();
    assert_eq!(cache.get().freshness, Freshness::Uninitialized);
}
