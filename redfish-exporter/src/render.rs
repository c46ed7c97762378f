//! Exposition texte Prometheus d'un snapshot du cache.
//!
//! Pur : construit un registry jetable à partir du snapshot et des compteurs
//! de santé, l'encode, puis ajoute un commentaire de fraîcheur.

use crate::cache::CacheSnapshot;
use crate::error::RenderError;
use crate::health::HealthTracker;
use crate::models::MetricKey;
use prometheus::{Encoder, Gauge, GaugeVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::collections::BTreeMap;
use std::fmt::Write as _;

const NAMESPACE: &str = "redfish_exporter";
pub const UNINITIALIZED_MARKER: &str = "# uninitialized: no successful collection yet";

pub fn render(snapshot: &CacheSnapshot, health: &HealthTracker) -> Result<String, RenderError> {
    let registry = Registry::new();
    register_sensor_families(&registry, snapshot)?;
    register_self_metrics(&registry, snapshot, health)?;

    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    let encoded = String::from_utf8(buffer)?;

    let mut body = String::with_capacity(encoded.len() + 256);
    if !snapshot.is_initialized() {
        body.push_str(UNINITIALIZED_MARKER);
        body.push('\n');
    }
    body.push_str(&encoded);
    body.push_str(&freshness_comment(snapshot));
    Ok(body)
}

fn register_sensor_families(registry: &Registry, snapshot: &CacheSnapshot) -> Result<(), RenderError> {
    let mut families: BTreeMap<&str, Vec<(&MetricKey, f64)>> = BTreeMap::new();
    for (key, value) in snapshot.metrics.iter() {
        families.entry(key.name.as_str()).or_default().push((key, value));
    }

    for (name, samples) in families {
        let label_names: Vec<&str> = samples[0].0.labels.iter().map(|(k, _)| k.as_str()).collect();
        let help = snapshot.metrics.help(name).unwrap_or(name);
        let family = GaugeVec::new(Opts::new(name, help), &label_names)?;
        for (key, value) in samples {
            let label_values: Vec<&str> = key.labels.iter().map(|(_, v)| v.as_str()).collect();
            family.get_metric_with_label_values(&label_values)?.set(value);
        }
        registry.register(Box::new(family))?;
    }
    Ok(())
}

fn gauge(registry: &Registry, name: &str, help: &str, value: f64) -> Result<(), RenderError> {
    let g = Gauge::with_opts(Opts::new(name, help).namespace(NAMESPACE))?;
    g.set(value);
    registry.register(Box::new(g))?;
    Ok(())
}

fn counter(registry: &Registry, name: &str, help: &str, value: u64) -> Result<(), RenderError> {
    let c = IntCounter::with_opts(Opts::new(name, help).namespace(NAMESPACE))?;
    c.inc_by(value);
    registry.register(Box::new(c))?;
    Ok(())
}

fn register_self_metrics(
    registry: &Registry,
    snapshot: &CacheSnapshot,
    health: &HealthTracker,
) -> Result<(), RenderError> {
    let initialized = snapshot.is_initialized();
    let counters = health.counters();

    gauge(
        registry,
        "initialized",
        "Whether at least one collection cycle has succeeded (1=yes, 0=no).",
        if initialized { 1.0 } else { 0.0 },
    )?;
    gauge(
        registry,
        "last_cycle_success",
        "Whether the most recent collection cycle succeeded (1=yes, 0=no).",
        if initialized && snapshot.last_error.is_none() { 1.0 } else { 0.0 },
    )?;
    if let Some(age) = snapshot.age {
        gauge(
            registry,
            "staleness_seconds",
            "Seconds since the last successful collection cycle.",
            age.as_secs_f64(),
        )?;
    }
    if let Some(collected_at) = snapshot.metrics.collected_at() {
        gauge(
            registry,
            "last_success_timestamp_seconds",
            "Unix time of the last successful collection cycle.",
            collected_at.unix_timestamp() as f64,
        )?;
    }
    gauge(
        registry,
        "uptime_seconds",
        "Seconds since the exporter started.",
        health.uptime_seconds() as f64,
    )?;

    counter(registry, "cycles_total", "Collection cycles run.", counters.cycles_total)?;
    counter(
        registry,
        "cycle_failures_total",
        "Collection cycles that produced no usable reading.",
        counters.cycle_failures_total,
    )?;
    counter(
        registry,
        "skipped_records_total",
        "Sensor records skipped as malformed or unreadable.",
        counters.skipped_records_total,
    )?;
    counter(
        registry,
        "reauthentications_total",
        "Redfish sessions re-created after an authorization failure.",
        counters.reauthentications_total,
    )?;

    let category_failures = IntCounterVec::new(
        Opts::new(
            "category_failures_total",
            "Sensor categories dropped from a cycle after transport or auth failure.",
        )
        .namespace(NAMESPACE),
        &["category"],
    )?;
    for (category, count) in &counters.category_failures_total {
        category_failures.with_label_values(&[category.as_str()]).inc_by(*count);
    }
    registry.register(Box::new(category_failures))?;

    Ok(())
}

fn freshness_comment(snapshot: &CacheSnapshot) -> String {
    let mut out = String::new();
    let _ = write!(out, "# freshness={}", snapshot.freshness.as_str());
    if let Some(at) = snapshot.collected_at_rfc3339() {
        let _ = write!(out, " collected_at={at}");
    }
    if let Some(age) = snapshot.age {
        let _ = write!(out, " age_seconds={:.3}", age.as_secs_f64());
    }
    out.push('\n');
    if let Some(err) = &snapshot.last_error {
        let _ = writeln!(out, "# last_error: {}", err.replace(['\n', '\r'], " "));
    }
    out
}
