/**
 * NORMALISEUR DE MÉTRIQUES - Documents capteurs Redfish -> lectures canoniques
 *
 * RÔLE :
 * Un seul chemin de code pour les trois catégories de capteurs. Chaque
 * catégorie est une table de correspondance (champs de valeur, unités
 * acceptées, famille de métrique) ; les règles d'absence et d'identité
 * s'appliquent ici à toutes.
 *
 * RÈGLES :
 * - Capteurs absents / non installés et lectures nulles ignorés, jamais mis à zéro
 * - component_id tiré de MemberId / Id / Name / URI, jamais de la position
 * - Règles de renommage de la config appliquées après extraction de l'identité
 * - Un enregistrement malformé est rejeté seul, le reste de la catégorie continue
 */

use crate::config::NamingConf;
use crate::error::RedfishError;
use crate::models::{MetricKey, MetricSet, RawRecord, SensorCategory, SensorReading, Unit};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{debug, warn};

pub const COMPONENT_LABEL: &str = "component";

#[derive(Debug)]
pub struct FieldMap {
    pub category: SensorCategory,
    /// Metric family prefix; the unit suffix is appended per reading.
    pub family: &'static str,
    pub help: &'static str,
    pub unit: Unit,
    /// Tried in order; the first non-null one wins.
    pub value_fields: &'static [&'static str],
    /// Accepted `ReadingUnits` spellings with their scale factor.
    pub units: &'static [(&'static str, f64)],
    pub integral: bool,
}

pub static POWER_FIELDS: FieldMap = FieldMap {
    category: SensorCategory::Power,
    family: "psu_power",
    help: "Power consumption in watts by PSU",
    unit: Unit::Watts,
    value_fields: &["Reading", "PowerInputWatts", "PowerConsumedWatts", "LastPowerOutputWatts"],
    units: &[("W", 1.0), ("Watts", 1.0), ("kW", 1000.0)],
    integral: false,
};

pub static FAN_FIELDS: FieldMap = FieldMap {
    category: SensorCategory::Fan,
    family: "fan_speed",
    help: "Speed of fans in RPM",
    unit: Unit::Rpm,
    value_fields: &["Reading", "ReadingRPM"],
    units: &[("RPM", 1.0)],
    integral: true,
};

pub static TEMPERATURE_FIELDS: FieldMap = FieldMap {
    category: SensorCategory::Temperature,
    family: "temperature",
    help: "Temperature in Celsius",
    unit: Unit::Celsius,
    value_fields: &["ReadingCelsius", "Reading"],
    units: &[("Cel", 1.0), ("C", 1.0), ("Celsius", 1.0)],
    integral: false,
};

pub fn field_map(category: SensorCategory) -> &'static FieldMap {
    match category {
        SensorCategory::Power => &POWER_FIELDS,
        SensorCategory::Fan => &FAN_FIELDS,
        SensorCategory::Temperature => &TEMPERATURE_FIELDS,
    }
}

impl SensorReading {
    /// `<family>_<unit>`, e.g. `psu_power_watts`.
    pub fn metric_name(&self) -> String {
        format!("{}_{}", field_map(self.kind).family, self.unit.suffix())
    }
}

const ID_FIELDS: &[&str] = &["MemberId", "Id", "Name"];

// Compared after lowercasing and dropping spaces, '_' and '-'.
const ABSENT_STATES: &[&str] = &["absent", "notinstalled", "notpresent", "disabled"];
const OFFLINE_STATES: &[&str] = &["standbyoffline", "unavailableoffline"];

#[derive(Debug, Default)]
pub struct NormalizeOutcome {
    pub readings: Vec<SensorReading>,
    /// Marked absent by the device, or no usable value.
    pub absent: usize,
    pub rejected: Vec<RedfishError>,
}

enum Classified {
    Reading(SensorReading),
    Absent,
}

#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    naming: NamingConf,
}

impl Normalizer {
    pub fn new(naming: NamingConf) -> Self {
        Self { naming }
    }

    pub fn normalize(&self, records: &[RawRecord], category: SensorCategory) -> NormalizeOutcome {
        let map = field_map(category);
        let mut outcome = NormalizeOutcome::default();

        for record in records {
            match self.classify(record, map) {
                Ok(Classified::Reading(reading)) => {
                    debug!(
                        category = %category,
                        component = %reading.component_id,
                        value = reading.value,
                        valid = reading.valid,
                        "sensor reading"
                    );
                    outcome.readings.push(reading);
                }
                Ok(Classified::Absent) => outcome.absent += 1,
                Err(e) => {
                    warn!(category = %category, "skipping sensor record: {}", e);
                    outcome.rejected.push(e);
                }
            }
        }

        outcome
    }

    fn classify(&self, record: &RawRecord, map: &FieldMap) -> Result<Classified, RedfishError> {
        let uri = record.uri.clone().unwrap_or_else(|| "<embedded>".into());
        let body = record.body.as_object().ok_or_else(|| RedfishError::Parse {
            uri: uri.clone(),
            reason: "sensor record is not a JSON object".into(),
        })?;

        let state = sensor_state(&record.body).map(|s| squash(&s));
        if state.as_deref().is_some_and(|s| ABSENT_STATES.contains(&s)) {
            debug!(uri = %uri, "sensor marked absent");
            return Ok(Classified::Absent);
        }

        let component_id = self.component_id(record, map.category).ok_or_else(|| RedfishError::Parse {
            uri: uri.clone(),
            reason: "no stable identifier (MemberId, Id, Name or URI)".into(),
        })?;

        let mut raw_value = None;
        for field in map.value_fields {
            match body.get(*field) {
                None | Some(Value::Null) => continue,
                Some(Value::Number(n)) => {
                    raw_value = n.as_f64();
                    break;
                }
                Some(Value::String(s)) => {
                    let parsed = s.trim().parse::<f64>().map_err(|_| RedfishError::Parse {
                        uri: uri.clone(),
                        reason: format!("{field} is not numeric: {s:?}"),
                    })?;
                    raw_value = Some(parsed);
                    break;
                }
                Some(other) => {
                    return Err(RedfishError::Parse {
                        uri,
                        reason: format!("{field} has unexpected type: {other}"),
                    })
                }
            }
        }
        let Some(raw_value) = raw_value.filter(|v| v.is_finite()) else {
            debug!(component = %component_id, "sensor has no usable reading");
            return Ok(Classified::Absent);
        };

        let scale = match body.get("ReadingUnits").and_then(Value::as_str) {
            None => 1.0,
            Some(declared) => map
                .units
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(declared.trim()))
                .map(|(_, scale)| *scale)
                .ok_or_else(|| RedfishError::Parse {
                    uri: uri.clone(),
                    reason: format!("unsupported unit {declared:?} for {}", map.category),
                })?,
        };

        let mut value = raw_value * scale;
        if map.integral {
            value = value.round();
        }
        let valid = !state.as_deref().is_some_and(|s| OFFLINE_STATES.contains(&s));

        Ok(Classified::Reading(SensorReading {
            kind: map.category,
            component_id,
            unit: map.unit,
            value,
            valid,
        }))
    }

    fn component_id(&self, record: &RawRecord, category: SensorCategory) -> Option<String> {
        let from_body = ID_FIELDS.iter().find_map(|field| {
            record
                .body
                .get(*field)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        });
        let raw = from_body.or_else(|| {
            record
                .uri
                .as_deref()
                .and_then(|u| u.trim_end_matches('/').rsplit('/').next())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        })?;

        let renamed = self
            .naming
            .rules(category)
            .iter()
            .fold(raw, |acc, rule| rule.apply(&acc));
        Some(renamed.trim().to_string()).filter(|s| !s.is_empty())
    }
}

/// `Status` is either a plain string or a Redfish `{ "State": ... }` object.
fn sensor_state(body: &Value) -> Option<String> {
    match body.get("Status")? {
        Value::String(s) => Some(s.clone()),
        Value::Object(o) => o.get("State").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

fn squash(state: &str) -> String {
    state
        .chars()
        .filter(|c| !matches!(c, ' ' | '_' | '-'))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Merges one cycle's readings into a metric set. Invalid readings and
/// duplicate components are left out; the count of dropped readings is returned.
pub fn build_metric_set<'a, I>(readings: I, collected_at: OffsetDateTime) -> (MetricSet, usize)
where
    I: IntoIterator<Item = &'a SensorReading>,
{
    let mut set = MetricSet::new(collected_at);
    let mut dropped = 0;

    for reading in readings {
        if !reading.valid {
            dropped += 1;
            continue;
        }
        let name = reading.metric_name();
        set.describe(&name, field_map(reading.kind).help);
        let key = MetricKey::new(name, &[(COMPONENT_LABEL, reading.component_id.as_str())]);
        if !set.insert(key, reading.value) {
            warn!(
                category = %reading.kind,
                component = %reading.component_id,
                "duplicate component in one cycle, keeping the first reading"
            );
            dropped += 1;
        }
    }

    (set, dropped)
}
