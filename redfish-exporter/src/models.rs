use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use time::OffsetDateTime;

/// BMC login material. The password comes from the environment and never
/// shows up in `Debug` output.
#[derive(Clone)]
pub struct Credentials {
    pub host: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorCategory {
    Power,
    Fan,
    Temperature,
}

impl SensorCategory {
    pub const ALL: [SensorCategory; 3] = [Self::Power, Self::Fan, Self::Temperature];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Power => "power",
            Self::Fan => "fan",
            Self::Temperature => "temperature",
        }
    }
}

impl fmt::Display for SensorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Watts,
    Rpm,
    Celsius,
}

impl Unit {
    /// Base-unit suffix of the exposed metric name.
    pub fn suffix(&self) -> &'static str {
        match self {
            Self::Watts => "watts",
            Self::Rpm => "rpm",
            Self::Celsius => "celsius",
        }
    }
}

/// One sensor document as returned by the BMC, before normalization.
#[derive(Debug, Clone)]
pub struct RawRecord {
    /// `@odata.id` of the resource when it was fetched on its own.
    pub uri: Option<String>,
    pub body: serde_json::Value,
}

impl RawRecord {
    pub fn new(uri: Option<String>, body: serde_json::Value) -> Self {
        Self { uri, body }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    pub kind: SensorCategory,
    pub component_id: String,
    pub unit: Unit,
    pub value: f64,
    pub valid: bool,
}

/// Metric name plus sorted label pairs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MetricKey {
    pub name: String,
    pub labels: Vec<(String, String)>,
}

impl MetricKey {
    pub fn new(name: impl Into<String>, labels: &[(&str, &str)]) -> Self {
        let mut labels: Vec<(String, String)> = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        labels.sort();
        Self { name: name.into(), labels }
    }

    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// A complete, immutable set of samples from one collection cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricSet {
    samples: BTreeMap<MetricKey, f64>,
    help: BTreeMap<String, String>,
    collected_at: Option<OffsetDateTime>,
}

impl MetricSet {
    pub fn new(collected_at: OffsetDateTime) -> Self {
        Self {
            samples: BTreeMap::new(),
            help: BTreeMap::new(),
            collected_at: Some(collected_at),
        }
    }

    /// Placeholder served before the first successful cycle.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn describe(&mut self, name: &str, help: &str) {
        self.help.insert(name.to_string(), help.to_string());
    }

    /// Returns false (and keeps the first value) when the key is already present.
    pub fn insert(&mut self, key: MetricKey, value: f64) -> bool {
        if self.samples.contains_key(&key) {
            return false;
        }
        self.samples.insert(key, value);
        true
    }

    pub fn get(&self, key: &MetricKey) -> Option<f64> {
        self.samples.get(key).copied()
    }

    pub fn help(&self, name: &str) -> Option<&str> {
        self.help.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MetricKey, f64)> {
        self.samples.iter().map(|(k, v)| (k, *v))
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn collected_at(&self) -> Option<OffsetDateTime> {
        self.collected_at
    }
}
