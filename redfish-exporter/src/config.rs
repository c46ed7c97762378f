//! Configuration de l'exporter : fichier YAML + surcharges d'environnement.
//!
//! Chargée une fois au démarrage, immuable ensuite. Le mot de passe BMC ne
//! vient que de l'environnement.

use crate::error::ConfigError;
use crate::models::{Credentials, SensorCategory};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const CONFIG_PATH_ENV: &str = "REDFISH_EXPORTER_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "redfish-exporter.yaml";

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ExporterConfig {
    pub bmc: BmcConf,
    pub listen: ListenConf,
    pub collect_interval_secs: u64,
    pub cycle_timeout_secs: u64,
    pub log_level: String,
    /// Substituted for `{chassis}` in source paths.
    pub chassis: String,
    pub sources: SourcesConf,
    pub naming: NamingConf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct BmcConf {
    /// `10.0.0.5`, `bmc.lan:8443` or a full `http(s)://` base URL.
    pub host: String,
    pub username: String,
    pub password_env: String,
    pub auth: AuthMode,
    pub verify_tls: bool,
    pub timeout_secs: u64,
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    Basic,
    Session,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ListenConf {
    pub address: String,
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SourcesConf {
    pub power: SourceConf,
    pub fan: SourceConf,
    pub temperature: SourceConf,
}

/// Where a sensor category lives on the BMC.
///
/// Without `array`, the resource is a collection and each `Members` entry is
/// fetched. With `array`, records are read from that embedded array.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SourceConf {
    pub path: String,
    #[serde(default)]
    pub array: Option<String>,
    /// Keep only members whose URI contains one of these substrings.
    #[serde(default)]
    pub member_filter: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct NamingConf {
    pub power: Vec<RenameRule>,
    pub fan: Vec<RenameRule>,
    pub temperature: Vec<RenameRule>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "match", rename_all = "lowercase")]
pub enum RenameRule {
    Contains { find: String, replace: String },
    Prefix { find: String, replace: String },
    Suffix { find: String, replace: String },
}

impl RenameRule {
    fn contains(find: &str, replace: &str) -> Self {
        Self::Contains { find: find.into(), replace: replace.into() }
    }

    fn suffix(find: &str, replace: &str) -> Self {
        Self::Suffix { find: find.into(), replace: replace.into() }
    }

    pub fn apply(&self, name: &str) -> String {
        match self {
            Self::Contains { find, replace } => name.replace(find.as_str(), replace),
            Self::Prefix { find, replace } => match name.strip_prefix(find.as_str()) {
                Some(rest) => format!("{replace}{rest}"),
                None => name.to_string(),
            },
            Self::Suffix { find, replace } => match name.strip_suffix(find.as_str()) {
                Some(rest) => format!("{rest}{replace}"),
                None => name.to_string(),
            },
        }
    }
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            bmc: BmcConf::default(),
            listen: ListenConf::default(),
            collect_interval_secs: 15,
            cycle_timeout_secs: 30,
            log_level: "info".into(),
            chassis: "Miramar_Sensor".into(),
            sources: SourcesConf::default(),
            naming: NamingConf::with_tray_labels(),
        }
    }
}

impl Default for BmcConf {
    fn default() -> Self {
        Self {
            host: String::new(),
            username: String::new(),
            password_env: "BMC_PASSWORD".into(),
            auth: AuthMode::Basic,
            verify_tls: false,
            timeout_secs: 10,
            retry_backoff_ms: 500,
        }
    }
}

impl Default for ListenConf {
    fn default() -> Self {
        Self { address: "0.0.0.0".into(), port: 9101 }
    }
}

impl Default for SourcesConf {
    fn default() -> Self {
        Self {
            power: SourceConf {
                path: "/redfish/v1/Chassis/{chassis}/Sensors".into(),
                array: None,
                member_filter: vec!["power_PWR_PDB_".into(), "PWR_MB_PSU".into()],
            },
            fan: SourceConf {
                path: "/redfish/v1/Chassis/{chassis}/Thermal".into(),
                array: Some("Fans".into()),
                member_filter: Vec::new(),
            },
            temperature: SourceConf {
                path: "/redfish/v1/Chassis/{chassis}/Thermal".into(),
                array: Some("Temperatures".into()),
                member_filter: Vec::new(),
            },
        }
    }
}

impl NamingConf {
    /// GPU/CPU tray labels used by the Miramar chassis sensor naming scheme.
    pub fn with_tray_labels() -> Self {
        Self {
            power: vec![
                RenameRule::contains("power_PWR_PDB_PSU", "GPU_TRAY_PSU"),
                RenameRule::contains("power_PWR_MB_PSU", "CPU_TRAY_PSU"),
            ],
            fan: vec![
                RenameRule::contains("SPD_", ""),
                RenameRule::suffix("_F", " Front"),
                RenameRule::suffix("_R", " Rear"),
            ],
            temperature: vec![
                RenameRule::contains("TEMP_PDB_PSU", "TEMP_GPU_TRAY_PSU"),
                RenameRule::contains("TEMP_MB_PSU", "TEMP_CPU_TRAY_PSU"),
            ],
        }
    }

    pub fn rules(&self, category: SensorCategory) -> &[RenameRule] {
        match category {
            SensorCategory::Power => &self.power,
            SensorCategory::Fan => &self.fan,
            SensorCategory::Temperature => &self.temperature,
        }
    }
}

impl ExporterConfig {
    /// Source for a category with `{chassis}` resolved.
    pub fn source(&self, category: SensorCategory) -> SourceConf {
        let raw = match category {
            SensorCategory::Power => &self.sources.power,
            SensorCategory::Fan => &self.sources.fan,
            SensorCategory::Temperature => &self.sources.temperature,
        };
        SourceConf {
            path: raw.path.replace("{chassis}", &self.chassis),
            ..raw.clone()
        }
    }

    /// Scheme defaults to https when the host carries none.
    pub fn base_url(&self) -> String {
        let host = self.bmc.host.trim().trim_end_matches('/');
        if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("https://{host}")
        }
    }

    pub fn collect_interval(&self) -> Duration {
        Duration::from_secs(self.collect_interval_secs)
    }

    pub fn cycle_timeout(&self) -> Duration {
        Duration::from_secs(self.cycle_timeout_secs)
    }

    /// Overrides from `BMC_HOST`, `BMC_USERNAME`, `EXPORTER_PORT`,
    /// `COLLECT_INTERVAL_SECS` and `LOG_LEVEL`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("BMC_HOST") {
            self.bmc.host = host;
        }
        if let Some(user) = lookup("BMC_USERNAME") {
            self.bmc.username = user;
        }
        if let Some(port) = lookup("EXPORTER_PORT") {
            self.listen.port = parse_env("EXPORTER_PORT", &port)?;
        }
        if let Some(secs) = lookup("COLLECT_INTERVAL_SECS") {
            self.collect_interval_secs = parse_env("COLLECT_INTERVAL_SECS", &secs)?;
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            self.log_level = level;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bmc.host.trim().is_empty() {
            return Err(ConfigError::Missing("bmc.host (or BMC_HOST)".into()));
        }
        if self.bmc.username.trim().is_empty() {
            return Err(ConfigError::Missing("bmc.username (or BMC_USERNAME)".into()));
        }
        reqwest::Url::parse(&self.base_url()).map_err(|e| ConfigError::Invalid {
            key: "bmc.host".into(),
            reason: e.to_string(),
        })?;
        if self.collect_interval_secs == 0 {
            return Err(invalid("collect_interval_secs", "must be greater than zero"));
        }
        if self.cycle_timeout_secs == 0 {
            return Err(invalid("cycle_timeout_secs", "must be greater than zero"));
        }
        if self.bmc.timeout_secs == 0 {
            return Err(invalid("bmc.timeout_secs", "must be greater than zero"));
        }
        for category in SensorCategory::ALL {
            let source = self.source(category);
            if !source.path.starts_with('/') {
                return Err(invalid(
                    &format!("sources.{category}.path"),
                    "must be an absolute resource path",
                ));
            }
        }
        Ok(())
    }

    /// Reads the password from the variable named by `bmc.password_env`.
    pub fn credentials<F>(&self, lookup: F) -> Result<Credentials, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let password = lookup(&self.bmc.password_env)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ConfigError::Missing(format!("{} environment variable", self.bmc.password_env)))?;
        Ok(Credentials {
            host: self.bmc.host.clone(),
            username: self.bmc.username.clone(),
            password,
        })
    }
}

fn invalid(key: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid { key: key.into(), reason: reason.into() }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key: key.into(),
        reason: e.to_string(),
    })
}

/// Parses a config file; a missing or empty file yields the defaults.
pub async fn load_config_file(path: &Path) -> Result<ExporterConfig, ConfigError> {
    if !path.exists() {
        tracing::info!("no config file at {}, using defaults", path.display());
        return Ok(ExporterConfig::default());
    }
    let txt = tokio::fs::read_to_string(path).await.map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    if txt.trim().is_empty() {
        return Ok(ExporterConfig::default());
    }
    serde_yaml::from_str(&txt).map_err(|source| ConfigError::Yaml {
        path: path.display().to_string(),
        source,
    })
}

/// File from `REDFISH_EXPORTER_CONFIG`, then process environment, then validation.
pub async fn load_config() -> Result<ExporterConfig, ConfigError> {
    let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
    let mut cfg = load_config_file(Path::new(&path)).await?;
    cfg.apply_env(|key| std::env::var(key).ok())?;
    cfg.validate()?;
    Ok(cfg)
}
