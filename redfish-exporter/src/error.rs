use crate::models::SensorCategory;

/// Errors raised while talking to the BMC.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RedfishError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("transport error while collecting {category}: {reason}")]
    Transport { category: SensorCategory, reason: String },
    #[error("HTTP {status} for {uri}")]
    Status { uri: String, status: u16 },
    #[error("malformed payload at {uri}: {reason}")]
    Parse { uri: String, reason: String },
    #[error("invalid client setup: {0}")]
    Setup(String),
}

impl RedfishError {
    /// Re-tags a transport error with the category that is reporting it.
    pub fn for_category(self, category: SensorCategory) -> Self {
        match self {
            Self::Transport { reason, .. } => Self::Transport { category, reason },
            other => other,
        }
    }
}

/// A cycle that produced no usable reading at all.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CollectionError {
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("all sensor categories failed: {}", .0.join("; "))]
    AllCategoriesFailed(Vec<String>),
    #[error("no usable sensor readings ({skipped} records skipped)")]
    NoReadings { skipped: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read { path: String, source: std::io::Error },
    #[error("invalid YAML in {path}: {source}")]
    Yaml { path: String, source: serde_yaml::Error },
    #[error("missing required setting: {0}")]
    Missing(String),
    #[error("invalid setting {key}: {reason}")]
    Invalid { key: String, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("prometheus encoding failed: {0}")]
    Prometheus(#[from] prometheus::Error),
    #[error("exposition is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}
