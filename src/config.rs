use serde::{Deserialize, Serialize};
use std::env;
use thiserror::Error;
use validator::Validate;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Parse error for {field}: {value} - {source}")]
    Parse {
        field: String,
        value: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("No catalog_path configured; set JOINERY_CATALOG_PATH or catalog_path in the config file")]
    MissingCatalogPath,
}

/// Engine configuration with validation
#[derive(Clone, Debug, Validate, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Deepest join tree the planner accepts
    #[validate(range(
        min = 1,
        max = 64,
        message = "Max join depth must be between 1 and 64"
    ))]
    pub max_join_depth: usize,

    /// Open a mutation ledger for write/delete calls that do not say otherwise
    pub rollback_by_default: bool,

    /// Skip mutation events for calls that do not say otherwise
    pub suppress_events_by_default: bool,

    /// Run every operation inside one adapter transaction per connection
    pub transactional_by_default: bool,

    /// Buffered mutation events per subscriber
    #[validate(range(
        min = 1,
        max = 65536,
        message = "Event channel capacity must be between 1 and 65536"
    ))]
    pub event_channel_capacity: usize,

    /// Remove join-only fields from results
    pub strip_transient_fields: bool,

    /// YAML relation catalog loaded by `Engine::from_config`
    pub catalog_path: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_join_depth: 16,
            rollback_by_default: false,
            suppress_events_by_default: false,
            transactional_by_default: false,
            event_channel_capacity: 1024,
            strip_transient_fields: true,
            catalog_path: None,
        }
    }
}

impl EngineConfig {
    /// Create configuration from environment variables with validation.
    /// A `.env` file in the working directory is honoured.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config = Self {
            max_join_depth: parse_env_var("JOINERY_MAX_JOIN_DEPTH", "16")?,
            rollback_by_default: parse_env_var("JOINERY_ROLLBACK", "false")?,
            suppress_events_by_default: parse_env_var("JOINERY_SUPPRESS_EVENTS", "false")?,
            transactional_by_default: parse_env_var("JOINERY_TRANSACTIONAL", "false")?,
            event_channel_capacity: parse_env_var("JOINERY_EVENT_CAPACITY", "1024")?,
            strip_transient_fields: parse_env_var("JOINERY_STRIP_TRANSIENT", "true")?,
            catalog_path: env::var("JOINERY_CATALOG_PATH")
                .ok()
                .filter(|p| !p.is_empty()),
        };

        config.validate()?;
        Ok(config)
    }

    /// Create configuration from YAML file
    pub fn from_yaml_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Parse {
            field: "yaml_file".to_string(),
            value: "file read failed".to_string(),
            source: Box::new(e),
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content).map_err(|e| ConfigError::Parse {
            field: "yaml_content".to_string(),
            value: content.to_string(),
            source: Box::new(e),
        })?;

        config.validate()?;
        Ok(config)
    }
}

/// Parse an environment variable with a default value
fn parse_env_var<T: std::str::FromStr>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let value = env::var(key).unwrap_or_else(|_| default.to_string());
    value.parse().map_err(|e| ConfigError::Parse {
        field: key.to_string(),
        value,
        source: Box::new(e),
    })
}
