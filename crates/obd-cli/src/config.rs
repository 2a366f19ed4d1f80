//! Application configuration
//!
//! Defaults, then an optional TOML file, then `OBD_*` environment variables
//! (`__` separates nested keys, e.g. `OBD_TRANSPORT__RESPONSE_TIMEOUT_MS`).

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use obd_scheduler::{PollConfig, ScanConfig};
use obd_transport::TransportConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Maximum tracing level (default: info)
    pub log_level: String,
    pub log_format: LogFormat,
    pub transport: TransportConfig,
    pub poll: PollConfig,
    pub scan: ScanConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            transport: TransportConfig::default(),
            poll: PollConfig::default(),
            scan: ScanConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from the optional file and the process environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        Self::build(builder, environment())
    }

    fn build(
        builder: ConfigBuilder<DefaultState>,
        env: Environment,
    ) -> Result<Self, ConfigError> {
        builder.add_source(env).build()?.try_deserialize()
    }
}

fn environment() -> Environment {
    Environment::with_prefix("OBD")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}
