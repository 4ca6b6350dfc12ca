//! Configuration management for the uascout discovery service.
//!
//! Configuration is loaded from YAML, optionally merged with environment
//! variables (`UASCOUT__SECTION__FIELD`), and validated before use. Sections:
//! - `discoverer`: identity the service discovers on behalf of
//! - `discovery`: standing discovery mode and scan configuration
//! - `registry`: storage behaviour of the registry
//! - `logging`: log level and format
//! - `catalog`: static endpoint descriptions served to discovery

use crate::discovery::{DiscoveryConfigModel, DiscoveryMode};
use crate::endpoint::ApplicationDescriptionModel;
use crate::error::{ConfigError, Result};
use crate::registry::{CredentialType, SecurityMode};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Main application configuration.
///
/// # Examples
///
/// ```no_run
/// use uascout_core::config::AppConfig;
///
/// let config = AppConfig::from_file("uascout.yaml").unwrap();
/// config.validate().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Discoverer identity
    #[serde(default)]
    pub discoverer: DiscovererConfig,

    /// Standing discovery configuration
    #[serde(default)]
    pub discovery: DiscoverySettings,

    /// Registry settings
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Servers answered by the static endpoint catalog
    #[serde(default)]
    pub catalog: Vec<CatalogServerConfig>,
}

impl AppConfig {
    /// Creates a new default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::file_not_found(path.display().to_string()).into());
        }
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::LoadFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        Self::from_yaml(&contents)
    }

    /// Loads configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| {
            ConfigError::InvalidFormat {
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Loads configuration using the `config` crate, merging the file with
    /// `UASCOUT__*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration cannot be loaded or merged.
    pub fn from_config_builder<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let config = config::Config::builder()
            .add_source(config::File::from(path).required(true))
            .add_source(
                config::Environment::with_prefix("UASCOUT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigError::LoadFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        config.try_deserialize().map_err(|e| {
            ConfigError::InvalidFormat {
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns the first invalid setting found.
    pub fn validate(&self) -> Result<()> {
        if self.discoverer.id.trim().is_empty() {
            return Err(ConfigError::missing_field("discoverer.id").into());
        }

        self.discovery.validate()?;

        if self.registry.max_update_retries == 0 {
            return Err(ConfigError::invalid_value(
                "registry.max_update_retries",
                "must be at least 1",
            )
            .into());
        }

        self.logging.parse_level()?;

        for (i, server) in self.catalog.iter().enumerate() {
            if server.discovery_url.trim().is_empty() {
                return Err(ConfigError::invalid_value(
                    format!("catalog[{}].discovery_url", i),
                    "must not be empty",
                )
                .into());
            }
            if server.application.application_uri.trim().is_empty() {
                return Err(ConfigError::invalid_value(
                    format!("catalog[{}].application.application_uri", i),
                    "must not be empty",
                )
                .into());
            }
        }

        Ok(())
    }
}

/// Identity of the discoverer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscovererConfig {
    /// Discoverer id, `<gateway>_module_<module>`
    #[serde(default = "default_discoverer_id")]
    pub id: String,

    /// Optional site the discoverer belongs to
    #[serde(default)]
    pub site_id: Option<String>,
}

fn default_discoverer_id() -> String {
    "uascout_module_discovery".to_string()
}

impl Default for DiscovererConfig {
    fn default() -> Self {
        Self {
            id: default_discoverer_id(),
            site_id: None,
        }
    }
}

/// Standing discovery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverySettings {
    /// Mode of the periodic scan
    #[serde(default = "default_discovery_mode")]
    pub mode: DiscoveryMode,

    /// Scan configuration of the periodic scan
    #[serde(default)]
    pub configuration: DiscoveryConfigModel,

    /// Delay before the first periodic scan
    #[serde(default = "default_initial_scan_delay")]
    pub initial_scan_delay_secs: u64,

    /// Capacity of the request queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Interval of scan progress reports
    #[serde(default = "default_progress_interval")]
    pub progress_interval_secs: u64,
}

fn default_discovery_mode() -> DiscoveryMode {
    DiscoveryMode::Off
}

fn default_initial_scan_delay() -> u64 {
    20
}

fn default_queue_capacity() -> usize {
    1000
}

fn default_progress_interval() -> u64 {
    3
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            mode: default_discovery_mode(),
            configuration: DiscoveryConfigModel::default(),
            initial_scan_delay_secs: default_initial_scan_delay(),
            queue_capacity: default_queue_capacity(),
            progress_interval_secs: default_progress_interval(),
        }
    }
}

impl DiscoverySettings {
    pub fn initial_scan_delay(&self) -> Duration {
        Duration::from_secs(self.initial_scan_delay_secs)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_secs)
    }

    /// Validates the discovery settings.
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(
                ConfigError::invalid_value("discovery.queue_capacity", "must be at least 1").into(),
            );
        }
        if self.progress_interval_secs == 0 {
            return Err(ConfigError::invalid_value(
                "discovery.progress_interval_secs",
                "must be at least 1",
            )
            .into());
        }

        let config = &self.configuration;
        if let Some(percent) = config.min_port_probes_percent {
            if percent == 0 || percent > 100 {
                return Err(ConfigError::invalid_value(
                    "discovery.configuration.min_port_probes_percent",
                    format!("{} is not within 1..=100", percent),
                )
                .into());
            }
        }
        if config.max_port_probes == Some(0) {
            return Err(ConfigError::invalid_value(
                "discovery.configuration.max_port_probes",
                "must be at least 1",
            )
            .into());
        }
        if config.max_network_probes == Some(0) {
            return Err(ConfigError::invalid_value(
                "discovery.configuration.max_network_probes",
                "must be at least 1",
            )
            .into());
        }
        Ok(())
    }
}

/// Registry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Attempts of a read-modify-write before giving up on a conflict
    #[serde(default = "default_max_update_retries")]
    pub max_update_retries: usize,
}

fn default_max_update_retries() -> usize {
    3
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_update_retries: default_max_update_retries(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "text" or "json"
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Text
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl LoggingConfig {
    /// Parses the log level string to a tracing Level.
    pub fn parse_level(&self) -> Result<Level> {
        self.level.parse().map_err(|_| {
            ConfigError::InvalidValue {
                field: "logging.level".to_string(),
                reason: format!("Invalid log level: {}", self.level),
            }
            .into()
        })
    }
}

/// Log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format
    Text,
    /// JSON format for structured logging
    Json,
}

/// A server known to the static endpoint catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogServerConfig {
    /// Url under which the server answers, matched by host and port
    pub discovery_url: String,

    /// Application description returned for the server
    pub application: ApplicationDescriptionModel,

    /// Endpoints offered by the server
    #[serde(default)]
    pub endpoints: Vec<CatalogEndpointConfig>,
}

/// An endpoint of a catalog server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEndpointConfig {
    /// Advertised endpoint url, defaults to the discovery url
    #[serde(default)]
    pub endpoint_url: Option<String>,

    #[serde(default = "default_security_mode")]
    pub security_mode: SecurityMode,

    #[serde(default)]
    pub security_policy_uri: Option<String>,

    #[serde(default)]
    pub security_level: Option<i32>,

    #[serde(default = "default_user_tokens")]
    pub user_identity_tokens: Vec<CredentialType>,
}

impl Default for CatalogEndpointConfig {
    fn default() -> Self {
        Self {
            endpoint_url: None,
            security_mode: default_security_mode(),
            security_policy_uri: None,
            security_level: None,
            user_identity_tokens: default_user_tokens(),
        }
    }
}

fn default_security_mode() -> SecurityMode {
    SecurityMode::None
}

fn default_user_tokens() -> Vec<CredentialType> {
    vec![CredentialType::None]
}
