//! Discovery request and configuration models.
//!
//! These are the values callers hand to the discovery engine. They are plain,
//! serializable data; resolving them into a concrete scan plan is the job of the
//! discovery crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ParseError;

/// Discovery mode of a request.
///
/// Determines which address and port ranges are derived automatically when the
/// request does not name them explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryMode {
    /// No discovery
    Off,
    /// Probe only the explicitly configured discovery urls
    Url,
    /// Full subnets of all local interfaces, all ports
    Local,
    /// /24 of every interface plus gateways, well known ports
    Fast,
    /// Full subnets plus gateways, OPC UA ports
    Network,
    /// Full subnets plus gateways, unassigned ports
    Scan,
}

impl DiscoveryMode {
    /// Returns true if this mode scans address and port ranges.
    pub fn is_scanning(&self) -> bool {
        !matches!(self, DiscoveryMode::Off | DiscoveryMode::Url)
    }
}

impl fmt::Display for DiscoveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DiscoveryMode::Off => "off",
            DiscoveryMode::Url => "url",
            DiscoveryMode::Local => "local",
            DiscoveryMode::Fast => "fast",
            DiscoveryMode::Network => "network",
            DiscoveryMode::Scan => "scan",
        };
        f.write_str(s)
    }
}

impl FromStr for DiscoveryMode {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" => Ok(DiscoveryMode::Off),
            "url" => Ok(DiscoveryMode::Url),
            "local" => Ok(DiscoveryMode::Local),
            "fast" => Ok(DiscoveryMode::Fast),
            "network" => Ok(DiscoveryMode::Network),
            "scan" => Ok(DiscoveryMode::Scan),
            other => Err(ParseError::InvalidValue {
                field: "discovery".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// Scan parameters of a discovery request.
///
/// Every field is optional; missing values are filled with mode dependent
/// defaults when the request is resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryConfigModel {
    /// Address ranges to scan, e.g. `192.168.1.0/24;10.0.0.1-10.0.0.20`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_ranges_to_scan: Option<String>,

    /// Timeout of a single network probe in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_probe_timeout_ms: Option<u64>,

    /// Maximum number of outstanding network probes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_network_probes: Option<usize>,

    /// Port ranges to scan, e.g. `4840-4841,48010`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_ranges_to_scan: Option<String>,

    /// Timeout of a single port probe in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_probe_timeout_ms: Option<u64>,

    /// Maximum number of outstanding port probes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_port_probes: Option<usize>,

    /// Lower bound of port probe concurrency, in percent of the maximum
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_port_probes_percent: Option<u32>,

    /// Idle time between automatic rescans in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_time_between_scans_secs: Option<u64>,

    /// Discovery urls probed in addition to scan results
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovery_urls: Option<Vec<String>>,

    /// Locales used to filter endpoint descriptions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locales: Option<Vec<String>>,
}

impl DiscoveryConfigModel {
    /// Returns the network probe timeout as a Duration
    pub fn network_probe_timeout(&self) -> Option<Duration> {
        self.network_probe_timeout_ms.map(Duration::from_millis)
    }

    /// Returns the port probe timeout as a Duration
    pub fn port_probe_timeout(&self) -> Option<Duration> {
        self.port_probe_timeout_ms.map(Duration::from_millis)
    }

    /// Returns the idle time between scans as a Duration
    pub fn idle_time_between_scans(&self) -> Option<Duration> {
        self.idle_time_between_scans_secs.map(Duration::from_secs)
    }

    /// Returns the configured discovery urls, empty when unset
    pub fn discovery_urls(&self) -> &[String] {
        self.discovery_urls.as_deref().unwrap_or_default()
    }

    /// Returns the configured locales, empty when unset
    pub fn locales(&self) -> &[String] {
        self.locales.as_deref().unwrap_or_default()
    }
}

/// Operation context used for correlation and auditing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationContextModel {
    /// Identity on whose behalf the operation runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authority_id: Option<String>,

    /// Time of the operation
    pub time: DateTime<Utc>,
}

impl OperationContextModel {
    /// Creates a context stamped with the current time.
    pub fn now() -> Self {
        Self {
            authority_id: None,
            time: Utc::now(),
        }
    }

    /// Sets the authority of the context.
    pub fn with_authority(mut self, authority_id: impl Into<String>) -> Self {
        self.authority_id = Some(authority_id.into());
        self
    }
}

impl Default for OperationContextModel {
    fn default() -> Self {
        Self::now()
    }
}

/// A discovery request as submitted by a caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryRequestModel {
    /// Request identifier, used for correlation and cancellation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Requested discovery mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovery: Option<DiscoveryMode>,

    /// Scan configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<DiscoveryConfigModel>,

    /// Correlation context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<OperationContextModel>,
}

impl DiscoveryRequestModel {
    /// Creates a request for the given mode and configuration.
    pub fn new(mode: DiscoveryMode, configuration: DiscoveryConfigModel) -> Self {
        Self {
            id: None,
            discovery: Some(mode),
            configuration: Some(configuration),
            context: None,
        }
    }

    /// Sets the request identifier.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Sets the correlation context.
    pub fn with_context(mut self, context: OperationContextModel) -> Self {
        self.context = Some(context);
        self
    }

    /// Returns the request id or an empty string.
    pub fn id(&self) -> &str {
        self.id.as_deref().unwrap_or_default()
    }
}

/// Registration of a single server by discovery url.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerRegistrationRequestModel {
    /// Discovery url of the server
    pub discovery_url: String,

    /// Request identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Correlation context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<OperationContextModel>,
}

impl From<ServerRegistrationRequestModel> for DiscoveryRequestModel {
    fn from(request: ServerRegistrationRequestModel) -> Self {
        Self {
            id: request.id,
            discovery: Some(DiscoveryMode::Url),
            configuration: Some(DiscoveryConfigModel {
                discovery_urls: Some(vec![request.discovery_url]),
                ..Default::default()
            }),
            context: request.context,
        }
    }
}

/// Cancellation of pending discovery requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryCancelModel {
    /// Id of the requests to cancel
    pub id: String,

    /// Correlation context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<OperationContextModel>,
}
