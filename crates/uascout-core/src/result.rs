//! Discovery result records published after each run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::discovery::{DiscoveryConfigModel, DiscoveryMode, OperationContextModel};
use crate::registry::{ApplicationInfoModel, EndpointInfoModel};

/// Summary of the request that produced a batch of results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryResultInfoModel {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovery: Option<DiscoveryMode>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovery_config: Option<DiscoveryConfigModel>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<OperationContextModel>,

    /// Free form diagnostics of the run
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub diagnostics: BTreeMap<String, String>,
}

/// One record of a discovery batch.
///
/// A record carries one application/endpoint pair. The last record of every
/// batch is a sentinel without endpoint that carries the request summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryResultModel {
    /// Position of the record within its batch
    pub index: u32,

    pub timestamp: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application: Option<ApplicationInfoModel>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<EndpointInfoModel>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<DiscoveryResultInfoModel>,
}

impl DiscoveryResultModel {
    /// Creates a record for a discovered endpoint.
    pub fn record(
        index: u32,
        timestamp: DateTime<Utc>,
        application: ApplicationInfoModel,
        endpoint: EndpointInfoModel,
    ) -> Self {
        Self {
            index,
            timestamp,
            application: Some(application),
            endpoint: Some(endpoint),
            result: None,
        }
    }

    /// Creates the terminating record of a batch.
    pub fn sentinel(index: u32, timestamp: DateTime<Utc>, info: DiscoveryResultInfoModel) -> Self {
        Self {
            index,
            timestamp,
            application: None,
            endpoint: None,
            result: Some(info),
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.endpoint.is_none()
    }
}
