//! Collaborators the discovery services call out to.

use async_trait::async_trait;
use std::fmt;
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use uascout_core::{DiscoveredEndpointModel, DiscoveryResultModel};
use url::Url;

/// A server url together with the socket address it resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryTarget {
    pub url: Url,
    pub address: SocketAddr,
}

impl fmt::Display for DiscoveryTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.url, self.address)
    }
}

/// Asks a server for its endpoints.
#[async_trait]
pub trait EndpointDiscovery: Send + Sync {
    /// Returns the endpoints the server at `target` offers, described in one
    /// of `locales` where the server supports it.
    async fn find_endpoints(
        &self,
        target: &DiscoveryTarget,
        locales: &[String],
        token: &CancellationToken,
    ) -> anyhow::Result<Vec<DiscoveredEndpointModel>>;
}

/// Receives the results of a discovery run.
///
/// Results arrive as one batch per run: the discovered records first, then a
/// sentinel record, with strictly increasing `index`.
#[async_trait]
pub trait DiscoveryResultHandler: Send + Sync {
    async fn report_results(
        &self,
        results: Vec<DiscoveryResultModel>,
        token: &CancellationToken,
    ) -> anyhow::Result<()>;
}
