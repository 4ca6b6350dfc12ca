//! Endpoint discovery answered from the configured server catalog.
//!
//! Stands in for an OPC UA client stack: every configured server is matched
//! by host and port of the probed url and answers with its configured
//! endpoints.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::BTreeSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uascout_core::config::{CatalogEndpointConfig, CatalogServerConfig};
use uascout_core::{DiscoveredEndpointModel, EndpointDescriptionModel};
use uascout_discovery::{DiscoveryTarget, EndpointDiscovery, DEFAULT_OPCUA_PORT};
use url::Url;

/// Endpoint discovery over a static catalog of servers.
#[derive(Debug, Clone, Default)]
pub struct CatalogEndpointDiscovery {
    servers: Vec<CatalogServerConfig>,
}

impl CatalogEndpointDiscovery {
    pub fn new(servers: Vec<CatalogServerConfig>) -> Self {
        Self { servers }
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Finds the server answering at `target`, by url host or by resolved
    /// address, and port.
    fn find(&self, target: &DiscoveryTarget) -> Option<&CatalogServerConfig> {
        let host = target.url.host_str().unwrap_or_default();
        let port = target.url.port().unwrap_or(DEFAULT_OPCUA_PORT);
        let address = target.address.ip().to_string();

        self.servers.iter().find(|server| {
            let Ok(url) = Url::parse(&server.discovery_url) else {
                return false;
            };
            let Some(server_host) = url.host_str() else {
                return false;
            };
            let server_port = url.port().unwrap_or(DEFAULT_OPCUA_PORT);
            server_port == port
                && (server_host.eq_ignore_ascii_case(host) || server_host == address)
        })
    }
}

fn describe(
    server: &CatalogServerConfig,
    endpoint: &CatalogEndpointConfig,
    accessible_url: &str,
) -> DiscoveredEndpointModel {
    DiscoveredEndpointModel {
        description: EndpointDescriptionModel {
            endpoint_url: endpoint
                .endpoint_url
                .clone()
                .unwrap_or_else(|| server.discovery_url.clone()),
            server: server.application.clone(),
            server_certificate: None,
            security_mode: endpoint.security_mode,
            security_policy_uri: endpoint.security_policy_uri.clone(),
            security_level: endpoint.security_level,
            user_identity_tokens: endpoint.user_identity_tokens.clone(),
        },
        accessible_endpoint_url: accessible_url.to_string(),
        capabilities: BTreeSet::new(),
    }
}

#[async_trait]
impl EndpointDiscovery for CatalogEndpointDiscovery {
    async fn find_endpoints(
        &self,
        target: &DiscoveryTarget,
        _locales: &[String],
        token: &CancellationToken,
    ) -> Result<Vec<DiscoveredEndpointModel>> {
        if token.is_cancelled() {
            return Err(anyhow!("Endpoint discovery cancelled"));
        }
        let server = self
            .find(target)
            .ok_or_else(|| anyhow!("No server answering at {}", target))?;

        let accessible_url = target.url.as_str();
        let endpoints: Vec<_> = if server.endpoints.is_empty() {
            vec![describe(
                server,
                &CatalogEndpointConfig::default(),
                accessible_url,
            )]
        } else {
            server
                .endpoints
                .iter()
                .map(|endpoint| describe(server, endpoint, accessible_url))
                .collect()
        };
        debug!(
            url = accessible_url,
            application_uri = %server.application.application_uri,
            endpoints = endpoints.len(),
            "Catalog server answered"
        );
        Ok(endpoints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uascout_core::{ApplicationDescriptionModel, SecurityMode};

    fn server(url: &str, modes: &[SecurityMode]) -> CatalogServerConfig {
        CatalogServerConfig {
            discovery_url: url.to_string(),
            application: ApplicationDescriptionModel {
                application_uri: "urn:catalog:plc".to_string(),
                ..Default::default()
            },
            endpoints: modes
                .iter()
                .map(|mode| CatalogEndpointConfig {
                    security_mode: *mode,
                    ..Default::default()
                })
                .collect(),
        }
    }

    fn target(url: &str, address: &str) -> DiscoveryTarget {
        DiscoveryTarget {
            url: Url::parse(url).unwrap(),
            address: address.parse().unwrap(),
        }
    }

    #[tokio::test]
    async fn test_matches_by_host_or_address() {
        let catalog = CatalogEndpointDiscovery::new(vec![server(
            "opc.tcp://plc.local:4840",
            &[SecurityMode::None, SecurityMode::Sign],
        )]);
        let token = CancellationToken::new();

        let by_host = catalog
            .find_endpoints(&target("opc.tcp://PLC.local:4840", "10.0.0.9:4840"), &[], &token)
            .await
            .unwrap();
        assert_eq!(by_host.len(), 2);
        assert_eq!(by_host[1].description.security_mode, SecurityMode::Sign);
        assert_eq!(by_host[0].accessible_endpoint_url, "opc.tcp://PLC.local:4840");

        let wrong_port = catalog
            .find_endpoints(&target("opc.tcp://plc.local:4841", "10.0.0.9:4841"), &[], &token)
            .await;
        assert!(wrong_port.is_err());
    }

    #[tokio::test]
    async fn test_server_without_endpoints_offers_default() {
        let catalog =
            CatalogEndpointDiscovery::new(vec![server("opc.tcp://10.0.0.7", &[])]);
        let endpoints = catalog
            .find_endpoints(
                &target("opc.tcp://10.0.0.7:4840", "10.0.0.7:4840"),
                &[],
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(endpoints.len(), 1);
        assert_eq!(endpoints[0].description.security_mode, SecurityMode::None);
        assert_eq!(endpoints[0].description.endpoint_url, "opc.tcp://10.0.0.7");
    }
}
