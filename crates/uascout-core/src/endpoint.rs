//! Raw endpoint descriptions as returned by a server, and their conversion
//! into registry models.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::identity;
use crate::registry::{
    ApplicationInfoModel, ApplicationRegistrationModel, ApplicationType, CredentialType,
    EndpointInfoModel, SecurityMode, Visibility,
};

/// Application description reported by a server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationDescriptionModel {
    pub application_uri: String,

    #[serde(default)]
    pub application_type: ApplicationType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_uri: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_server_uri: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovery_profile_uri: Option<String>,

    #[serde(default)]
    pub discovery_urls: Vec<String>,
}

/// Endpoint description reported by a server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointDescriptionModel {
    pub endpoint_url: String,

    pub server: ApplicationDescriptionModel,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_certificate: Option<Vec<u8>>,

    pub security_mode: SecurityMode,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_policy_uri: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_level: Option<i32>,

    #[serde(default)]
    pub user_identity_tokens: Vec<CredentialType>,
}

/// An endpoint returned by endpoint discovery.
///
/// `accessible_endpoint_url` is the url under which the endpoint was actually
/// reached, which can differ from the url the server advertises.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredEndpointModel {
    pub description: EndpointDescriptionModel,

    pub accessible_endpoint_url: String,

    #[serde(default)]
    pub capabilities: BTreeSet<String>,
}

impl ApplicationRegistrationModel {
    /// Converts a discovered endpoint into a registration tagged with the
    /// discoverer identity.
    ///
    /// Returns `None` if the server did not report an application uri.
    pub fn from_discovered(
        discovered: &DiscoveredEndpointModel,
        discovery_url: &str,
        host_address: &str,
        site_id: Option<&str>,
        discoverer_id: &str,
    ) -> Option<Self> {
        let description = &discovered.description;
        let server = &description.server;
        let site_or_gateway = identity::site_or_gateway_id(site_id, discoverer_id);

        let application_id = identity::application_id(
            Some(site_or_gateway),
            &server.application_uri,
            server.application_type,
        )?;

        let mut discovery_urls: BTreeSet<String> = server.discovery_urls.iter().cloned().collect();
        discovery_urls.insert(discovery_url.to_string());

        let application = ApplicationInfoModel {
            application_id: application_id.clone(),
            application_type: server.application_type,
            application_uri: server.application_uri.clone(),
            product_uri: server.product_uri.clone(),
            application_name: server.application_name.clone(),
            locale: server.locale.clone(),
            capabilities: discovered.capabilities.clone(),
            discovery_urls,
            discovery_profile_uri: server.discovery_profile_uri.clone(),
            host_addresses: BTreeSet::from([host_address.to_string()]),
            gateway_server_uri: server.gateway_server_uri.clone(),
            certificate: description.server_certificate.clone(),
            discoverer_id: Some(discoverer_id.to_string()),
            site_id: site_id.map(str::to_string),
            visibility: Visibility::Found,
            not_seen_since: None,
            created: None,
            updated: None,
            generation_id: None,
        };

        let mut alternative_urls = BTreeSet::new();
        if !description
            .endpoint_url
            .eq_ignore_ascii_case(&discovered.accessible_endpoint_url)
        {
            alternative_urls.insert(description.endpoint_url.clone());
        }

        let endpoint = EndpointInfoModel {
            id: identity::endpoint_id(
                &discovered.accessible_endpoint_url,
                &application_id,
                Some(description.security_mode),
                description.security_policy_uri.as_deref(),
            ),
            application_id,
            endpoint_url: discovered.accessible_endpoint_url.clone(),
            alternative_urls,
            security_mode: Some(description.security_mode),
            security_policy: description.security_policy_uri.clone(),
            security_level: description.security_level,
            authentication_methods: description.user_identity_tokens.clone(),
            certificate_thumbprint: description
                .server_certificate
                .as_deref()
                .map(identity::certificate_thumbprint),
            discoverer_id: Some(discoverer_id.to_string()),
            site_id: site_id.map(str::to_string),
            visibility: Visibility::Found,
            not_seen_since: None,
            generation_id: None,
        };

        Some(Self {
            application,
            endpoints: vec![endpoint],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn discovered(uri: &str, advertised: &str, accessible: &str) -> DiscoveredEndpointModel {
        DiscoveredEndpointModel {
            description: EndpointDescriptionModel {
                endpoint_url: advertised.to_string(),
                server: ApplicationDescriptionModel {
                    application_uri: uri.to_string(),
                    application_name: Some("PLC".to_string()),
                    ..Default::default()
                },
                server_certificate: Some(vec![1, 2, 3]),
                security_mode: SecurityMode::SignAndEncrypt,
                security_policy_uri: Some(
                    "http://opcfoundation.org/UA/SecurityPolicy#Basic256Sha256".to_string(),
                ),
                security_level: Some(3),
                user_identity_tokens: vec![CredentialType::None, CredentialType::UserName],
            },
            accessible_endpoint_url: accessible.to_string(),
            capabilities: BTreeSet::new(),
        }
    }

    #[test]
    fn test_conversion_tags_discoverer() {
        let ep = discovered("urn:plc", "opc.tcp://plc:4840", "opc.tcp://10.0.0.5:4840");
        let reg = ApplicationRegistrationModel::from_discovered(
            &ep,
            "opc.tcp://10.0.0.5:4840",
            "10.0.0.5",
            None,
            "gw_module_disc",
        )
        .unwrap();

        assert_eq!(
            reg.application.application_id,
            identity::application_id(Some("gw"), "urn:plc", ApplicationType::Server).unwrap()
        );
        assert_eq!(reg.application.discoverer_id.as_deref(), Some("gw_module_disc"));
        assert!(reg.application.host_addresses.contains("10.0.0.5"));
        assert!(reg
            .application
            .discovery_urls
            .contains("opc.tcp://10.0.0.5:4840"));

        let endpoint = &reg.endpoints[0];
        assert_eq!(endpoint.application_id, reg.application.application_id);
        assert_eq!(endpoint.endpoint_url, "opc.tcp://10.0.0.5:4840");
        assert!(endpoint.alternative_urls.contains("opc.tcp://plc:4840"));
        assert!(endpoint.certificate_thumbprint.is_some());
        assert_eq!(endpoint.authentication_methods.len(), 2);
    }

    #[test]
    fn test_conversion_requires_application_uri() {
        let ep = discovered("", "opc.tcp://plc:4840", "opc.tcp://plc:4840");
        assert!(ApplicationRegistrationModel::from_discovered(
            &ep,
            "opc.tcp://plc:4840",
            "10.0.0.5",
            Some("site"),
            "gw"
        )
        .is_none());
    }
}
