//! Registry models for discovered applications and endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::discovery::OperationContextModel;

/// Visibility of a registry entity as seen by its discoverer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Unknown,
    Found,
    Lost,
}

/// OPC UA application type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ApplicationType {
    #[default]
    Server,
    Client,
    ClientAndServer,
    DiscoveryServer,
}

impl fmt::Display for ApplicationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ApplicationType::Server => "Server",
            ApplicationType::Client => "Client",
            ApplicationType::ClientAndServer => "ClientAndServer",
            ApplicationType::DiscoveryServer => "DiscoveryServer",
        };
        f.write_str(s)
    }
}

/// Message security mode of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SecurityMode {
    Best,
    Sign,
    SignAndEncrypt,
    None,
}

impl fmt::Display for SecurityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SecurityMode::Best => "Best",
            SecurityMode::Sign => "Sign",
            SecurityMode::SignAndEncrypt => "SignAndEncrypt",
            SecurityMode::None => "None",
        };
        f.write_str(s)
    }
}

/// User authentication method offered by an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CredentialType {
    None,
    UserName,
    X509Certificate,
    JwtToken,
}

/// A discovered OPC UA application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationInfoModel {
    /// Content derived application id
    pub application_id: String,

    #[serde(default)]
    pub application_type: ApplicationType,

    pub application_uri: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_uri: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,

    #[serde(default)]
    pub capabilities: BTreeSet<String>,

    #[serde(default)]
    pub discovery_urls: BTreeSet<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovery_profile_uri: Option<String>,

    #[serde(default)]
    pub host_addresses: BTreeSet<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_server_uri: Option<String>,

    /// DER encoded application certificate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<Vec<u8>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discoverer_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_id: Option<String>,

    #[serde(default)]
    pub visibility: Visibility,

    /// Set while the application is lost
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_seen_since: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<OperationContextModel>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<OperationContextModel>,

    /// Storage generation used for optimistic concurrency
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_id: Option<String>,
}

impl ApplicationInfoModel {
    /// Returns true if the application is marked lost.
    pub fn is_lost(&self) -> bool {
        self.visibility == Visibility::Lost
    }

    /// Marks the application found. Returns true if anything changed.
    pub fn mark_found(&mut self) -> bool {
        let changed = self.visibility != Visibility::Found || self.not_seen_since.is_some();
        self.visibility = Visibility::Found;
        self.not_seen_since = None;
        changed
    }

    /// Marks the application lost unless it already is. Returns true if
    /// anything changed.
    pub fn mark_lost(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_lost() {
            return false;
        }
        self.visibility = Visibility::Lost;
        self.not_seen_since = Some(now);
        true
    }

    /// Copies the fields a rediscovery may change from `other`.
    ///
    /// Identity fields (id, uri, type, discoverer) are left alone. Returns
    /// true if any field changed.
    pub fn patch_from(&mut self, other: &ApplicationInfoModel) -> bool {
        let mut changed = false;
        macro_rules! patch {
            ($field:ident) => {
                if self.$field != other.$field {
                    self.$field = other.$field.clone();
                    changed = true;
                }
            };
        }
        patch!(product_uri);
        patch!(application_name);
        patch!(locale);
        patch!(capabilities);
        patch!(discovery_urls);
        patch!(discovery_profile_uri);
        patch!(host_addresses);
        patch!(gateway_server_uri);
        patch!(certificate);
        patch!(site_id);
        changed
    }

    /// Unions the discovery urls, host addresses and capabilities of `other`
    /// into this application.
    pub fn union_from(&mut self, other: &ApplicationInfoModel) {
        self.discovery_urls
            .extend(other.discovery_urls.iter().cloned());
        self.host_addresses
            .extend(other.host_addresses.iter().cloned());
        self.capabilities.extend(other.capabilities.iter().cloned());
    }
}

/// A discovered endpoint of an application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointInfoModel {
    /// Content derived endpoint id
    pub id: String,

    pub application_id: String,

    pub endpoint_url: String,

    #[serde(default)]
    pub alternative_urls: BTreeSet<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_mode: Option<SecurityMode>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_policy: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_level: Option<i32>,

    #[serde(default)]
    pub authentication_methods: Vec<CredentialType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_thumbprint: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discoverer_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_id: Option<String>,

    #[serde(default)]
    pub visibility: Visibility,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_seen_since: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_id: Option<String>,
}

impl EndpointInfoModel {
    pub fn is_lost(&self) -> bool {
        self.visibility == Visibility::Lost
    }

    pub fn mark_found(&mut self) -> bool {
        let changed = self.visibility != Visibility::Found || self.not_seen_since.is_some();
        self.visibility = Visibility::Found;
        self.not_seen_since = None;
        changed
    }

    pub fn mark_lost(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_lost() {
            return false;
        }
        self.visibility = Visibility::Lost;
        self.not_seen_since = Some(now);
        true
    }

    /// Copies mutable endpoint fields from `other`. Returns true on change.
    pub fn patch_from(&mut self, other: &EndpointInfoModel) -> bool {
        let mut changed = false;
        macro_rules! patch {
            ($field:ident) => {
                if self.$field != other.$field {
                    self.$field = other.$field.clone();
                    changed = true;
                }
            };
        }
        patch!(endpoint_url);
        patch!(alternative_urls);
        patch!(security_level);
        patch!(authentication_methods);
        patch!(certificate_thumbprint);
        patch!(application_id);
        patch!(site_id);
        changed
    }
}

/// An application together with the endpoints discovered for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationRegistrationModel {
    pub application: ApplicationInfoModel,

    #[serde(default)]
    pub endpoints: Vec<EndpointInfoModel>,
}

impl ApplicationRegistrationModel {
    /// Merges another registration of the same application.
    ///
    /// Discovery urls and host addresses are unioned. Endpoints with the same
    /// id are replaced in place, new ones appended in order.
    pub fn merge(&mut self, other: ApplicationRegistrationModel) {
        self.application.union_from(&other.application);
        for endpoint in other.endpoints {
            match self.endpoints.iter_mut().find(|e| e.id == endpoint.id) {
                Some(existing) => *existing = endpoint,
                None => self.endpoints.push(endpoint),
            }
        }
    }
}
