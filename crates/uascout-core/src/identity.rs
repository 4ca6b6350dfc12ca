//! Content derived identifiers.
//!
//! Applications and endpoints are keyed by a hash of their logical content so
//! that the same server seen in two discovery runs maps to the same registry
//! entry. URIs and URLs are compared case-insensitively.

use sha2::{Digest, Sha256};

use crate::registry::{ApplicationType, SecurityMode};

/// Prefix of server application ids
pub const SERVER_ID_PREFIX: &str = "uas";

/// Prefix of client application ids
pub const CLIENT_ID_PREFIX: &str = "uac";

/// Prefix of endpoint ids
pub const ENDPOINT_ID_PREFIX: &str = "uat";

const MODULE_SEPARATOR: &str = "_module_";

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Derives the application id.
///
/// Returns `None` when the application uri is empty, since such an application
/// cannot be joined across runs.
pub fn application_id(
    site_or_gateway_id: Option<&str>,
    application_uri: &str,
    application_type: ApplicationType,
) -> Option<String> {
    let uri = application_uri.trim();
    if uri.is_empty() {
        return None;
    }
    let prefix = match application_type {
        ApplicationType::Client => CLIENT_ID_PREFIX,
        _ => SERVER_ID_PREFIX,
    };
    let input = format!(
        "{}-{}-{}",
        site_or_gateway_id.unwrap_or_default(),
        application_type,
        uri.to_lowercase()
    );
    Some(format!("{}{}", prefix, sha256_hex(&input)))
}

/// Derives the endpoint id from the endpoint url, owning application and
/// security settings.
pub fn endpoint_id(
    endpoint_url: &str,
    application_id: &str,
    security_mode: Option<SecurityMode>,
    security_policy: Option<&str>,
) -> String {
    let input = format!(
        "{}-{}-{}-{}",
        endpoint_url.trim().to_lowercase(),
        application_id,
        security_mode.unwrap_or(SecurityMode::Best),
        security_policy.unwrap_or_default().to_lowercase()
    );
    format!("{}{}", ENDPOINT_ID_PREFIX, sha256_hex(&input))
}

/// Returns the gateway component of a discoverer id.
///
/// Discoverer ids have the shape `<gateway>_module_<module>`; an id without a
/// module part is its own gateway.
pub fn gateway_id(discoverer_id: &str) -> &str {
    match discoverer_id.find(MODULE_SEPARATOR) {
        Some(pos) => &discoverer_id[..pos],
        None => discoverer_id,
    }
}

/// Returns the site id if set, otherwise the gateway of the discoverer.
pub fn site_or_gateway_id<'a>(site_id: Option<&'a str>, discoverer_id: &'a str) -> &'a str {
    match site_id {
        Some(site) if !site.is_empty() => site,
        _ => gateway_id(discoverer_id),
    }
}

/// Thumbprint of a DER encoded certificate, upper case hex.
pub fn certificate_thumbprint(certificate: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(certificate);
    hex::encode_upper(hasher.finalize())
}
