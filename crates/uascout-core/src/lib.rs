//! # uascout core
//!
//! Data model, identity derivation, errors and configuration shared by the
//! uascout crates.
//!
//! - **Discovery models**: requests, scan configuration and discovery modes
//! - **Registry models**: applications and endpoints with their visibility
//! - **Identity**: content derived application and endpoint ids
//! - **Configuration**: YAML configuration with environment overrides
//!
//! ## Example
//!
//! ```
//! use uascout_core::identity;
//! use uascout_core::registry::ApplicationType;
//!
//! let a = identity::application_id(Some("site"), "urn:PLC", ApplicationType::Server);
//! let b = identity::application_id(Some("site"), "urn:plc", ApplicationType::Server);
//! assert_eq!(a, b);
//! ```

pub mod config;
pub mod discovery;
pub mod endpoint;
pub mod error;
pub mod identity;
pub mod registry;
pub mod result;

pub use config::AppConfig;
pub use discovery::{
    DiscoveryCancelModel, DiscoveryConfigModel, DiscoveryMode, DiscoveryRequestModel,
    OperationContextModel, ServerRegistrationRequestModel,
};
pub use endpoint::{ApplicationDescriptionModel, DiscoveredEndpointModel, EndpointDescriptionModel};
pub use error::{ConfigError, CoreError, ParseError, Result};
pub use registry::{
    ApplicationInfoModel, ApplicationRegistrationModel, ApplicationType, CredentialType,
    EndpointInfoModel, SecurityMode, Visibility,
};
pub use result::{DiscoveryResultInfoModel, DiscoveryResultModel};
