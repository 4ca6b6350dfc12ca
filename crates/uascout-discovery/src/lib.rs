//! # uascout discovery
//!
//! Discovery engine for OPC UA servers on the local network.
//!
//! # Architecture
//!
//! [`DiscoveryServices`] owns a bounded request queue drained by a single
//! background worker, so discovery runs never overlap. Each run:
//! 1. Resolves the declared discovery urls
//! 2. Scans the address ranges for responsive hosts (scanning modes only)
//! 3. Scans the responsive hosts for open ports
//! 4. Asks every candidate url for its endpoints through [`EndpointDiscovery`]
//! 5. Publishes the merged registrations through [`DiscoveryResultHandler`]
//!
//! A standing scan configuration is resubmitted by a one-shot timer that is
//! re-armed only after the previous scan completed.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use uascout_core::{DiscoveryConfigModel, DiscoveryMode};
//! use uascout_discovery::{
//!     DiscovererIdentity, DiscoveryResultHandler, DiscoveryServices, EndpointDiscovery,
//! };
//!
//! async fn run(
//!     endpoints: Arc<dyn EndpointDiscovery>,
//!     results: Arc<dyn DiscoveryResultHandler>,
//! ) -> anyhow::Result<()> {
//!     let services = DiscoveryServices::builder(DiscovererIdentity::new("gateway_module_discovery"))
//!         .endpoint_discovery(endpoints)
//!         .result_handler(results)
//!         .build()?;
//!
//!     services
//!         .configure(DiscoveryMode::Fast, DiscoveryConfigModel::default())
//!         .await;
//!     services.scan();
//!
//!     services.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod handlers;
pub mod metrics;
pub mod progress;
pub mod request;
pub mod runner;
pub mod services;
mod timer;

pub use error::{DiscoveryError, Result};
pub use handlers::{DiscoveryResultHandler, DiscoveryTarget, EndpointDiscovery};
pub use metrics::{DiscoveryMetrics, DiscoveryStats};
pub use progress::{
    ChannelProgress, DiscoveryProgress, DiscoveryProgressModel, DiscoveryProgressType,
    LoggingProgress, ProgressFanOut, PROGRESS_CHANNEL_CAPACITY,
};
pub use request::{DiscoveryRequest, ScanEnvironment};
pub use runner::{DiscovererIdentity, DEFAULT_OPCUA_PORT};
pub use services::{DiscoveryServices, DiscoveryServicesBuilder, DiscoveryServicesConfig};
