//! # uascout
//!
//! OPC UA server discovery service: scans the local network for OPC UA
//! servers, asks them for their endpoints and keeps a registry of what was
//! found, marking servers that disappear as lost.
//!
//! The binary wires the workspace crates together:
//! - `uascout-discovery` runs discovery requests and the periodic scan
//! - [`forwarder::ResultForwarder`] hands each result batch to the reconciler
//! - `uascout-registry` merges the batches into the registry
//! - [`catalog::CatalogEndpointDiscovery`] answers endpoint discovery from
//!   the configured server catalog

pub mod app;
pub mod catalog;
pub mod forwarder;

pub use app::{App, AppBuilder};
pub use catalog::CatalogEndpointDiscovery;
pub use forwarder::ResultForwarder;
