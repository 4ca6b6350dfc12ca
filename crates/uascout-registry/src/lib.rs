//! # uascout registry
//!
//! Registry of discovered OPC UA applications and endpoints.
//!
//! - [`Repository`]: entity storage with optimistic concurrency
//! - [`InMemoryRepository`]: `DashMap` backed store
//! - [`DiscoveryReconciler`]: merges one discovery run into the registry,
//!   flipping entities between `Found` and `Lost`

pub mod error;
pub mod memory;
pub mod reconciler;
pub mod repository;

pub use error::{RegistryError, Result};
pub use memory::InMemoryRepository;
pub use reconciler::{DiscoveryReconciler, ReconcileSummary};
pub use repository::{update_with, Entity, Repository, DEFAULT_MAX_UPDATE_RETRIES};
