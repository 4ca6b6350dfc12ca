//! Error types for the registry

use thiserror::Error;

/// Result type alias for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Errors that can occur in registry operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The entity does not exist
    #[error("Resource '{id}' not found")]
    ResourceNotFound { id: String },

    /// An entity with the same id already exists
    #[error("Resource '{id}' already exists")]
    ResourceConflict { id: String },

    /// The entity was changed since it was read
    #[error("Resource '{id}' is out of date")]
    ResourceOutOfDate { id: String },

    /// A read-modify-write kept losing against concurrent writers
    #[error("Giving up on '{id}' after {attempts} conflicting updates")]
    RetriesExhausted { id: String, attempts: usize },

    /// The storage backend failed
    #[error("Storage error: {0}")]
    Storage(String),
}

impl RegistryError {
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::ResourceNotFound { id: id.into() }
    }

    pub fn conflict(id: impl Into<String>) -> Self {
        Self::ResourceConflict { id: id.into() }
    }

    pub fn out_of_date(id: impl Into<String>) -> Self {
        Self::ResourceOutOfDate { id: id.into() }
    }

    /// Returns true for errors a retry may resolve.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ResourceOutOfDate { .. })
    }
}
