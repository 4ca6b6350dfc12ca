//! Error types for the discovery services

use thiserror::Error;

/// Result type alias for discovery operations
pub type Result<T> = std::result::Result<T, DiscoveryError>;

/// Errors that can occur during discovery
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The request queue is full or closed
    #[error("Discovery request '{request_id}' rejected: {reason}")]
    ResourceExhausted { request_id: String, reason: String },

    /// Results could not be handed to the result handler
    #[error("Failed to publish discovery results: {0}")]
    Publish(String),

    /// A required collaborator was not supplied
    #[error("Missing discovery collaborator: {0}")]
    MissingCollaborator(&'static str),

    /// Generic error
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}
