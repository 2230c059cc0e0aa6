//! Error types for Courier requests.

use thiserror::Error;

/// Errors that can occur while building or encoding requests.
#[derive(Debug, Error)]
pub enum TypesError {
    /// JSON serialization failed
    #[error("serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),

    /// JSON deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialization(#[source] serde_json::Error),

    /// A field required to build the request was not set
    #[error("missing required field: {0}")]
    MissingField(&'static str),
}
