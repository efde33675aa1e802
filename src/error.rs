//! Error types for the env-injector webhook

use thiserror::Error;

/// Main error type for env-injector operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Injection config could not be read or parsed
    #[error("config error: {0}")]
    Config(String),

    /// Namespace lookup failed for a reason other than an API error
    #[error("namespace lookup error: {0}")]
    Lookup(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// JSON patch could not be attached to the admission response
    #[error("patch error: {0}")]
    Patch(String),

    /// Inbound AdmissionReview envelope could not be decoded
    #[error("invalid admission review: {0}")]
    Envelope(String),
}

impl Error {
    /// Create a config error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a namespace lookup error with the given message
    pub fn lookup(msg: impl Into<String>) -> Self {
        Self::Lookup(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a patch error with the given message
    pub fn patch(msg: impl Into<String>) -> Self {
        Self::Patch(msg.into())
    }

    /// Create an envelope decode error with the given message
    pub fn envelope(msg: impl Into<String>) -> Self {
        Self::Envelope(msg.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
