use thiserror::Error;

use crate::transport::{CallKind, TransportError};

/// Main error type for the hub synchronizer
#[derive(Error, Debug)]
pub enum HubError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Hub availability errors
    #[error("Hub service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Dataset for model {model_id} is not ready yet, it may still be processing")]
    DatasetNotReady { model_id: String },

    #[error("Model not found on hub: {model_id}")]
    ModelNotFound { model_id: String },

    // Local preconditions
    #[error(
        "Insufficient disk space: dataset needs {required_bytes} bytes, {available_bytes} bytes free"
    )]
    InsufficientDiskSpace {
        required_bytes: u64,
        available_bytes: u64,
    },

    // Transport errors
    #[error("{call} failed after {attempts} attempts: {last}")]
    TransportExhausted {
        call: CallKind,
        attempts: u32,
        #[source]
        last: TransportError,
    },

    #[error("{call} rejected: {source}")]
    TransportPermanent {
        call: CallKind,
        #[source]
        source: TransportError,
    },

    #[error("Final checkpoint upload for epoch {epoch} failed, trained weights were not delivered: {source}")]
    FinalUploadFailed {
        epoch: u32,
        #[source]
        source: Box<HubError>,
    },

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Authentication errors
    #[error("Authentication error: {0}")]
    Auth(String),

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl HubError {
    /// True when the failure was a connection-level problem reaching the hub.
    pub fn is_unreachable(&self) -> bool {
        match self {
            HubError::ServiceUnavailable(_) => true,
            HubError::TransportExhausted { last, .. } => last.is_connection_level(),
            _ => false,
        }
    }
}

/// Result type alias for HubError
pub type Result<T> = std::result::Result<T, HubError>;
