//! Error types for scrib-core

use thiserror::Error;

/// Result type alias using scrib-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in scrib-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Local durable storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Remote transport error
    #[error("Transport error: {0}")]
    Transport(String),

    /// HTTP error from the remote key-value store
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Document not found
    #[error("Document not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
