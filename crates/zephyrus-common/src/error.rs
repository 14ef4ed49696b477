//! Error types shared across Zephyrus crates

use thiserror::Error;

/// Result type alias for Zephyrus operations
pub type Result<T> = std::result::Result<T, ZephyrusError>;

/// Failures that are not specific to one pipeline stage
#[derive(Error, Debug)]
pub enum ZephyrusError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Directory not found: {0}")]
    DirectoryNotFound(String),
}

impl ZephyrusError {
    /// Shorthand for configuration errors built from any displayable value
    pub fn config(message: impl std::fmt::Display) -> Self {
        ZephyrusError::Config(message.to_string())
    }
}
