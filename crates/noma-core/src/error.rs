//! Error types for the noma screening pipeline.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for the noma screening pipeline.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration, unsupported backbone or too few classes
    #[error("Configuration error: {0}")]
    Config(String),

    /// Dataset root missing, empty or inconsistent between splits
    #[error("Data discovery error: {0}")]
    DataDiscovery(String),

    /// Image decoding or processing failed
    #[error("Image processing error: {0}")]
    Image(String),

    /// Checkpoint missing, unreadable or malformed
    #[error("Checkpoint error ({}): {reason}", path.display())]
    Checkpoint { path: PathBuf, reason: String },

    /// Class index mapping missing or malformed
    #[error("Class map error ({}): {reason}", path.display())]
    ClassMap { path: PathBuf, reason: String },

    /// Model construction or record loading failed
    #[error("Model error: {0}")]
    Model(String),

    /// Training loop failure
    #[error("Training error: {0}")]
    Training(String),

    /// Export failure
    #[error("Export error: {0}")]
    Export(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    pub fn checkpoint(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::Checkpoint {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn class_map(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::ClassMap {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Error::Image(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

/// Specialized Result type for noma pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;
