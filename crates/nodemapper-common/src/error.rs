//! Unified error types for the nodemapper workspace.
//!
//! Transient per-process failures are logged and skipped by the callers;
//! only failures that must reach the orchestrator surface through this type.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum MapperError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// Kernel-provided data could not be parsed.
    #[error("failed to parse {what}: {message}")]
    Parse {
        /// Kind of data being parsed.
        what: &'static str,
        /// Description of the parse failure.
        message: String,
    },

    /// A live packet capture could not be opened or configured.
    #[error("capture on device '{device}' failed: {message}")]
    Capture {
        /// Capture device name.
        device: String,
        /// Description of the capture failure.
        message: String,
    },

    /// Shipping results to the mapper failed.
    #[error("report failed: {message}")]
    Report {
        /// Description of the report failure.
        message: String,
    },

    /// A metric could not be registered or encoded.
    #[error("metrics error: {message}")]
    Metrics {
        /// Description of the metrics failure.
        message: String,
    },

    /// An HTTP endpoint could not be bound or served.
    #[error("server on {address} failed: {message}")]
    Server {
        /// Listen address.
        address: String,
        /// Description of the server failure.
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl MapperError {
    /// Builds an [`MapperError::Io`] for the given path.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Builds a [`MapperError::Parse`] for the given kind of data.
    pub fn parse(what: &'static str, message: impl Into<String>) -> Self {
        Self::Parse {
            what,
            message: message.into(),
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, MapperError>;
