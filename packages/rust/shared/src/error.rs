//! Error types for docchat.
//!
//! Library crates use [`DocChatError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all docchat operations.
#[derive(Debug, thiserror::Error)]
pub enum DocChatError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Transport failure or non-2xx response from a collaborator service.
    #[error("network error calling {endpoint}: {message}")]
    Network { endpoint: String, message: String },

    /// A remote call exceeded its time budget.
    #[error("{endpoint} call timed out after {millis}ms")]
    Timeout { endpoint: String, millis: u64 },

    /// A remote call was cancelled by its caller.
    #[error("{endpoint} call cancelled")]
    Cancelled { endpoint: String },

    /// The conversion service failed or returned unusable data.
    #[error("conversion error: {0}")]
    Conversion(String),

    /// Persisting converted content failed after a successful conversion.
    #[error("storage error: {0}")]
    Storage(String),

    /// No cached content for a document id.
    #[error("document not found: {id}")]
    NotFound { id: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Input validation error (empty upload, malformed endpoint, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, DocChatError>;

impl DocChatError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a network error tagged with the endpoint that failed.
    pub fn network(endpoint: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Network {
            endpoint: endpoint.into(),
            message: msg.into(),
        }
    }

    /// Create a not-found error for a document id.
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True for failures of the remote call itself (transport, HTTP status, timeout).
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Timeout { .. })
    }

    /// True when the caller cancelled the operation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}
