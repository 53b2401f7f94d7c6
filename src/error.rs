//! Error types for Codecell

use thiserror::Error;

/// Result type alias using Codecell's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Codecell
#[derive(Error, Debug)]
pub enum Error {
    /// Path escapes the workspace (absolute, traversal, symlink)
    #[error("Path violation: {0}")]
    PathViolation(String),

    /// Language not handled by any backend
    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    /// Write would push the tenant past its storage ceiling
    #[error("Storage quota exceeded: {used} bytes used, {requested} requested, limit {limit} bytes")]
    QuotaExceeded {
        used: u64,
        requested: u64,
        limit: u64,
    },

    /// File extension is not on the write allow-list
    #[error("File extension not allowed: {0}")]
    ExtensionNotAllowed(String),

    /// File content exceeds the per-file size ceiling
    #[error("File too large: {size} bytes exceeds limit of {limit} bytes")]
    FileTooLarge { size: u64, limit: u64 },

    /// No execution backend may be used
    #[error("Execution backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Docker/container error
    #[error("Container error: {0}")]
    Container(String),

    /// Credential lookup or decryption error
    #[error("Credential error: {0}")]
    Credential(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Check if error was raised by a security guard
    pub fn is_security_violation(&self) -> bool {
        matches!(self, Error::PathViolation(_) | Error::BackendUnavailable(_))
    }

    /// Check if error is a client error (caller's fault)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::PathViolation(_)
                | Error::UnsupportedLanguage(_)
                | Error::QuotaExceeded { .. }
                | Error::ExtensionNotAllowed(_)
                | Error::FileTooLarge { .. }
                | Error::InvalidInput(_)
                | Error::NotFound(_)
        )
    }

    /// Message safe to hand back to the calling principal.
    ///
    /// Backend-internal failures collapse to a generic sentence so host
    /// paths, container ids and SQL never leak out of the engine.
    pub fn public_message(&self) -> String {
        match self {
            Error::Database(_) => "Storage backend error".to_string(),
            Error::Container(_) => "Execution backend error".to_string(),
            Error::Credential(_) => "Credential resolution error".to_string(),
            Error::Io(e) => format!("I/O error: {}", e.kind()),
            Error::Config(_) => "Server configuration error".to_string(),
            Error::Internal(_) => "Internal error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<bollard::errors::Error> for Error {
    fn from(err: bollard::errors::Error) -> Self {
        Error::Container(err.to_string())
    }
}
