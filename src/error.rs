use std::time::Duration;

use thiserror::Error;

/// Main error type for the PrismCat proxy.
#[derive(Error, Debug, Clone)]
pub enum PrismError {
    /// Configuration related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Timeout errors
    #[error("Operation timed out after {duration:?}: {operation}")]
    Timeout {
        duration: Duration,
        operation: String,
    },

    /// Database errors
    #[error("Database error: {message}")]
    Database { message: String },

    /// File system errors
    #[error("File system error: {message}")]
    FileSystem { message: String },

    /// Blob store: well-formed ref with no object behind it
    #[error("blob not found")]
    BlobNotFound,

    /// Blob store: malformed content address
    #[error("invalid blob ref")]
    InvalidBlobRef,

    /// Blob store: ref names a hash algorithm other than sha256
    #[error("unsupported blob hash algorithm")]
    UnsupportedBlobAlgo,

    /// Async stage: bounded queue was full and the record was dropped
    #[error("record queue full; dropped")]
    QueueFull,

    /// Async stage: save after close was initiated
    #[error("record queue closed")]
    QueueClosed,

    /// Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl PrismError {
    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(duration: Duration, operation: S) -> Self {
        Self::Timeout {
            duration,
            operation: operation.into(),
        }
    }

    /// Create a database error
    pub fn database<S: Into<String>>(message: S) -> Self {
        Self::Database {
            message: message.into(),
        }
    }

    /// Create a file system error
    pub fn file_system<S: Into<String>>(message: S) -> Self {
        Self::FileSystem {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// Result type alias for PrismCat operations
pub type PrismResult<T> = Result<T, PrismError>;

impl From<std::io::Error> for PrismError {
    fn from(err: std::io::Error) -> Self {
        PrismError::file_system(format!("IO error: {}", err))
    }
}

impl From<sqlx::Error> for PrismError {
    fn from(err: sqlx::Error) -> Self {
        PrismError::database(format!("Database error: {}", err))
    }
}

impl From<serde_json::Error> for PrismError {
    fn from(err: serde_json::Error) -> Self {
        PrismError::internal(format!("JSON serialization error: {}", err))
    }
}
