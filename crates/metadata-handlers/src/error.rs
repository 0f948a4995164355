//! Error types for handler internals
//!
//! These never cross the handler boundary — `MetadataHandler::write` folds
//! them into the success flag after logging — but the fallible constructors
//! (database open, schema bootstrap) surface them to the caller.

use thiserror::Error;

/// Result type alias using HandlerError
pub type Result<T> = std::result::Result<T, HandlerError>;

/// Errors internal to the bundled handlers
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The target file is not in the expected container format
    #[error("unsupported container: {0}")]
    UnsupportedContainer(String),

    /// Payload exceeds the container's structural limit
    #[error("payload of {size} bytes exceeds the {limit}-byte segment limit")]
    PayloadTooLarge { size: usize, limit: usize },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
