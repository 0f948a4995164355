//! Error types for the metadata engine

use thiserror::Error;

/// Result type alias using MetadataEngineError
pub type Result<T> = std::result::Result<T, MetadataEngineError>;

/// Errors that can occur in the metadata engine
///
/// Recoverable conditions (malformed nodes, unreadable assets, oversized
/// payloads) are deliberately not represented here — they degrade locally
/// per the error-handling policy and never abort a save.
#[derive(Debug, Error)]
pub enum MetadataEngineError {
    /// The raw workflow document is not a JSON object
    #[error("workflow graph is not a JSON object")]
    GraphNotAnObject,

    /// A trace was requested from a node id absent from the graph
    #[error("sink node '{0}' not present in graph")]
    UnknownSink(String),

    /// Canonical tree failed to re-validate as its own shape
    #[error("canonical schema violation: {0}")]
    Schema(#[from] gravure_metadata_contracts::SchemaError),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
