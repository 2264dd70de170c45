//! Error types for the story engine.
//!
//! `StoryError` is the top-level type; subsystem errors convert into it via
//! `From` impls. Per-event problems (duplicates, backpressure drops) are
//! counters, not errors — see the batch result types in the engine crate.

/// Errors that can occur in the persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("io error at {path}: {message}")]
    Io { path: String, message: String },

    #[error("corrupt document at {path}: {message}")]
    Corrupt { path: String, message: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("writer channel disconnected")]
    WriterDisconnected,
}

/// Structural validation failure for a telemetry record.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("record is not a JSON object")]
    NotAnObject,

    #[error("unsupported schema version: {found}")]
    UnsupportedVersion { found: String },

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid field {field}: {message}")]
    InvalidField { field: &'static str, message: String },
}

/// Top-level error type for the story engine.
#[derive(Debug, thiserror::Error)]
pub enum StoryError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("invalid event: {0}")]
    Validation(#[from] ValidationError),

    #[error("config error: {0}")]
    Config(String),
}

/// Convenience type alias.
pub type StoryResult<T> = Result<T, StoryError>;
