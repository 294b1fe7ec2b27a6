//! Error types for `TapGate` core library.

use thiserror::Error;

/// Result type alias using `TapGate` Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for `TapGate` operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A required request field was absent or blank.
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// A request field was present but could not be accepted.
    #[error("Invalid {field}: {reason}")]
    InvalidField {
        field: &'static str,
        reason: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
