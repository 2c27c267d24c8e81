//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering every way a server payload can fail to
/// match the wire schema.
#[derive(Debug, Error)]
pub enum ProtocolError {
    // Serialization errors
    /// Failed to serialize a request body.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Failed to deserialize a response body.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    // Schema errors
    /// A required field was missing from a response.
    #[error("missing field `{field}` in {context}")]
    MissingField {
        /// Name of the missing field.
        field: &'static str,
        /// The payload being validated.
        context: &'static str,
    },

    /// A field was present but held an unusable value.
    #[error("invalid value for `{field}`: {reason}")]
    InvalidField {
        /// Name of the offending field.
        field: &'static str,
        /// What was wrong with it.
        reason: String,
    },
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_eof() || err.is_syntax() {
            ProtocolError::Deserialization(err.to_string())
        } else {
            ProtocolError::Serialization(err.to_string())
        }
    }
}
