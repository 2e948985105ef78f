//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while serializing or deserializing stored values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Failed to serialize a value to its stored JSON form.
    #[error("encoding failed: {message}")]
    EncodingFailed {
        /// Description of the encoding error.
        message: String,
    },

    /// Failed to parse a stored JSON string back into a value.
    #[error("decoding failed: {message}")]
    DecodingFailed {
        /// Description of the decoding error.
        message: String,
    },

    /// NaN and infinite floats have no stored representation.
    #[error("non-finite float values cannot be stored")]
    NonFiniteFloat,

    /// A reference marker array did not have the expected shape.
    #[error("malformed entity reference: {message}")]
    MalformedReference {
        /// What was wrong with the marker array.
        message: String,
    },
}

impl CodecError {
    /// Create an encoding failed error.
    pub fn encoding_failed(message: impl Into<String>) -> Self {
        Self::EncodingFailed {
            message: message.into(),
        }
    }

    /// Create a decoding failed error.
    pub fn decoding_failed(message: impl Into<String>) -> Self {
        Self::DecodingFailed {
            message: message.into(),
        }
    }

    /// Create a malformed reference error.
    pub fn malformed_reference(message: impl Into<String>) -> Self {
        Self::MalformedReference {
            message: message.into(),
        }
    }
}
