//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur during encoding or decoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Failed to encode a value.
    #[error("{codec} encoding failed: {message}")]
    EncodingFailed {
        /// Codec that failed.
        codec: &'static str,
        /// Description of the encoding error.
        message: String,
    },

    /// Failed to decode bytes.
    #[error("{codec} decoding failed: {message}")]
    DecodingFailed {
        /// Codec that failed.
        codec: &'static str,
        /// Description of the decoding error.
        message: String,
    },
}

impl CodecError {
    /// Create an encoding failed error.
    pub fn encoding_failed(codec: &'static str, message: impl Into<String>) -> Self {
        Self::EncodingFailed {
            codec,
            message: message.into(),
        }
    }

    /// Create a decoding failed error.
    pub fn decoding_failed(codec: &'static str, message: impl Into<String>) -> Self {
        Self::DecodingFailed {
            codec,
            message: message.into(),
        }
    }
}
