//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur during encoding or decoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Unexpected end of input.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// A varint was not encoded in its shortest form.
    #[error("non-canonical varint: {message}")]
    NonCanonical {
        /// Description of the canonicality violation.
        message: String,
    },

    /// Invalid UTF-8 string.
    #[error("invalid UTF-8 string")]
    InvalidUtf8,

    /// A decoded value does not fit the requested integer width.
    #[error("integer overflow: value {value} does not fit in {width} bits")]
    IntegerOverflow {
        /// The decoded value.
        value: u64,
        /// The requested width in bits.
        width: u32,
    },
}

impl CodecError {
    /// Creates a non-canonical varint error.
    pub fn non_canonical(message: impl Into<String>) -> Self {
        Self::NonCanonical {
            message: message.into(),
        }
    }
}
