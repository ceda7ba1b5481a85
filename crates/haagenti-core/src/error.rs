//! Error types for decompression operations.

use thiserror::Error;

/// Result type alias for decompression operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Decompression error types.
#[derive(Debug, Error)]
pub enum Error {
    /// Input data is corrupted or invalid.
    #[error("corrupted data: {message}")]
    CorruptedData {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Buffer too small for output.
    #[error("buffer too small: need {required} bytes, got {provided}")]
    BufferTooSmall { required: usize, provided: usize },

    /// Dictionary not found or invalid.
    #[error("invalid dictionary: {0}")]
    InvalidDictionary(String),

    /// Unexpected end of input stream.
    #[error("unexpected EOF after {bytes_read} bytes")]
    UnexpectedEof { bytes_read: usize },

    /// I/O error from underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stream state error.
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    /// Unsupported feature or format.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl Error {
    /// Create a corrupted data error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Error::CorruptedData {
            message: message.into(),
            source: None,
        }
    }

    /// Create a corrupted data error with offset context.
    pub fn corrupted_at(message: impl Into<String>, offset: usize) -> Self {
        Error::CorruptedData {
            message: format!("{} at offset {}", message.into(), offset),
            source: None,
        }
    }

    /// Create a buffer too small error.
    pub fn buffer_too_small(required: usize, provided: usize) -> Self {
        Error::BufferTooSmall { required, provided }
    }

    /// Create an unexpected EOF error.
    pub fn unexpected_eof(bytes_read: usize) -> Self {
        Error::UnexpectedEof { bytes_read }
    }

    /// Create an invalid state error.
    pub fn invalid_state(expected: &'static str, actual: &'static str) -> Self {
        Error::InvalidState { expected, actual }
    }

    /// Check if error is recoverable (can retry with different parameters).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::UnexpectedEof { .. } | Error::BufferTooSmall { .. }
        )
    }

    /// Get error category for metrics.
    pub fn category(&self) -> &'static str {
        match self {
            Error::CorruptedData { .. } => "corrupted_data",
            Error::BufferTooSmall { .. } => "buffer_too_small",
            Error::InvalidDictionary(_) => "invalid_dictionary",
            Error::UnexpectedEof { .. } => "unexpected_eof",
            Error::Io(_) => "io_error",
            Error::InvalidState { .. } => "invalid_state",
            Error::Unsupported(_) => "unsupported",
        }
    }
}

// ============================================================================
