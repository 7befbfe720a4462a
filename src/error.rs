//! Error type shared by the codecs, the unit registry and the cache.
//!
//! Every variant is fatal to the single read or write that raised it. The
//! type is `Clone` so that callers waiting on the same cache slot can all
//! receive the failure of the one decode they shared; I/O errors are held
//! behind an `Arc` for that reason.

use std::io;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum FieldError {
    /// Metadata tokens before the payload were missing or unparsable.
    #[error("Malformed header: {0}")]
    MalformedHeader(String),

    /// A grid record referenced a point outside the declared dimensions.
    #[error("Invalid grid index {index} on axis {axis} (dimension {dimension})")]
    InvalidGridIndex { axis: char, index: String, dimension: usize },

    /// The stream ended before all declared records were read.
    #[error("Truncated input: {0}")]
    TruncatedInput(String),

    /// Payload length does not match dimensions × component count.
    #[error("Size mismatch: expected {expected} values, found {found}")]
    SizeMismatch { expected: usize, found: usize },

    #[error("Unsupported field file format: {0}")]
    UnsupportedFormat(String),

    /// A field value token could not be parsed as a real number.
    #[error("Invalid field value '{0}'")]
    InvalidValue(String),

    #[error("Unknown unit '{0}'")]
    UnknownUnit(String),

    #[error("IO error: {0}")]
    Io(Arc<io::Error>),
}

impl From<io::Error> for FieldError {
    fn from(e: io::Error) -> Self {
        FieldError::Io(Arc::new(e))
    }
}

pub type Result<T> = std::result::Result<T, FieldError>;
