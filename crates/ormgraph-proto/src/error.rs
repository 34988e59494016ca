//! Errors raised while building expressions and prefetch trees.

use thiserror::Error;

/// Model-level errors.
#[derive(Debug, Error)]
pub enum Error {
    /// A named parameter had no value and pruning was not requested.
    #[error("missing value for parameter '{0}'")]
    MissingParameter(String),

    /// A path was empty or contained an empty segment.
    #[error("invalid path: '{0}'")]
    InvalidPath(String),

    /// Serialized model could not be decoded.
    #[error("deserialization error: {0}")]
    Deserialization(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Deserialization(e.to_string())
    }
}
