//! Error taxonomy shared by every entry point.
//!
//! Nothing in the crate retries or swallows these: each one is returned to the
//! immediate caller, and retrying is left to the caller's own policy.

use crate::config::ConfigError;
use crate::value::{Direction, Kind};
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    /// No registered loader or saver claims the file name, suffix or buffer.
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),
    #[error("invalid interpolator: {0}")]
    InvalidInterpolator(String),
    #[error("operation not found: {0}")]
    OperationNotFound(String),
    #[error("operation {operation} has no argument named {argument}")]
    UnknownArgument { operation: String, argument: String },
    /// The operation ran and reported failure. `message` is the operation's
    /// own diagnostic text, unmodified.
    #[error("{operation}: {message}")]
    OperationFailed { operation: String, message: String },
    #[error("invalid option use: {0}")]
    InvalidOptionUse(String),
    #[error("invalid pixel data: {0}")]
    InvalidPixelData(String),
    #[error("runtime has been shut down")]
    ShutDown,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    pub(crate) fn wrong_direction(name: &str, expected: Direction) -> Self {
        Error::InvalidOptionUse(format!("option {name} is not an {expected} option"))
    }

    pub(crate) fn kind_mismatch(name: &str, expected: Kind, found: Kind) -> Self {
        Error::InvalidOptionUse(format!(
            "option {name} expects a {expected} value, got {found}"
        ))
    }

    pub(crate) fn operation_failed(operation: &str, message: impl Into<String>) -> Self {
        Error::OperationFailed {
            operation: operation.to_string(),
            message: message.into(),
        }
    }
}
