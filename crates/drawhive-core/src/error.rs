//! Crate level errors.

use crate::config::ConfigError;
use crate::recording::RecordingError;
use thiserror::Error;

/// Errors returned by the canvas model.
///
/// Filtered commands and no-op requests are not errors; they are reported
/// through return values instead.
#[derive(Debug, Error)]
pub enum Error {
    /// A session mode transition was requested from the wrong mode.
    #[error("Invalid mode transition: {0}")]
    InvalidMode(String),
    /// A command was passed to an entry point that cannot accept it.
    #[error("Protocol misuse: {0}")]
    ProtocolMisuse(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Recording(#[from] RecordingError),
}

/// Result type for canvas model operations.
pub type Result<T> = std::result::Result<T, Error>;
