//! Error types for ness-gate.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Operational errors.
///
/// Payment and stake denials on the grant path are not errors in this sense;
/// they are reported through [`crate::access::AccessError`].
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Subscription store error.
    #[error("store error: {0}")]
    Store(String),

    /// Network error.
    #[error("network error: {0}")]
    Network(String),

    /// Invalid caller input.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Self::Store(e.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Self::Config(e.to_string())
    }
}
