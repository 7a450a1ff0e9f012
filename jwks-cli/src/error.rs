//! Error handling for the JWKS command line

use thiserror::Error;

/// Type alias for Results with CLI errors
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for CLI commands
#[derive(Error, Debug)]
pub enum Error {
    /// Errors from key-set administration
    #[error(transparent)]
    Admin(#[from] jwks_admin::Error),

    /// The data directory could not be determined or prepared
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A command argument or input document is invalid
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Creates a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Error::Configuration(message.into())
    }

    /// Creates an invalid parameter error
    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Error::InvalidParameter(message.into())
    }
}
