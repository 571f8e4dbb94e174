//! # Error standards
//!
//! This module provides a standardised error enum and result type for this crate.

// -----------------------------------------------------------------------------------------------
// TYPES
// -----------------------------------------------------------------------------------------------

/// Standard result type used in the sgm crate.
pub type Result<T> = std::result::Result<T, Error>;

// -----------------------------------------------------------------------------------------------
// ENUMERATIONS
// -----------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// An invalid combination of tunable parameters.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// Images, volumes or host buffers of the wrong shape.
    #[error("Invalid input: {0}")]
    Input(String),

    /// Buffer allocation, transfer or handle failure inside the execution environment.
    #[error("Resource error: {0}")]
    Resource(String),

    /// A kernel could not be dispatched or failed while running.
    #[error("Execution error: {0}")]
    Execution(String),
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl Error {
    /// True if the error was caused by the caller's parameters or data rather than by the
    /// execution environment.
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, Error::Configuration(_) | Error::Input(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Resource(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Configuration(e.to_string())
    }
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------
