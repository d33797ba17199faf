//! Error types for cylinder generation.

use thiserror::Error;

/// Errors that abort the analysis-and-generation pipeline.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BeltflowError {
    /// The base file cannot be used as a starting point.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Result type for beltflow operations.
pub type Result<T> = std::result::Result<T, BeltflowError>;
