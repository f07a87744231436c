//! Error types for signal generation
//!
//! This module defines error types used by the signal helpers.

use std::fmt;

/// Error type for signal operations
#[derive(Debug)]
pub enum UtilError {
    /// Writing an output file failed
    IoError(std::io::Error),
    /// Signal parameters out of range
    ValidationError(String),
}

impl fmt::Display for UtilError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UtilError::IoError(err) => write!(f, "I/O error: {}", err),
            UtilError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for UtilError {}

impl From<std::io::Error> for UtilError {
    fn from(err: std::io::Error) -> Self {
        UtilError::IoError(err)
    }
}

/// Result type for signal operations
pub type UtilResult<T> = std::result::Result<T, UtilError>;
