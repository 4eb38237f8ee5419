//! Error types for the data-loader crate.
//!
//! Two families live here:
//! - [`DataLoadError`] for reading and parsing the book dataset
//! - [`ValidationError`] for rejecting malformed query filters at the boundary

use thiserror::Error;

/// Errors that can occur during dataset loading and parsing
#[derive(Error, Debug)]
pub enum DataLoadError {
    /// File could not be found or opened
    #[error("Failed to open file: {path}")]
    FileNotFound { path: String },

    /// I/O error occurred while reading file
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// The dataset was not valid JSON, or not shaped as expected
    #[error("Parse error in {file}: {reason}")]
    ParseError { file: String, reason: String },

    /// A record field had an invalid value
    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: String, value: String },
}

/// Convenience type alias for Results in this crate
pub type Result<T> = std::result::Result<T, DataLoadError>;

/// Malformed or unrecognized filter input.
///
/// Raised before any pipeline work starts; never recorded as a source failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Key is not one of the recognized filter keys
    #[error("unrecognized filter key: {0}")]
    UnknownKey(String),

    /// The same filter key was supplied more than once
    #[error("filter key supplied more than once: {0}")]
    DuplicateKey(String),

    /// Value is outside the allowed vocabulary for its key
    #[error("invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}
