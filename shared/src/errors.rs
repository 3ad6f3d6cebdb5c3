//! Shared error types for the combination sweep

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SharedError {
    #[error("Unknown progress status: {value}")]
    UnknownStatus { value: String },

    #[error("Invalid timestamp: {input}")]
    InvalidTimestamp { input: String },

    #[error("Value out of range for {field}: {value}")]
    OutOfRange { field: String, value: String },
}

