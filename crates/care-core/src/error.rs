//! # Validation Errors
//!
//! Structured errors for input that fails a domain-level format rule.
//! Each variant carries the offending value so the HTTP layer can echo a
//! precise message back to the caller.

use thiserror::Error;

/// Validation failure for a domain primitive or enum.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A string did not match any variant of a closed enum.
    #[error("invalid {kind} value: \"{value}\"")]
    UnknownVariant {
        /// Enum name, e.g. `CareType`.
        kind: &'static str,
        /// The rejected input.
        value: String,
    },

    /// A time of day was not `HH:MM` or `HH:MM:SS`.
    #[error("invalid time \"{0}\" (expected HH:MM or HH:MM:SS)")]
    InvalidTime(String),

    /// A required text field was empty or whitespace.
    #[error("{0} must not be empty")]
    EmptyField(&'static str),

    /// A numeric field fell outside its permitted range.
    #[error("{field} out of range: {value}")]
    OutOfRange {
        /// Field name as it appears in the JSON payload.
        field: &'static str,
        /// The rejected value.
        value: i64,
    },
}
