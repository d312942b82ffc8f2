//! Error handling for vellum-store
//!
//! Wraps vellum-core VellumError with store-specific helpers

use vellum_core::errors::VellumError;

/// Result type alias using VellumError
pub type Result<T> = std::result::Result<T, VellumError>;

/// Create a store fault from rusqlite::Error, tagged with the failing operation
pub fn from_rusqlite(op: impl Into<String>, err: rusqlite::Error) -> VellumError {
    VellumError::StoreFault {
        op: op.into(),
        detail: err.to_string(),
    }
}
