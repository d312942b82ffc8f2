//! Error taxonomy shared by the engine and its store backends.
//!
//! Every failure surfaces as a [`VellumError`]; store backends translate
//! driver errors into `StoreFault` so callers handle a single type. Any
//! error raised inside a flush rolls the surrounding transaction back.

use thiserror::Error;

use crate::model::OperationKind;

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, VellumError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VellumError {
    /// The command table has no entry for the requested pair.
    #[error("no command registered for {action} '{entity_type}' entities ({operation})")]
    MissingCommand {
        entity_type: String,
        operation: OperationKind,
        action: &'static str,
    },

    /// Declared schema and runtime usage disagree: duplicate registration,
    /// parameter shortfall, or a property cursor mismatch.
    #[error("schema conflict for '{entity_type}': {detail}")]
    SchemaConflict { entity_type: String, detail: String },

    /// Stored data cannot be decoded against the registered schema.
    #[error("invalid repository format: {detail}")]
    InvalidRepositoryFormat { detail: String },

    /// A lookup addressed something the engine is not tracking.
    #[error("{what} not found: '{key}'")]
    NotFound { what: &'static str, key: String },

    /// A bucket already flagged for deletion was addressed again.
    #[error("entity '{key}' is marked deleted and can no longer be used")]
    EntityDeleted { key: String },

    /// Insertion could not make progress: an owner never received an
    /// identifier (ownership cycle, or an owner outside the cache).
    #[error("cannot persist '{entity_type}': owner identifier was never assigned")]
    OwnerUnresolved { entity_type: String },

    /// The backing store failed.
    #[error("store command failed during {op}: {detail}")]
    StoreFault { op: String, detail: String },
}

impl VellumError {
    pub fn schema_conflict(entity_type: impl Into<String>, detail: impl Into<String>) -> Self {
        VellumError::SchemaConflict {
            entity_type: entity_type.into(),
            detail: detail.into(),
        }
    }

    pub fn invalid_format(detail: impl Into<String>) -> Self {
        VellumError::InvalidRepositoryFormat {
            detail: detail.into(),
        }
    }

    pub fn not_found(what: &'static str, key: impl Into<String>) -> Self {
        VellumError::NotFound {
            what,
            key: key.into(),
        }
    }

    pub fn missing_command(entity_type: impl Into<String>, operation: OperationKind) -> Self {
        VellumError::MissingCommand {
            entity_type: entity_type.into(),
            operation,
            action: operation.action(),
        }
    }
}
