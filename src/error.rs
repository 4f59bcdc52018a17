//! Error types for the access layer and its storage engine.

use crate::types::ObjectId;
use thiserror::Error;

/// Failures raised by the storage engine while reading or writing.
///
/// These are recoverable by the caller: the unit of work is left as it was
/// before the failing call, so a rollback (or a retry) is always safe.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Invalid store format: {0}")]
    InvalidFormat(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),
}

/// Main error type for access operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Store is locked by another process")]
    Locked,

    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Object not found: {0}")]
    ObjectNotFound(ObjectId),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

impl StoreError {
    /// Shorthand for a constraint violation found while committing.
    pub(crate) fn constraint(message: impl Into<String>) -> Self {
        StoreError::Persistence(PersistenceError::Constraint(message.into()))
    }

    /// Whether the caller can recover by rolling back and retrying.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, StoreError::Persistence(_))
    }

    /// Whether the failure comes from missing or mismatched store setup.
    pub fn is_configuration(&self) -> bool {
        matches!(self, StoreError::Configuration(_) | StoreError::Locked)
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Persistence(PersistenceError::Io(e))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Persistence(PersistenceError::Serialization(e.to_string()))
    }
}

impl From<rmp_serde::encode::Error> for StoreError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        StoreError::Persistence(PersistenceError::Serialization(e.to_string()))
    }
}

impl From<rmp_serde::decode::Error> for StoreError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        StoreError::Persistence(PersistenceError::Deserialization(e.to_string()))
    }
}

/// Result type for access operations.
pub type Result<T> = std::result::Result<T, StoreError>;
