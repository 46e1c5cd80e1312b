//! Error types
//!
//! `ApiError` is what callers of the Manager, Chunk Engine and Router see.
//! `StorageError` is what the persistence, cache and blob collaborators report;
//! it is wrapped into `ApiError` with the operation and entity id attached.

use thiserror::Error;

/// Errors reported by storage collaborators (persistence, cache, blob store).
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("record already exists: {0}")]
    Conflict(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("{operation} failed for {id}: {message}")]
    Backend {
        operation: &'static str,
        id: String,
        message: String,
    },
}

impl StorageError {
    /// Attach operation and entity id to an opaque backend failure.
    pub fn backend(operation: &'static str, id: impl Into<String>, err: impl ToString) -> Self {
        StorageError::Backend {
            operation,
            id: id.into(),
            message: err.to_string(),
        }
    }
}

/// Errors returned from broker operations.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("validation failed: {0}")]
    ValidationError(String),

    #[error("conflict: {0}")]
    ConflictError(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("payload too large: {size} bytes exceeds max {max}")]
    PayloadTooLarge { size: u64, max: u64 },

    #[error("checksum mismatch: expected {expected}, computed {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("out of order chunk for stream {stream_id}: expected index {expected}, received {received}")]
    OutOfOrderChunk {
        stream_id: String,
        expected: u32,
        received: u32,
    },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("delivery failed: {0}")]
    DeliveryError(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("storage error: {0}")]
    StorageError(#[from] StorageError),
}

impl ApiError {
    /// Map a collaborator failure for `id` onto the operation taxonomy.
    ///
    /// `NotFound` and `Conflict` from the store become the matching API errors;
    /// everything else stays a wrapped storage error.
    pub fn from_storage(err: StorageError, entity: &str, id: &str) -> Self {
        match err {
            StorageError::NotFound(_) => ApiError::NotFound(format!("{} {}", entity, id)),
            StorageError::Conflict(_) => {
                ApiError::ConflictError(format!("{} {} already exists", entity, id))
            }
            other => ApiError::StorageError(other),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ApiError::NotFound(_))
    }
}

impl From<config::ConfigError> for ApiError {
    fn from(err: config::ConfigError) -> Self {
        ApiError::ConfigError(err.to_string())
    }
}
