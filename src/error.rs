//! Error taxonomy shared by every engine module.

use thiserror::Error;

use crate::storage::StorageError;

pub type Result<T> = std::result::Result<T, BackupError>;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("permission denied: {user_id} lacks '{permission}' on {subject_id}")]
    PermissionDenied {
        user_id: String,
        subject_id: String,
        permission: String,
    },

    #[error("not found: {subject_id}")]
    NotFound { subject_id: String },

    #[error("archive size {actual} bytes exceeds policy limit of {limit} bytes")]
    SizeLimitExceeded { actual: u64, limit: u64 },

    #[error("checksum mismatch for {backup_id}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        backup_id: String,
        expected: String,
        actual: String,
    },

    #[error("recovery verification failed: {message}")]
    RecoveryVerificationFailed { message: String },

    #[error("recovery failed: {message}")]
    RecoveryFailed { message: String },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("crypto error: {message}")]
    Crypto { message: String },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid data: {message}")]
    InvalidData { message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
