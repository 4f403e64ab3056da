//! Storage provider abstraction and backends.
//!
//! Backups are shipped to exactly one of three places: a managed local
//! directory, an S3-compatible object store, or an SFTP host. Callers only
//! see the [`StorageProvider`] trait and the opaque [`StorageError`]; they
//! never branch on backend-specific failure types.

pub mod local;
pub mod s3;
pub mod sftp;

pub use local::LocalStorage;
pub use s3::ObjectStoreStorage;
pub use sftp::SftpStorage;

use async_trait::async_trait;
use std::path::Path;

/// Opaque storage failure. The underlying transport/auth cause is preserved
/// as the error source for logging only.
#[derive(Debug, thiserror::Error)]
#[error("{context}")]
pub struct StorageError {
    context: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl StorageError {
    pub fn new(
        context: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    ) -> Self {
        Self {
            context: context.into(),
            source: Some(source.into()),
        }
    }

    pub fn message(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            source: None,
        }
    }
}

/// Capability contract for shipping backup objects.
///
/// `delete` of a non-existent object succeeds on every backend.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Copy the file at `local_path` to `remote_path`.
    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<(), StorageError>;

    /// Fetch the object at `remote_path` into `local_path`.
    async fn download(&self, remote_path: &str, local_path: &Path) -> Result<(), StorageError>;

    /// Remove the object at `remote_path`; idempotent.
    async fn delete(&self, remote_path: &str) -> Result<(), StorageError>;
}
