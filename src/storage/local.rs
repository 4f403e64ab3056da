//! Local-disk storage backend: objects are plain files under a managed
//! base directory.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{StorageError, StorageProvider};

pub struct LocalStorage {
    base_dir: PathBuf,
}

impl LocalStorage {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    fn object_path(&self, remote_path: &str) -> PathBuf {
        self.base_dir.join(remote_path.trim_start_matches('/'))
    }
}

#[async_trait]
impl StorageProvider for LocalStorage {
    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<(), StorageError> {
        let dest = self.object_path(remote_path);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::new("failed to create local storage directory", e))?;
        }
        tokio::fs::copy(local_path, &dest)
            .await
            .map_err(|e| StorageError::new(format!("local upload to {remote_path} failed"), e))?;

        debug!("Stored {} at {}", remote_path, dest.display());
        Ok(())
    }

    async fn download(&self, remote_path: &str, local_path: &Path) -> Result<(), StorageError> {
        let src = self.object_path(remote_path);
        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::new("failed to create download directory", e))?;
        }
        tokio::fs::copy(&src, local_path)
            .await
            .map_err(|e| StorageError::new(format!("local download of {remote_path} failed"), e))?;
        Ok(())
    }

    async fn delete(&self, remote_path: &str) -> Result<(), StorageError> {
        let path = self.object_path(remote_path);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            // Deleting something already gone is a success.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::new(
                format!("local delete of {remote_path} failed"),
                e,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upload_download_round_trip() {
        let base = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(base.path().to_path_buf());

        let src = scratch.path().join("payload");
        std::fs::write(&src, b"object bytes").unwrap();
        storage.upload(&src, "prefix/obj-1").await.unwrap();

        let dest = scratch.path().join("fetched");
        storage.download("prefix/obj-1", &dest).await.unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"object bytes");
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let base = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(base.path().to_path_buf());

        let src = scratch.path().join("payload");
        std::fs::write(&src, b"x").unwrap();
        storage.upload(&src, "obj").await.unwrap();

        storage.delete("obj").await.unwrap();
        // Second delete of the same object also succeeds.
        storage.delete("obj").await.unwrap();
    }

    #[tokio::test]
    async fn test_download_missing_object_fails() {
        let base = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(base.path().to_path_buf());

        let dest = scratch.path().join("fetched");
        assert!(storage.download("no/such/object", &dest).await.is_err());
    }
}
