//! Recovery orchestrator: download, decrypt, rollback snapshot, extract,
//! verify.
//!
//! Restores are serialized behind their own mutex, independent of the
//! backup mutex, because two restores into overlapping paths would corrupt
//! the rollback snapshot. The snapshot is written before extraction and is
//! never auto-applied; undoing a restore is an explicit operator action.

use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::Mutex;
use tracing::{error, info};
use uuid::Uuid;

use crate::access::AccessControl;
use crate::archive;
use crate::crypto::CryptoUnit;
use crate::error::{BackupError, Result};
use crate::metadata::MetadataStore;
use crate::model::{
    Permission, RecoveryKind, RecoveryRecord, RecoveryStatus, StorageKind,
};
use crate::storage::StorageProvider;

pub struct RecoveryOrchestrator {
    store: Arc<MetadataStore>,
    providers: HashMap<StorageKind, Arc<dyn StorageProvider>>,
    crypto: Arc<CryptoUnit>,
    access: Arc<AccessControl>,
    rollback_dir: PathBuf,
    restore_root: PathBuf,
    run_lock: Mutex<()>,
}

impl RecoveryOrchestrator {
    pub fn new(
        store: Arc<MetadataStore>,
        providers: HashMap<StorageKind, Arc<dyn StorageProvider>>,
        crypto: Arc<CryptoUnit>,
        access: Arc<AccessControl>,
        rollback_dir: PathBuf,
        restore_root: PathBuf,
    ) -> Self {
        Self {
            store,
            providers,
            crypto,
            access,
            rollback_dir,
            restore_root,
            run_lock: Mutex::new(()),
        }
    }

    fn provider(&self, kind: StorageKind) -> Result<&Arc<dyn StorageProvider>> {
        self.providers.get(&kind).ok_or_else(|| {
            BackupError::Configuration(format!(
                "no storage provider configured for {}",
                kind.as_str()
            ))
        })
    }

    /// Restore `backup_id` over `target_paths` and return the recovery id.
    ///
    /// A snapshot of the targets' current state is archived under the
    /// rollback directory before anything is overwritten.
    pub async fn restore_backup(
        &self,
        backup_id: &str,
        target_paths: Vec<PathBuf>,
        kind: RecoveryKind,
        actor_id: &str,
    ) -> Result<String> {
        if let Err(e) = self
            .access
            .require(actor_id, backup_id, Permission::Restore)
            .await
        {
            self.access
                .log_access(actor_id, backup_id, "restore_backup", "denied")
                .await;
            return Err(e);
        }

        let _guard = self.run_lock.lock().await;

        let backup =
            self.store
                .get_backup(backup_id)
                .await?
                .ok_or_else(|| BackupError::NotFound {
                    subject_id: backup_id.to_string(),
                })?;
        if !backup.status.is_restorable() {
            return Err(BackupError::RecoveryFailed {
                message: format!(
                    "backup {} has status {}, expected Completed or Verified",
                    backup_id,
                    backup.status.as_str()
                ),
            });
        }

        let recovery_id = format!("recovery-{}", Uuid::new_v4());
        info!("Starting recovery {} from backup {}", recovery_id, backup_id);

        let mut record = RecoveryRecord {
            recovery_id: recovery_id.clone(),
            backup_id: backup_id.to_string(),
            kind,
            target_paths: target_paths.clone(),
            started_at: Utc::now(),
            completed_at: None,
            status: RecoveryStatus::Pending,
            error_message: None,
        };
        self.store.insert_recovery(&record).await?;

        record.status = RecoveryStatus::InProgress;
        self.store.update_recovery(&record).await?;

        let result = self
            .run_restore(&backup, &target_paths, &recovery_id)
            .await;

        record.completed_at = Some(Utc::now());
        match result {
            Ok(()) => {
                record.status = RecoveryStatus::Completed;
                self.store.update_recovery(&record).await?;
                info!("Recovery {} completed", recovery_id);
                self.access
                    .log_access(actor_id, backup_id, "restore_backup", "success")
                    .await;
                Ok(recovery_id)
            }
            Err(e) => {
                error!("Recovery {} failed: {}", recovery_id, e);
                record.status = RecoveryStatus::Failed;
                record.error_message = Some(e.to_string());
                self.store.update_recovery(&record).await?;
                self.access
                    .log_access(actor_id, backup_id, "restore_backup", "failed")
                    .await;
                Err(e)
            }
        }
    }

    async fn run_restore(
        &self,
        backup: &crate::model::BackupRecord,
        target_paths: &[PathBuf],
        recovery_id: &str,
    ) -> Result<()> {
        let workdir = TempDir::new()?;
        let scratch = workdir.path().join("download");

        self.provider(backup.storage_kind)?
            .download(&backup.remote_path, &scratch)
            .await?;

        let archive_path = if backup.encryption_key_id.is_some() {
            let ciphertext = tokio::fs::read(&scratch).await?;
            let plaintext = self.crypto.decrypt(&ciphertext)?;
            let decrypted = workdir.path().join("archive");
            tokio::fs::write(&decrypted, &plaintext).await?;
            decrypted
        } else {
            scratch
        };

        self.snapshot_targets(target_paths, recovery_id).await?;

        let extract_root = self.restore_root.clone();
        let extract_path = archive_path.clone();
        tokio::task::spawn_blocking(move || {
            archive::extract_archive(&extract_path, &extract_root)
        })
        .await
        .map_err(|e| {
            BackupError::Io(std::io::Error::other(format!("extract task failed: {e}")))
        })??;

        verify_targets(target_paths, &self.restore_root)?;
        Ok(())
        // workdir drops here, removing the download and decrypted archive.
    }

    /// Archive the targets' current contents so a bad restore can be undone
    /// by hand. The snapshot is never encrypted; it must stay restorable
    /// even if the encryption key is lost.
    async fn snapshot_targets(&self, target_paths: &[PathBuf], recovery_id: &str) -> Result<()> {
        tokio::fs::create_dir_all(&self.rollback_dir).await?;
        let snapshot_path = self
            .rollback_dir
            .join(format!("{recovery_id}-rollback.tar.gz"));

        let sources = target_paths.to_vec();
        let path = snapshot_path.clone();
        let summary =
            tokio::task::spawn_blocking(move || archive::build_archive(&sources, &path, true))
                .await
                .map_err(|e| {
                    BackupError::Io(std::io::Error::other(format!(
                        "rollback snapshot task failed: {e}"
                    )))
                })??;

        info!(
            "Rollback snapshot for {} at {} ({} files)",
            recovery_id,
            snapshot_path.display(),
            summary.file_count
        );
        Ok(())
    }

    pub async fn get_recovery(&self, recovery_id: &str) -> Result<Option<RecoveryRecord>> {
        self.store.get_recovery(recovery_id).await
    }
}

/// Every target must exist and be readable where extraction placed it.
/// Targets are mapped under the restore root the same way archive entries
/// are; with the default root `/` the mapped path is the target itself.
fn verify_targets(target_paths: &[PathBuf], restore_root: &Path) -> Result<()> {
    for target in target_paths {
        let restored = restore_root.join(target.strip_prefix("/").unwrap_or(target));
        if !restored.exists() {
            return Err(BackupError::RecoveryVerificationFailed {
                message: format!("restored path {} does not exist", restored.display()),
            });
        }
        check_readable(&restored)?;
    }
    Ok(())
}

fn check_readable(path: &Path) -> Result<()> {
    let readable = if path.is_dir() {
        std::fs::read_dir(path).is_ok()
    } else {
        std::fs::File::open(path).is_ok()
    };
    if readable {
        Ok(())
    } else {
        Err(BackupError::RecoveryVerificationFailed {
            message: format!("restored path {} is not readable", path.display()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verify_targets_missing_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("present");
        std::fs::write(&present, b"x").unwrap();
        let missing = dir.path().join("missing");

        assert!(verify_targets(&[present.clone()], Path::new("/")).is_ok());
        assert!(matches!(
            verify_targets(&[present, missing], Path::new("/")),
            Err(BackupError::RecoveryVerificationFailed { .. })
        ));
    }

    #[test]
    fn test_verify_targets_maps_under_restore_root() {
        let root = tempfile::tempdir().unwrap();
        let target = PathBuf::from("/srv/app/data.txt");

        // The target exists on disk only relative to the restore root, so
        // verification must look there, not at the absolute path.
        assert!(matches!(
            verify_targets(&[target.clone()], root.path()),
            Err(BackupError::RecoveryVerificationFailed { .. })
        ));

        let mapped_dir = root.path().join("srv/app");
        std::fs::create_dir_all(&mapped_dir).unwrap();
        std::fs::write(mapped_dir.join("data.txt"), b"restored").unwrap();
        assert!(verify_targets(&[target], root.path()).is_ok());
    }
}
