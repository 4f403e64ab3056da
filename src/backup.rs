//! Backup orchestrator: owns the archive/encrypt/upload/verify workflow
//! and the retention sweep.
//!
//! All creations are serialized behind one mutex so concurrent callers
//! cannot race on temp-directory state; each call does its blocking archive
//! work on the blocking thread pool. Temp directories are dropped on every
//! exit path.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::access::AccessControl;
use crate::archive::{self, ArchiveSummary};
use crate::crypto::CryptoUnit;
use crate::error::{BackupError, Result};
use crate::metadata::MetadataStore;
use crate::model::{
    BackupKind, BackupPolicy, BackupRecord, BackupStatus, Permission, StorageKind,
    VerificationStatus,
};
use crate::storage::StorageProvider;

/// Aggregate view over the backup table, for status dashboards.
#[derive(Debug, Clone)]
pub struct BackupStatistics {
    pub total_backups: u32,
    pub completed_backups: u32,
    pub failed_backups: u32,
    pub total_size_bytes: u64,
    pub last_backup_at: Option<chrono::DateTime<Utc>>,
}

pub struct BackupOrchestrator {
    policies: HashMap<String, BackupPolicy>,
    store: Arc<MetadataStore>,
    providers: HashMap<StorageKind, Arc<dyn StorageProvider>>,
    crypto: Arc<CryptoUnit>,
    access: Arc<AccessControl>,
    run_lock: Mutex<()>,
}

impl BackupOrchestrator {
    pub fn new(
        policies: Vec<BackupPolicy>,
        store: Arc<MetadataStore>,
        providers: HashMap<StorageKind, Arc<dyn StorageProvider>>,
        crypto: Arc<CryptoUnit>,
        access: Arc<AccessControl>,
    ) -> Self {
        Self {
            policies: policies
                .into_iter()
                .map(|p| (p.policy_id.clone(), p))
                .collect(),
            store,
            providers,
            crypto,
            access,
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

    fn policy(&self, policy_id: &str) -> Result<&BackupPolicy> {
        self.policies.get(policy_id).ok_or_else(|| BackupError::NotFound {
            subject_id: policy_id.to_string(),
        })
    }

    /// Run the named policy and return the new backup id.
    ///
    /// The record is inserted before work starts and transitions Pending ->
    /// InProgress -> Completed (or Failed with the captured error); failed
    /// backups stay visible in listings.
    pub async fn create_backup(&self, policy_id: &str, actor_id: &str) -> Result<String> {
        let policy = self.policy(policy_id)?.clone();

        if policy.access_policy.admin_only && !self.access.is_admin(actor_id) {
            self.access
                .log_access(actor_id, policy_id, "create_backup", "denied")
                .await;
            return Err(BackupError::PermissionDenied {
                user_id: actor_id.to_string(),
                subject_id: policy_id.to_string(),
                permission: Permission::Create.as_str().to_string(),
            });
        }

        if let Err(e) = self
            .access
            .require(actor_id, policy_id, Permission::Create)
            .await
        {
            self.access
                .log_access(actor_id, policy_id, "create_backup", "denied")
                .await;
            return Err(e);
        }

        let _guard = self.run_lock.lock().await;

        let created_at = Utc::now();
        let backup_id = format!("{policy_id}-{}", created_at.format("%Y%m%d%H%M%S%f"));
        info!("Starting backup {} for policy {}", backup_id, policy_id);

        let mut record = BackupRecord {
            backup_id: backup_id.clone(),
            policy_id: policy_id.to_string(),
            kind: policy.kind,
            created_at,
            size_bytes: 0,
            checksum: String::new(),
            encryption_key_id: None,
            compression_ratio: 1.0,
            source_paths: policy.source_paths.clone(),
            remote_path: String::new(),
            storage_kind: policy.storage_kind,
            status: BackupStatus::Pending,
            error_message: None,
            verification_status: VerificationStatus::Unverified,
        };
        self.store.insert_backup(&record).await?;

        record.status = BackupStatus::InProgress;
        self.store.update_backup(&record).await?;

        match self.run_create(&policy, &mut record).await {
            Ok(()) => {
                record.status = BackupStatus::Completed;
                self.store.update_backup(&record).await?;
                info!(
                    "Backup {} completed: {} bytes at {}",
                    backup_id, record.size_bytes, record.remote_path
                );
                self.access
                    .log_access(actor_id, &backup_id, "create_backup", "success")
                    .await;
            }
            Err(e) => {
                error!("Backup {} failed: {}", backup_id, e);
                record.status = BackupStatus::Failed;
                record.error_message = Some(e.to_string());
                self.store.update_backup(&record).await?;
                self.access
                    .log_access(actor_id, &backup_id, "create_backup", "failed")
                    .await;
                return Err(e);
            }
        }

        if policy.verify_after_create {
            // A failed verification is recorded on the backup but does not
            // fail the creation; the operator decides remediation.
            if let Err(e) = self.verify_backup(&backup_id).await {
                warn!("Post-create verification of {} failed: {}", backup_id, e);
            }
        }

        Ok(backup_id)
    }

    async fn run_create(&self, policy: &BackupPolicy, record: &mut BackupRecord) -> Result<()> {
        let workdir = TempDir::new()?;
        let archive_path = workdir.path().join(format!("{}.tar", record.backup_id));

        let sources = policy.source_paths.clone();
        let compress = policy.compression_enabled;
        let build_path = archive_path.clone();
        let summary: ArchiveSummary = tokio::task::spawn_blocking(move || {
            archive::build_archive(&sources, &build_path, compress)
        })
        .await
        .map_err(|e| {
            BackupError::Io(std::io::Error::other(format!("archive task failed: {e}")))
        })??;

        if policy.max_size_bytes > 0 && summary.size_bytes > policy.max_size_bytes {
            return Err(BackupError::SizeLimitExceeded {
                actual: summary.size_bytes,
                limit: policy.max_size_bytes,
            });
        }

        record.size_bytes = summary.size_bytes;
        record.checksum = summary.checksum;
        record.compression_ratio = summary.compression_ratio;

        let upload_path = if policy.encryption_enabled {
            let plaintext = tokio::fs::read(&archive_path).await?;
            let ciphertext = self.crypto.encrypt(&plaintext)?;
            let encrypted_path = workdir.path().join(format!("{}.enc", record.backup_id));
            tokio::fs::write(&encrypted_path, &ciphertext).await?;
            record.encryption_key_id = Some(self.crypto.key_id().to_string());
            encrypted_path
        } else {
            archive_path
        };

        let remote_path = format!(
            "{}/{}",
            policy.destination_prefix.trim_matches('/'),
            record.backup_id
        );
        self.provider(policy.storage_kind)?
            .upload(&upload_path, &remote_path)
            .await?;
        record.remote_path = remote_path;

        Ok(())
        // workdir drops here, removing the archive and any ciphertext.
    }

    /// Re-download the stored object, recompute its checksum against the
    /// record, and enumerate archive members as a structural check.
    ///
    /// Success promotes the record to Verified. Failure records the reason
    /// in the verification status without touching the backup status.
    pub async fn verify_backup(&self, backup_id: &str) -> Result<()> {
        let mut record =
            self.store
                .get_backup(backup_id)
                .await?
                .ok_or_else(|| BackupError::NotFound {
                    subject_id: backup_id.to_string(),
                })?;

        match self.run_verify(&record).await {
            Ok(()) => {
                record.status = BackupStatus::Verified;
                record.verification_status = VerificationStatus::Verified;
                self.store.update_backup(&record).await?;
                info!("Backup {} verified", backup_id);
                Ok(())
            }
            Err(e) => {
                record.verification_status = VerificationStatus::Failed(e.to_string());
                self.store.update_backup(&record).await?;
                Err(e)
            }
        }
    }

    async fn run_verify(&self, record: &BackupRecord) -> Result<()> {
        let workdir = TempDir::new()?;
        let scratch = workdir.path().join("verify");

        self.provider(record.storage_kind)?
            .download(&record.remote_path, &scratch)
            .await?;

        let stored = tokio::fs::read(&scratch).await?;
        let plaintext = if record.encryption_key_id.is_some() {
            self.crypto.decrypt(&stored)?
        } else {
            stored
        };

        let actual = archive::bytes_checksum(&plaintext);
        if actual != record.checksum {
            return Err(BackupError::ChecksumMismatch {
                backup_id: record.backup_id.clone(),
                expected: record.checksum.clone(),
                actual,
            });
        }

        // Structural check: the archive must still enumerate cleanly.
        archive::enumerate_members(&plaintext)?;
        Ok(())
    }

    pub async fn list_backups(
        &self,
        kind: Option<BackupKind>,
        limit: u32,
    ) -> Result<Vec<BackupRecord>> {
        self.store.list_backups(kind, limit).await
    }

    pub async fn get_backup(&self, backup_id: &str) -> Result<Option<BackupRecord>> {
        self.store.get_backup(backup_id).await
    }

    /// Delete the remote object, then the metadata row. If the remote
    /// deletion fails the row is kept so the backup never silently vanishes
    /// from records while its object lingers.
    pub async fn delete_backup(&self, backup_id: &str, actor_id: &str) -> Result<()> {
        if let Err(e) = self
            .access
            .require(actor_id, backup_id, Permission::Delete)
            .await
        {
            self.access
                .log_access(actor_id, backup_id, "delete_backup", "denied")
                .await;
            return Err(e);
        }

        let record =
            self.store
                .get_backup(backup_id)
                .await?
                .ok_or_else(|| BackupError::NotFound {
                    subject_id: backup_id.to_string(),
                })?;

        self.provider(record.storage_kind)?
            .delete(&record.remote_path)
            .await?;
        self.store.delete_backup(backup_id).await?;

        info!("Deleted backup {}", backup_id);
        self.access
            .log_access(actor_id, backup_id, "delete_backup", "success")
            .await;
        Ok(())
    }

    /// Remove backups older than their policy's retention window (or the
    /// override, when given). Individual failures are logged and skipped so
    /// one stuck object cannot stall the sweep. Returns the delete count.
    pub async fn cleanup_expired(&self, retention_override: Option<u32>) -> Result<u32> {
        let now = Utc::now();
        let mut deleted = 0u32;

        for policy in self.policies.values() {
            let retention_days = retention_override.unwrap_or(policy.retention_days);
            let cutoff = now - chrono::Duration::days(i64::from(retention_days));

            for record in self.store.list_backups_for_policy(&policy.policy_id).await? {
                if record.created_at >= cutoff {
                    continue;
                }

                let provider = match self.provider(record.storage_kind) {
                    Ok(p) => p,
                    Err(e) => {
                        warn!("Skipping expired backup {}: {}", record.backup_id, e);
                        continue;
                    }
                };
                if let Err(e) = provider.delete(&record.remote_path).await {
                    warn!(
                        "Failed to delete expired object for {}: {}",
                        record.backup_id, e
                    );
                    continue;
                }
                if let Err(e) = self.store.delete_backup(&record.backup_id).await {
                    warn!(
                        "Failed to delete metadata for expired backup {}: {}",
                        record.backup_id, e
                    );
                    continue;
                }

                info!("Removed expired backup {}", record.backup_id);
                deleted += 1;
            }
        }

        Ok(deleted)
    }

    pub async fn statistics(&self) -> Result<BackupStatistics> {
        let completed = self
            .store
            .count_backups_with_status(BackupStatus::Completed)
            .await?
            + self
                .store
                .count_backups_with_status(BackupStatus::Verified)
                .await?;

        Ok(BackupStatistics {
            total_backups: self.store.count_backups().await?,
            completed_backups: completed,
            failed_backups: self
                .store
                .count_backups_with_status(BackupStatus::Failed)
                .await?,
            total_size_bytes: self.store.total_completed_bytes().await?,
            last_backup_at: self.store.latest_backup_time().await?,
        })
    }
}
