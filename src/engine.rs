//! Operator facade over the backup and recovery orchestrators.
//!
//! External callers (schedulers, CLIs, dashboards) drive the engine through
//! this type and receive structured [`OperationOutcome`] values instead of
//! core-internal errors, so the glue layer never matches on the taxonomy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::access::AccessControl;
use crate::backup::{BackupOrchestrator, BackupStatistics};
use crate::config::Config;
use crate::crypto::CryptoUnit;
use crate::error::Result;
use crate::metadata::MetadataStore;
use crate::model::{BackupKind, BackupRecord, RecoveryKind, StorageKind};
use crate::recovery::RecoveryOrchestrator;
use crate::storage::{LocalStorage, ObjectStoreStorage, SftpStorage, StorageProvider};

/// Structured result of one engine operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationOutcome {
    pub operation: String,
    pub succeeded: bool,
    /// The backup or recovery id the operation produced or acted on.
    pub subject_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl OperationOutcome {
    fn from_result(
        operation: &str,
        started_at: DateTime<Utc>,
        result: Result<Option<String>>,
    ) -> Self {
        let (succeeded, subject_id, error) = match result {
            Ok(subject_id) => (true, subject_id, None),
            Err(e) => (false, None, Some(e.to_string())),
        };
        Self {
            operation: operation.to_string(),
            succeeded,
            subject_id,
            started_at,
            completed_at: Utc::now(),
            error,
        }
    }
}

pub struct BackupEngine {
    store: Arc<MetadataStore>,
    access: Arc<AccessControl>,
    backups: BackupOrchestrator,
    recoveries: RecoveryOrchestrator,
}

impl BackupEngine {
    /// Wire up the engine from configuration: open the metadata store,
    /// load or create the encryption key, and connect the configured
    /// storage backends. Local storage is always available.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(MetadataStore::open(&config.database_path).await?);
        store.initialize().await?;

        let crypto = Arc::new(CryptoUnit::initialize(&config.key_file)?);
        let access = Arc::new(AccessControl::new(
            Arc::clone(&store),
            config.admin_users.clone(),
        ));

        let mut providers: HashMap<StorageKind, Arc<dyn StorageProvider>> = HashMap::new();
        providers.insert(
            StorageKind::Local,
            Arc::new(LocalStorage::new(config.local_storage_dir.clone())),
        );
        if let Some(object_store) = &config.object_store {
            providers.insert(
                StorageKind::ObjectStore,
                Arc::new(ObjectStoreStorage::connect(object_store).await?),
            );
        }
        if let Some(sftp) = &config.sftp {
            providers.insert(StorageKind::Sftp, Arc::new(SftpStorage::new(sftp.clone())));
        }

        let backups = BackupOrchestrator::new(
            config.policies.clone(),
            Arc::clone(&store),
            providers.clone(),
            Arc::clone(&crypto),
            Arc::clone(&access),
        );
        let recoveries = RecoveryOrchestrator::new(
            Arc::clone(&store),
            providers,
            crypto,
            Arc::clone(&access),
            config.rollback_dir.clone(),
            config.restore_root.clone(),
        );

        info!(
            "Backup engine initialized ({} policies)",
            config.policies.len()
        );
        Ok(Self {
            store,
            access,
            backups,
            recoveries,
        })
    }

    pub async fn create_backup(&self, policy_id: &str, actor_id: &str) -> OperationOutcome {
        let started_at = Utc::now();
        let result = self
            .backups
            .create_backup(policy_id, actor_id)
            .await
            .map(Some);
        OperationOutcome::from_result("create_backup", started_at, result)
    }

    pub async fn restore_backup(
        &self,
        backup_id: &str,
        target_paths: Vec<PathBuf>,
        kind: RecoveryKind,
        actor_id: &str,
    ) -> OperationOutcome {
        let started_at = Utc::now();
        let result = self
            .recoveries
            .restore_backup(backup_id, target_paths, kind, actor_id)
            .await
            .map(Some);
        OperationOutcome::from_result("restore_backup", started_at, result)
    }

    pub async fn verify_backup(&self, backup_id: &str) -> OperationOutcome {
        let started_at = Utc::now();
        let result = self
            .backups
            .verify_backup(backup_id)
            .await
            .map(|()| Some(backup_id.to_string()));
        OperationOutcome::from_result("verify_backup", started_at, result)
    }

    pub async fn delete_backup(&self, backup_id: &str, actor_id: &str) -> OperationOutcome {
        let started_at = Utc::now();
        let result = self
            .backups
            .delete_backup(backup_id, actor_id)
            .await
            .map(|()| Some(backup_id.to_string()));
        OperationOutcome::from_result("delete_backup", started_at, result)
    }

    /// Retention sweep; the outcome's subject carries the delete count.
    pub async fn cleanup_expired(&self, retention_override: Option<u32>) -> OperationOutcome {
        let started_at = Utc::now();
        let result = self
            .backups
            .cleanup_expired(retention_override)
            .await
            .map(|count| Some(count.to_string()));
        OperationOutcome::from_result("cleanup_expired", started_at, result)
    }

    pub async fn list_backups(
        &self,
        kind: Option<BackupKind>,
        limit: u32,
    ) -> Result<Vec<BackupRecord>> {
        self.backups.list_backups(kind, limit).await
    }

    pub async fn statistics(&self) -> Result<BackupStatistics> {
        self.backups.statistics().await
    }

    pub fn access_control(&self) -> &AccessControl {
        &self.access
    }

    pub fn metadata(&self) -> &MetadataStore {
        &self.store
    }

    pub fn backups(&self) -> &BackupOrchestrator {
        &self.backups
    }

    pub fn recoveries(&self) -> &RecoveryOrchestrator {
        &self.recoveries
    }
}
