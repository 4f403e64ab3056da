//! Durable metadata store for backups, recoveries, access grants, and the
//! audit trail, kept in an embedded SQLite database so the engine keeps
//! working when the primary database is the thing being restored.

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use tracing::debug;

use crate::error::{BackupError, Result};
use crate::model::{
    AccessGrant, BackupKind, BackupRecord, BackupStatus, Permission, RecoveryKind, RecoveryRecord,
    RecoveryStatus, StorageKind, VerificationStatus,
};

pub struct MetadataStore {
    pool: SqlitePool,
}

impl MetadataStore {
    /// Open (creating if necessary) the metadata database at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the schema if it does not exist yet.
    pub async fn initialize(&self) -> Result<()> {
        debug!("Initializing backup metadata store");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS backups (
                backup_id TEXT PRIMARY KEY,
                policy_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                created_at TEXT NOT NULL,
                size_bytes INTEGER NOT NULL DEFAULT 0,
                checksum TEXT NOT NULL DEFAULT '',
                encryption_key_id TEXT,
                compression_ratio REAL NOT NULL DEFAULT 1.0,
                source_paths TEXT NOT NULL,
                remote_path TEXT NOT NULL DEFAULT '',
                storage_kind TEXT NOT NULL,
                status TEXT NOT NULL,
                error_message TEXT,
                verification_status TEXT NOT NULL DEFAULT 'unverified'
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS recoveries (
                recovery_id TEXT PRIMARY KEY,
                backup_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                target_paths TEXT NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                status TEXT NOT NULL,
                error_message TEXT
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS access_grants (
                id TEXT PRIMARY KEY,
                backup_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                permission TEXT NOT NULL,
                granted_at TEXT NOT NULL,
                expires_at TEXT,
                granted_by TEXT NOT NULL
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS audit_log (
                id TEXT PRIMARY KEY,
                timestamp TEXT NOT NULL,
                actor_id TEXT NOT NULL,
                subject_id TEXT NOT NULL,
                action TEXT NOT NULL,
                outcome TEXT NOT NULL
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        debug!("Backup metadata store initialized");
        Ok(())
    }

    // Backup records

    pub async fn insert_backup(&self, record: &BackupRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO backups (
                backup_id, policy_id, kind, created_at, size_bytes, checksum,
                encryption_key_id, compression_ratio, source_paths, remote_path,
                storage_kind, status, error_message, verification_status
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        )
        .bind(&record.backup_id)
        .bind(&record.policy_id)
        .bind(record.kind.as_str())
        .bind(record.created_at)
        .bind(record.size_bytes as i64)
        .bind(&record.checksum)
        .bind(&record.encryption_key_id)
        .bind(record.compression_ratio)
        .bind(serde_json::to_string(&record.source_paths)?)
        .bind(&record.remote_path)
        .bind(record.storage_kind.as_str())
        .bind(record.status.as_str())
        .bind(&record.error_message)
        .bind(record.verification_status.as_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn update_backup(&self, record: &BackupRecord) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE backups SET
                size_bytes = ?, checksum = ?, encryption_key_id = ?,
                compression_ratio = ?, remote_path = ?, status = ?,
                error_message = ?, verification_status = ?
            WHERE backup_id = ?
        "#,
        )
        .bind(record.size_bytes as i64)
        .bind(&record.checksum)
        .bind(&record.encryption_key_id)
        .bind(record.compression_ratio)
        .bind(&record.remote_path)
        .bind(record.status.as_str())
        .bind(&record.error_message)
        .bind(record.verification_status.as_string())
        .bind(&record.backup_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_backup(&self, backup_id: &str) -> Result<Option<BackupRecord>> {
        let row = sqlx::query("SELECT * FROM backups WHERE backup_id = ?")
            .bind(backup_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(row_to_backup(&row)?)),
            None => Ok(None),
        }
    }

    /// List backups newest-first with an optional kind filter.
    pub async fn list_backups(
        &self,
        kind: Option<BackupKind>,
        limit: u32,
    ) -> Result<Vec<BackupRecord>> {
        let rows = match kind {
            Some(kind) => {
                sqlx::query(
                    "SELECT * FROM backups WHERE kind = ? ORDER BY created_at DESC LIMIT ?",
                )
                .bind(kind.as_str())
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT * FROM backups ORDER BY created_at DESC LIMIT ?")
                    .bind(limit as i64)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.iter().map(row_to_backup).collect()
    }

    pub async fn list_backups_for_policy(&self, policy_id: &str) -> Result<Vec<BackupRecord>> {
        let rows =
            sqlx::query("SELECT * FROM backups WHERE policy_id = ? ORDER BY created_at DESC")
                .bind(policy_id)
                .fetch_all(&self.pool)
                .await?;

        rows.iter().map(row_to_backup).collect()
    }

    pub async fn delete_backup(&self, backup_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM backups WHERE backup_id = ?")
            .bind(backup_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn count_backups(&self) -> Result<u32> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM backups")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u32)
    }

    pub async fn count_backups_with_status(&self, status: BackupStatus) -> Result<u32> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM backups WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u32)
    }

    /// Total bytes held by completed (or verified) backups.
    pub async fn total_completed_bytes(&self) -> Result<u64> {
        let total: Option<i64> = sqlx::query_scalar(
            "SELECT SUM(size_bytes) FROM backups WHERE status IN ('Completed', 'Verified')",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(total.unwrap_or(0) as u64)
    }

    pub async fn latest_backup_time(&self) -> Result<Option<DateTime<Utc>>> {
        let latest: Option<DateTime<Utc>> =
            sqlx::query_scalar("SELECT MAX(created_at) FROM backups")
                .fetch_one(&self.pool)
                .await?;
        Ok(latest)
    }

    // Recovery records

    pub async fn insert_recovery(&self, record: &RecoveryRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO recoveries (
                recovery_id, backup_id, kind, target_paths, started_at,
                completed_at, status, error_message
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
        )
        .bind(&record.recovery_id)
        .bind(&record.backup_id)
        .bind(record.kind.as_str())
        .bind(serde_json::to_string(&record.target_paths)?)
        .bind(record.started_at)
        .bind(record.completed_at)
        .bind(record.status.as_str())
        .bind(&record.error_message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn update_recovery(&self, record: &RecoveryRecord) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE recoveries SET
                completed_at = ?, status = ?, error_message = ?
            WHERE recovery_id = ?
        "#,
        )
        .bind(record.completed_at)
        .bind(record.status.as_str())
        .bind(&record.error_message)
        .bind(&record.recovery_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_recovery(&self, recovery_id: &str) -> Result<Option<RecoveryRecord>> {
        let row = sqlx::query("SELECT * FROM recoveries WHERE recovery_id = ?")
            .bind(recovery_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(row_to_recovery(&row)?)),
            None => Ok(None),
        }
    }

    // Access grants

    pub async fn insert_grant(&self, grant: &AccessGrant) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO access_grants (
                id, backup_id, user_id, permission, granted_at, expires_at, granted_by
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
        )
        .bind(&grant.id)
        .bind(&grant.backup_id)
        .bind(&grant.user_id)
        .bind(grant.permission.as_str())
        .bind(grant.granted_at)
        .bind(grant.expires_at)
        .bind(&grant.granted_by)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn revoke_grant(
        &self,
        user_id: &str,
        subject_id: &str,
        permission: Permission,
    ) -> Result<()> {
        sqlx::query(
            "DELETE FROM access_grants WHERE user_id = ? AND backup_id = ? AND permission = ?",
        )
        .bind(user_id)
        .bind(subject_id)
        .bind(permission.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Grants matching the tuple; expiry is evaluated by the caller so the
    /// comparison does not depend on the database's timestamp collation.
    pub async fn grants_for(
        &self,
        user_id: &str,
        subject_id: &str,
        permission: Permission,
    ) -> Result<Vec<AccessGrant>> {
        let rows = sqlx::query(
            "SELECT * FROM access_grants WHERE user_id = ? AND backup_id = ? AND permission = ?",
        )
        .bind(user_id)
        .bind(subject_id)
        .bind(permission.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_grant).collect()
    }

    // Audit trail

    pub async fn insert_audit(
        &self,
        actor_id: &str,
        subject_id: &str,
        action: &str,
        outcome: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_log (id, timestamp, actor_id, subject_id, action, outcome)
            VALUES (?, ?, ?, ?, ?, ?)
        "#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(Utc::now())
        .bind(actor_id)
        .bind(subject_id)
        .bind(action)
        .bind(outcome)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn row_to_backup(row: &sqlx::sqlite::SqliteRow) -> Result<BackupRecord> {
    let kind_str: String = row.try_get("kind")?;
    let kind = BackupKind::parse(&kind_str).ok_or_else(|| BackupError::InvalidData {
        message: format!("unknown backup kind: {kind_str}"),
    })?;

    let storage_str: String = row.try_get("storage_kind")?;
    let storage_kind = StorageKind::parse(&storage_str).ok_or_else(|| BackupError::InvalidData {
        message: format!("unknown storage kind: {storage_str}"),
    })?;

    let status_str: String = row.try_get("status")?;
    let status = BackupStatus::parse(&status_str).ok_or_else(|| BackupError::InvalidData {
        message: format!("unknown backup status: {status_str}"),
    })?;

    let source_paths_json: String = row.try_get("source_paths")?;
    let verification_str: String = row.try_get("verification_status")?;

    Ok(BackupRecord {
        backup_id: row.try_get("backup_id")?,
        policy_id: row.try_get("policy_id")?,
        kind,
        created_at: row.try_get("created_at")?,
        size_bytes: row.try_get::<i64, _>("size_bytes")? as u64,
        checksum: row.try_get("checksum")?,
        encryption_key_id: row.try_get("encryption_key_id")?,
        compression_ratio: row.try_get("compression_ratio")?,
        source_paths: serde_json::from_str(&source_paths_json)?,
        remote_path: row.try_get("remote_path")?,
        storage_kind,
        status,
        error_message: row.try_get("error_message")?,
        verification_status: VerificationStatus::parse(&verification_str),
    })
}

fn row_to_recovery(row: &sqlx::sqlite::SqliteRow) -> Result<RecoveryRecord> {
    let kind_str: String = row.try_get("kind")?;
    let kind = RecoveryKind::parse(&kind_str).ok_or_else(|| BackupError::InvalidData {
        message: format!("unknown recovery kind: {kind_str}"),
    })?;

    let status_str: String = row.try_get("status")?;
    let status = RecoveryStatus::parse(&status_str).ok_or_else(|| BackupError::InvalidData {
        message: format!("unknown recovery status: {status_str}"),
    })?;

    let target_paths_json: String = row.try_get("target_paths")?;

    Ok(RecoveryRecord {
        recovery_id: row.try_get("recovery_id")?,
        backup_id: row.try_get("backup_id")?,
        kind,
        target_paths: serde_json::from_str(&target_paths_json)?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        status,
        error_message: row.try_get("error_message")?,
    })
}

fn row_to_grant(row: &sqlx::sqlite::SqliteRow) -> Result<AccessGrant> {
    let permission_str: String = row.try_get("permission")?;
    let permission =
        Permission::parse(&permission_str).ok_or_else(|| BackupError::InvalidData {
            message: format!("unknown permission: {permission_str}"),
        })?;

    Ok(AccessGrant {
        id: row.try_get("id")?,
        backup_id: row.try_get("backup_id")?,
        user_id: row.try_get("user_id")?,
        permission,
        granted_at: row.try_get("granted_at")?,
        expires_at: row.try_get("expires_at")?,
        granted_by: row.try_get("granted_by")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    async fn test_store() -> (tempfile::TempDir, MetadataStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::open(&dir.path().join("meta.db")).await.unwrap();
        store.initialize().await.unwrap();
        (dir, store)
    }

    fn sample_backup(id: &str, created_at: DateTime<Utc>) -> BackupRecord {
        BackupRecord {
            backup_id: id.to_string(),
            policy_id: "nightly".to_string(),
            kind: BackupKind::Full,
            created_at,
            size_bytes: 1024,
            checksum: "ab".repeat(32),
            encryption_key_id: Some("key-1".to_string()),
            compression_ratio: 0.4,
            source_paths: vec![PathBuf::from("/etc/app")],
            remote_path: format!("nightly/{id}"),
            storage_kind: StorageKind::Local,
            status: BackupStatus::Completed,
            error_message: None,
            verification_status: VerificationStatus::Unverified,
        }
    }

    #[tokio::test]
    async fn test_backup_insert_and_round_trip() {
        let (_dir, store) = test_store().await;
        let record = sample_backup("b-1", Utc::now());
        store.insert_backup(&record).await.unwrap();

        let fetched = store.get_backup("b-1").await.unwrap().unwrap();
        assert_eq!(fetched.policy_id, record.policy_id);
        assert_eq!(fetched.checksum, record.checksum);
        assert_eq!(fetched.source_paths, record.source_paths);
        assert_eq!(fetched.status, BackupStatus::Completed);
        assert_eq!(fetched.verification_status, VerificationStatus::Unverified);
    }

    #[tokio::test]
    async fn test_list_backups_newest_first_with_filter() {
        let (_dir, store) = test_store().await;
        let now = Utc::now();

        let mut old = sample_backup("b-old", now - chrono::Duration::hours(2));
        old.kind = BackupKind::Logs;
        store.insert_backup(&old).await.unwrap();
        store.insert_backup(&sample_backup("b-new", now)).await.unwrap();

        let all = store.list_backups(None, 10).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].backup_id, "b-new");

        let logs = store.list_backups(Some(BackupKind::Logs), 10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].backup_id, "b-old");
    }

    #[tokio::test]
    async fn test_update_backup_status() {
        let (_dir, store) = test_store().await;
        let mut record = sample_backup("b-1", Utc::now());
        store.insert_backup(&record).await.unwrap();

        record.status = BackupStatus::Failed;
        record.error_message = Some("upload failed".to_string());
        record.verification_status = VerificationStatus::Failed("checksum".to_string());
        store.update_backup(&record).await.unwrap();

        let fetched = store.get_backup("b-1").await.unwrap().unwrap();
        assert_eq!(fetched.status, BackupStatus::Failed);
        assert_eq!(fetched.error_message.as_deref(), Some("upload failed"));
        assert_eq!(
            fetched.verification_status,
            VerificationStatus::Failed("checksum".to_string())
        );
    }

    #[tokio::test]
    async fn test_grants_round_trip_and_revoke() {
        let (_dir, store) = test_store().await;
        let grant = AccessGrant {
            id: uuid::Uuid::new_v4().to_string(),
            backup_id: "b-1".to_string(),
            user_id: "alice".to_string(),
            permission: Permission::Restore,
            granted_at: Utc::now(),
            expires_at: None,
            granted_by: "admin".to_string(),
        };
        store.insert_grant(&grant).await.unwrap();

        let found = store
            .grants_for("alice", "b-1", Permission::Restore)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);

        // Different permission does not match.
        assert!(store
            .grants_for("alice", "b-1", Permission::Delete)
            .await
            .unwrap()
            .is_empty());

        store
            .revoke_grant("alice", "b-1", Permission::Restore)
            .await
            .unwrap();
        assert!(store
            .grants_for("alice", "b-1", Permission::Restore)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_recovery_round_trip() {
        let (_dir, store) = test_store().await;
        let mut record = RecoveryRecord {
            recovery_id: "r-1".to_string(),
            backup_id: "b-1".to_string(),
            kind: RecoveryKind::Full,
            target_paths: vec![PathBuf::from("/etc/app")],
            started_at: Utc::now(),
            completed_at: None,
            status: RecoveryStatus::InProgress,
            error_message: None,
        };
        store.insert_recovery(&record).await.unwrap();

        record.status = RecoveryStatus::Completed;
        record.completed_at = Some(Utc::now());
        store.update_recovery(&record).await.unwrap();

        let fetched = store.get_recovery("r-1").await.unwrap().unwrap();
        assert_eq!(fetched.status, RecoveryStatus::Completed);
        assert!(fetched.completed_at.is_some());
    }
}
