//! Core domain types: backup policies, backup and recovery records, and
//! access grants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A named backup job definition. Policies are immutable once a backup
/// record references them; edits happen by replacing the definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupPolicy {
    pub policy_id: String,

    #[serde(default)]
    pub kind: BackupKind,

    pub source_paths: Vec<PathBuf>,

    /// Remote prefix the backup object is stored under.
    pub destination_prefix: String,

    #[serde(default)]
    pub storage_kind: StorageKind,

    #[serde(default = "default_true")]
    pub encryption_enabled: bool,

    #[serde(default = "default_true")]
    pub compression_enabled: bool,

    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Maximum archive size in bytes; 0 means unlimited.
    #[serde(default)]
    pub max_size_bytes: u64,

    #[serde(default)]
    pub verify_after_create: bool,

    #[serde(default)]
    pub access_policy: AccessPolicy,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessPolicy {
    #[serde(default)]
    pub admin_only: bool,

    #[serde(default)]
    pub require_strong_auth: bool,

    #[serde(default)]
    pub audit_all: bool,
}

fn default_true() -> bool {
    true
}

fn default_retention_days() -> u32 {
    30
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackupKind {
    #[default]
    Full,
    Incremental,
    Differential,
    Database,
    Configuration,
    Logs,
}

impl BackupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "Full",
            Self::Incremental => "Incremental",
            Self::Differential => "Differential",
            Self::Database => "Database",
            Self::Configuration => "Configuration",
            Self::Logs => "Logs",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Full" => Some(Self::Full),
            "Incremental" => Some(Self::Incremental),
            "Differential" => Some(Self::Differential),
            "Database" => Some(Self::Database),
            "Configuration" => Some(Self::Configuration),
            "Logs" => Some(Self::Logs),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageKind {
    #[default]
    Local,
    ObjectStore,
    Sftp,
}

impl StorageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "Local",
            Self::ObjectStore => "ObjectStore",
            Self::Sftp => "Sftp",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Local" => Some(Self::Local),
            "ObjectStore" => Some(Self::ObjectStore),
            "Sftp" => Some(Self::Sftp),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackupStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Verified,
}

impl BackupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::InProgress => "InProgress",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
            Self::Verified => "Verified",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Pending" => Some(Self::Pending),
            "InProgress" => Some(Self::InProgress),
            "Completed" => Some(Self::Completed),
            "Failed" => Some(Self::Failed),
            "Verified" => Some(Self::Verified),
            _ => None,
        }
    }

    /// Only completed or verified backups may be restored from.
    pub fn is_restorable(&self) -> bool {
        matches!(self, Self::Completed | Self::Verified)
    }
}

/// Outcome of the optional post-upload verification pass. The failed case
/// carries the reason so operators can decide remediation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationStatus {
    Unverified,
    Verified,
    Failed(String),
}

impl VerificationStatus {
    pub fn as_string(&self) -> String {
        match self {
            Self::Unverified => "unverified".to_string(),
            Self::Verified => "verified".to_string(),
            Self::Failed(reason) => format!("failed: {reason}"),
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "verified" => Self::Verified,
            _ if s.starts_with("failed: ") => {
                Self::Failed(s.trim_start_matches("failed: ").to_string())
            }
            _ => Self::Unverified,
        }
    }
}

/// One concrete backup instance, created at backup start and mutated
/// through status transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRecord {
    pub backup_id: String,
    pub policy_id: String,
    pub kind: BackupKind,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
    /// SHA-256 hex digest of the unencrypted archive bytes.
    pub checksum: String,
    /// Set when the stored object is encrypted.
    pub encryption_key_id: Option<String>,
    pub compression_ratio: f64,
    pub source_paths: Vec<PathBuf>,
    pub remote_path: String,
    pub storage_kind: StorageKind,
    pub status: BackupStatus,
    pub error_message: Option<String>,
    pub verification_status: VerificationStatus,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecoveryKind {
    #[default]
    Full,
    Partial,
    Database,
    Configuration,
    DisasterRecovery,
}

impl RecoveryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "Full",
            Self::Partial => "Partial",
            Self::Database => "Database",
            Self::Configuration => "Configuration",
            Self::DisasterRecovery => "DisasterRecovery",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Full" => Some(Self::Full),
            "Partial" => Some(Self::Partial),
            "Database" => Some(Self::Database),
            "Configuration" => Some(Self::Configuration),
            "DisasterRecovery" => Some(Self::DisasterRecovery),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecoveryStatus {
    NotRequired,
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl RecoveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotRequired => "NotRequired",
            Self::Pending => "Pending",
            Self::InProgress => "InProgress",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NotRequired" => Some(Self::NotRequired),
            "Pending" => Some(Self::Pending),
            "InProgress" => Some(Self::InProgress),
            "Completed" => Some(Self::Completed),
            "Failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// One restore attempt; terminal on Completed or Failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryRecord {
    pub recovery_id: String,
    pub backup_id: String,
    pub kind: RecoveryKind,
    pub target_paths: Vec<PathBuf>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: RecoveryStatus,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Permission {
    Create,
    Restore,
    Delete,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Restore => "restore",
            Self::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "create" => Some(Self::Create),
            "restore" => Some(Self::Restore),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

/// A scoped, optionally expiring grant; admin identities bypass the table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessGrant {
    pub id: String,
    /// The backup (or policy, for create) the grant applies to.
    pub backup_id: String,
    pub user_id: String,
    pub permission: Permission,
    pub granted_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub granted_by: String,
}

impl AccessGrant {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(expiry) if expiry <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_string_round_trips() {
        for status in [
            BackupStatus::Pending,
            BackupStatus::InProgress,
            BackupStatus::Completed,
            BackupStatus::Failed,
            BackupStatus::Verified,
        ] {
            assert_eq!(BackupStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(BackupStatus::parse("bogus"), None);
    }

    #[test]
    fn test_restorable_statuses() {
        assert!(BackupStatus::Completed.is_restorable());
        assert!(BackupStatus::Verified.is_restorable());
        assert!(!BackupStatus::Pending.is_restorable());
        assert!(!BackupStatus::InProgress.is_restorable());
        assert!(!BackupStatus::Failed.is_restorable());
    }

    #[test]
    fn test_verification_status_strings() {
        assert_eq!(VerificationStatus::Unverified.as_string(), "unverified");
        assert_eq!(VerificationStatus::Verified.as_string(), "verified");

        let failed = VerificationStatus::Failed("checksum mismatch".to_string());
        assert_eq!(failed.as_string(), "failed: checksum mismatch");
        assert_eq!(VerificationStatus::parse("failed: checksum mismatch"), failed);
        assert_eq!(
            VerificationStatus::parse("verified"),
            VerificationStatus::Verified
        );
        assert_eq!(
            VerificationStatus::parse("unverified"),
            VerificationStatus::Unverified
        );
    }

    #[test]
    fn test_grant_expiry() {
        let now = Utc::now();
        let grant = AccessGrant {
            id: "g-1".to_string(),
            backup_id: "b-1".to_string(),
            user_id: "alice".to_string(),
            permission: Permission::Restore,
            granted_at: now - chrono::Duration::days(2),
            expires_at: Some(now - chrono::Duration::days(1)),
            granted_by: "admin".to_string(),
        };
        assert!(grant.is_expired(now));

        let open_ended = AccessGrant {
            expires_at: None,
            ..grant
        };
        assert!(!open_ended.is_expired(now));
    }

    #[test]
    fn test_policy_defaults_from_toml() {
        let policy: BackupPolicy = toml::from_str(
            r#"
            policy_id = "nightly"
            source_paths = ["/etc/app"]
            destination_prefix = "nightly"
            "#,
        )
        .unwrap();

        assert_eq!(policy.kind, BackupKind::Full);
        assert_eq!(policy.storage_kind, StorageKind::Local);
        assert!(policy.encryption_enabled);
        assert!(policy.compression_enabled);
        assert_eq!(policy.retention_days, 30);
        assert_eq!(policy.max_size_bytes, 0);
        assert!(!policy.verify_after_create);
        assert!(!policy.access_policy.admin_only);
    }
}
