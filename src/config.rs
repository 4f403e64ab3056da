//! Engine configuration: storage backend settings, key file location,
//! metadata database path, and backup policy definitions.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

use crate::error::{BackupError, Result};
use crate::model::BackupPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path of the embedded SQLite metadata database.
    pub database_path: PathBuf,

    /// Path of the symmetric encryption key file (created on first use).
    pub key_file: PathBuf,

    /// Base directory managed by the local storage provider.
    pub local_storage_dir: PathBuf,

    /// Directory where pre-restore rollback snapshots are kept.
    pub rollback_dir: PathBuf,

    /// Root that archives are extracted under during a restore.
    pub restore_root: PathBuf,

    /// Fixed admin allowlist; these actors bypass the grant table.
    pub admin_users: Vec<String>,

    /// S3-compatible object store settings, when configured.
    pub object_store: Option<ObjectStoreConfig>,

    /// SFTP settings, when configured.
    pub sftp: Option<SftpConfig>,

    /// Backup policy definitions.
    pub policies: Vec<BackupPolicy>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStoreConfig {
    pub bucket: String,

    /// Region override; ambient AWS configuration is used when absent.
    pub region: Option<String>,

    /// Custom endpoint for S3-compatible stores (MinIO, Ceph RGW).
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SftpConfig {
    pub host: String,

    #[serde(default = "default_sftp_port")]
    pub port: u16,

    pub username: String,

    /// Password authentication; ignored when a private key is set.
    pub password: Option<String>,

    /// Private key authentication.
    pub private_key_path: Option<PathBuf>,

    /// Remote directory all objects are stored under.
    pub base_dir: String,
}

fn default_sftp_port() -> u16 {
    22
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("/var/lib/coffer/metadata.db"),
            key_file: PathBuf::from("/etc/coffer/backup.key"),
            local_storage_dir: PathBuf::from("/var/lib/coffer/backups"),
            rollback_dir: PathBuf::from("/var/lib/coffer/rollback"),
            restore_root: PathBuf::from("/"),
            admin_users: Vec::new(),
            object_store: None,
            sftp: None,
            policies: Vec::new(),
        }
    }
}

impl Config {
    /// Build a configuration from environment variables, falling back to
    /// defaults for anything unset. Policies are loaded from the TOML file
    /// named by `COFFER_POLICY_FILE`, when present.
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();

        if let Ok(path) = env::var("COFFER_DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }
        if let Ok(path) = env::var("COFFER_KEY_FILE") {
            config.key_file = PathBuf::from(path);
        }
        if let Ok(path) = env::var("COFFER_LOCAL_STORAGE_DIR") {
            config.local_storage_dir = PathBuf::from(path);
        }
        if let Ok(path) = env::var("COFFER_ROLLBACK_DIR") {
            config.rollback_dir = PathBuf::from(path);
        }
        if let Ok(path) = env::var("COFFER_RESTORE_ROOT") {
            config.restore_root = PathBuf::from(path);
        }
        if let Ok(users) = env::var("COFFER_ADMIN_USERS") {
            config.admin_users = users
                .split(',')
                .map(|u| u.trim().to_string())
                .filter(|u| !u.is_empty())
                .collect();
        }

        if let Ok(bucket) = env::var("COFFER_S3_BUCKET") {
            config.object_store = Some(ObjectStoreConfig {
                bucket,
                region: env::var("COFFER_S3_REGION").ok(),
                endpoint: env::var("COFFER_S3_ENDPOINT").ok(),
            });
        }

        if let Ok(host) = env::var("COFFER_SFTP_HOST") {
            let port = match env::var("COFFER_SFTP_PORT") {
                Ok(raw) => raw.parse::<u16>().map_err(|_| {
                    BackupError::Configuration(format!("invalid COFFER_SFTP_PORT: {raw}"))
                })?,
                Err(_) => default_sftp_port(),
            };
            config.sftp = Some(SftpConfig {
                host,
                port,
                username: env::var("COFFER_SFTP_USERNAME").map_err(|_| {
                    BackupError::Configuration(
                        "COFFER_SFTP_USERNAME is required when COFFER_SFTP_HOST is set".to_string(),
                    )
                })?,
                password: env::var("COFFER_SFTP_PASSWORD").ok(),
                private_key_path: env::var("COFFER_SFTP_KEY_FILE").ok().map(PathBuf::from),
                base_dir: env::var("COFFER_SFTP_BASE_DIR")
                    .unwrap_or_else(|_| "backups".to_string()),
            });
        }

        if let Ok(path) = env::var("COFFER_POLICY_FILE") {
            config.policies = load_policies(&PathBuf::from(path))?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for policy in &self.policies {
            if policy.policy_id.is_empty() {
                return Err(BackupError::Configuration(
                    "policy_id must not be empty".to_string(),
                ));
            }
            if !seen.insert(policy.policy_id.as_str()) {
                return Err(BackupError::Configuration(format!(
                    "duplicate policy_id: {}",
                    policy.policy_id
                )));
            }
            if policy.source_paths.is_empty() {
                return Err(BackupError::Configuration(format!(
                    "policy {} has no source paths",
                    policy.policy_id
                )));
            }
        }
        if let Some(sftp) = &self.sftp {
            if sftp.password.is_none() && sftp.private_key_path.is_none() {
                return Err(BackupError::Configuration(
                    "SFTP requires a password or a private key file".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct PolicyFile {
    #[serde(default)]
    policy: Vec<BackupPolicy>,
}

/// Load policy definitions from a TOML file containing `[[policy]]` tables.
pub fn load_policies(path: &std::path::Path) -> Result<Vec<BackupPolicy>> {
    let raw = std::fs::read_to_string(path)?;
    let file: PolicyFile = toml::from_str(&raw)
        .map_err(|e| BackupError::Configuration(format!("invalid policy file: {e}")))?;
    Ok(file.policy)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.restore_root, PathBuf::from("/"));
        assert!(config.object_store.is_none());
        assert!(config.sftp.is_none());
        assert!(config.policies.is_empty());
    }

    #[test]
    fn test_duplicate_policy_ids_rejected() {
        let policy_toml = r#"
            policy_id = "p1"
            source_paths = ["/etc"]
            destination_prefix = "p1"
        "#;
        let policy: BackupPolicy = toml::from_str(policy_toml).unwrap();
        let config = Config {
            policies: vec![policy.clone(), policy],
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sftp_without_credentials_rejected() {
        let config = Config {
            sftp: Some(SftpConfig {
                host: "backup.example.com".to_string(),
                port: 22,
                username: "coffer".to_string(),
                password: None,
                private_key_path: None,
                base_dir: "backups".to_string(),
            }),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial_test::serial]
    fn test_from_env_overrides() {
        env::set_var("COFFER_DATABASE_PATH", "/tmp/coffer-test/meta.db");
        env::set_var("COFFER_ADMIN_USERS", "alice, bob,");

        let config = Config::from_env().unwrap();
        assert_eq!(
            config.database_path,
            PathBuf::from("/tmp/coffer-test/meta.db")
        );
        assert_eq!(config.admin_users, vec!["alice", "bob"]);

        env::remove_var("COFFER_DATABASE_PATH");
        env::remove_var("COFFER_ADMIN_USERS");
    }

    #[test]
    #[serial_test::serial]
    fn test_sftp_env_requires_username() {
        env::set_var("COFFER_SFTP_HOST", "backup.example.com");
        env::remove_var("COFFER_SFTP_USERNAME");

        assert!(matches!(
            Config::from_env(),
            Err(BackupError::Configuration(_))
        ));

        env::remove_var("COFFER_SFTP_HOST");
    }

    #[test]
    fn test_load_policies_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policies.toml");
        std::fs::write(
            &path,
            r#"
            [[policy]]
            policy_id = "nightly-config"
            kind = "Configuration"
            source_paths = ["/etc/app"]
            destination_prefix = "nightly/config"
            storage_kind = "Local"
            retention_days = 14
            verify_after_create = true

            [[policy]]
            policy_id = "weekly-logs"
            kind = "Logs"
            source_paths = ["/var/log/app"]
            destination_prefix = "weekly/logs"
            encryption_enabled = false
            "#,
        )
        .unwrap();

        let policies = load_policies(&path).unwrap();
        assert_eq!(policies.len(), 2);
        assert_eq!(policies[0].policy_id, "nightly-config");
        assert_eq!(policies[0].retention_days, 14);
        assert!(policies[0].verify_after_create);
        assert!(!policies[1].encryption_enabled);
    }
}
