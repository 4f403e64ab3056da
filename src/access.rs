//! Permission checks and the audit trail for backup operations.
//!
//! Every orchestrator action is checked against the grant table first; an
//! actor with no matching unexpired grant is allowed only if they appear on
//! the fixed admin allowlist. Audit writes are fire-and-forget so a broken
//! audit table can never block a backup or a restore.

use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{BackupError, Result};
use crate::metadata::MetadataStore;
use crate::model::{AccessGrant, Permission};

pub struct AccessControl {
    store: Arc<MetadataStore>,
    admin_users: HashSet<String>,
}

impl AccessControl {
    pub fn new(store: Arc<MetadataStore>, admin_users: Vec<String>) -> Self {
        Self {
            store,
            admin_users: admin_users.into_iter().collect(),
        }
    }

    pub fn is_admin(&self, actor_id: &str) -> bool {
        self.admin_users.contains(actor_id)
    }

    /// True when `actor_id` holds an unexpired grant for `(subject_id,
    /// permission)` or is an admin.
    pub async fn check_permission(
        &self,
        actor_id: &str,
        subject_id: &str,
        permission: Permission,
    ) -> Result<bool> {
        let now = Utc::now();
        let grants = self.store.grants_for(actor_id, subject_id, permission).await?;
        if grants.iter().any(|g| !g.is_expired(now)) {
            return Ok(true);
        }
        Ok(self.admin_users.contains(actor_id))
    }

    /// Check and fail with `PermissionDenied` when the actor is not allowed.
    pub async fn require(
        &self,
        actor_id: &str,
        subject_id: &str,
        permission: Permission,
    ) -> Result<()> {
        if self.check_permission(actor_id, subject_id, permission).await? {
            Ok(())
        } else {
            warn!(
                "Denied '{}' on {} for actor {}",
                permission.as_str(),
                subject_id,
                actor_id
            );
            Err(BackupError::PermissionDenied {
                user_id: actor_id.to_string(),
                subject_id: subject_id.to_string(),
                permission: permission.as_str().to_string(),
            })
        }
    }

    pub async fn grant(
        &self,
        user_id: &str,
        subject_id: &str,
        permission: Permission,
        granted_by: &str,
        expires_at: Option<chrono::DateTime<Utc>>,
    ) -> Result<AccessGrant> {
        let grant = AccessGrant {
            id: Uuid::new_v4().to_string(),
            backup_id: subject_id.to_string(),
            user_id: user_id.to_string(),
            permission,
            granted_at: Utc::now(),
            expires_at,
            granted_by: granted_by.to_string(),
        };
        self.store.insert_grant(&grant).await?;
        info!(
            "Granted '{}' on {} to {} (by {})",
            permission.as_str(),
            subject_id,
            user_id,
            granted_by
        );
        Ok(grant)
    }

    pub async fn revoke(
        &self,
        user_id: &str,
        subject_id: &str,
        permission: Permission,
    ) -> Result<()> {
        self.store.revoke_grant(user_id, subject_id, permission).await?;
        info!(
            "Revoked '{}' on {} from {}",
            permission.as_str(),
            subject_id,
            user_id
        );
        Ok(())
    }

    /// Append an audit entry. Failures are logged and swallowed; the audit
    /// trail must never abort the operation it describes.
    pub async fn log_access(&self, actor_id: &str, subject_id: &str, action: &str, outcome: &str) {
        info!(
            actor = actor_id,
            subject = subject_id,
            action,
            outcome,
            "audit"
        );
        if let Err(e) = self
            .store
            .insert_audit(actor_id, subject_id, action, outcome)
            .await
        {
            warn!("Failed to persist audit entry for {actor_id}/{action}: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn control_with(admins: Vec<&str>) -> (tempfile::TempDir, AccessControl) {
        let dir = tempfile::tempdir().unwrap();
        let store = MetadataStore::open(&dir.path().join("meta.db")).await.unwrap();
        store.initialize().await.unwrap();
        let control = AccessControl::new(
            Arc::new(store),
            admins.into_iter().map(String::from).collect(),
        );
        (dir, control)
    }

    #[tokio::test]
    async fn test_grant_allows_and_revoke_denies() {
        let (_dir, control) = control_with(vec![]).await;

        assert!(!control
            .check_permission("alice", "b-1", Permission::Restore)
            .await
            .unwrap());

        control
            .grant("alice", "b-1", Permission::Restore, "admin", None)
            .await
            .unwrap();
        assert!(control
            .check_permission("alice", "b-1", Permission::Restore)
            .await
            .unwrap());

        // The grant is scoped to its permission and subject.
        assert!(!control
            .check_permission("alice", "b-1", Permission::Delete)
            .await
            .unwrap());
        assert!(!control
            .check_permission("alice", "b-2", Permission::Restore)
            .await
            .unwrap());

        control
            .revoke("alice", "b-1", Permission::Restore)
            .await
            .unwrap();
        assert!(!control
            .check_permission("alice", "b-1", Permission::Restore)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_admin_bypasses_grant_table() {
        let (_dir, control) = control_with(vec!["root-op"]).await;
        assert!(control
            .check_permission("root-op", "anything", Permission::Delete)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_expired_grant_is_ignored() {
        let (_dir, control) = control_with(vec![]).await;
        control
            .grant(
                "bob",
                "b-1",
                Permission::Create,
                "admin",
                Some(Utc::now() - chrono::Duration::hours(1)),
            )
            .await
            .unwrap();

        assert!(!control
            .check_permission("bob", "b-1", Permission::Create)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_require_returns_permission_denied() {
        let (_dir, control) = control_with(vec![]).await;
        let err = control
            .require("mallory", "b-1", Permission::Delete)
            .await
            .unwrap_err();
        assert!(matches!(err, BackupError::PermissionDenied { .. }));
    }
}
