//! SFTP storage backend.
//!
//! Every operation opens its own TCP transport and SSH session and drops
//! them when the call ends, error or not; there is no connection pool to
//! leak. The `ssh2` API is synchronous, so each call runs on the blocking
//! thread pool.

use async_trait::async_trait;
use ssh2::Session;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{StorageError, StorageProvider};
use crate::config::SftpConfig;

pub struct SftpStorage {
    config: SftpConfig,
}

impl SftpStorage {
    pub fn new(config: SftpConfig) -> Self {
        Self { config }
    }

    fn remote_file(&self, remote_path: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_dir.trim_end_matches('/'),
            remote_path.trim_start_matches('/')
        )
    }
}

fn open_session(config: &SftpConfig) -> Result<Session, StorageError> {
    let tcp = TcpStream::connect((config.host.as_str(), config.port))
        .map_err(|e| StorageError::new(format!("SFTP connect to {} failed", config.host), e))?;

    let mut session =
        Session::new().map_err(|e| StorageError::new("SFTP session setup failed", e))?;
    session.set_tcp_stream(tcp);
    session
        .handshake()
        .map_err(|e| StorageError::new("SFTP handshake failed", e))?;

    if let Some(key_path) = &config.private_key_path {
        session
            .userauth_pubkey_file(&config.username, None, key_path, None)
            .map_err(|e| StorageError::new("SFTP key authentication failed", e))?;
    } else if let Some(password) = &config.password {
        session
            .userauth_password(&config.username, password)
            .map_err(|e| StorageError::new("SFTP password authentication failed", e))?;
    } else {
        return Err(StorageError::message(
            "SFTP requires a password or private key",
        ));
    }

    Ok(session)
}

/// Create each directory component of `path`'s parent, ignoring failures
/// for components that already exist.
fn ensure_remote_dirs(sftp: &ssh2::Sftp, path: &Path) -> Result<(), StorageError> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };

    let mut current = PathBuf::new();
    for component in parent.components() {
        current.push(component);
        if sftp.stat(&current).is_err() {
            let _ = sftp.mkdir(&current, 0o755);
        }
    }
    Ok(())
}

#[async_trait]
impl StorageProvider for SftpStorage {
    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<(), StorageError> {
        let config = self.config.clone();
        let remote = PathBuf::from(self.remote_file(remote_path));
        let local = local_path.to_path_buf();

        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            let data = std::fs::read(&local)
                .map_err(|e| StorageError::new("failed to read upload payload", e))?;

            let session = open_session(&config)?;
            let sftp = session
                .sftp()
                .map_err(|e| StorageError::new("SFTP subsystem open failed", e))?;

            ensure_remote_dirs(&sftp, &remote)?;
            let mut file = sftp
                .create(&remote)
                .map_err(|e| StorageError::new(format!("SFTP create {} failed", remote.display()), e))?;
            file.write_all(&data)
                .map_err(|e| StorageError::new("SFTP write failed", e))?;

            debug!("Uploaded {} bytes to sftp:{}", data.len(), remote.display());
            Ok(())
            // Session and transport drop here, closing the connection.
        })
        .await
        .map_err(|e| StorageError::message(format!("SFTP upload task failed: {e}")))?
    }

    async fn download(&self, remote_path: &str, local_path: &Path) -> Result<(), StorageError> {
        let config = self.config.clone();
        let remote = PathBuf::from(self.remote_file(remote_path));
        let local = local_path.to_path_buf();

        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            let session = open_session(&config)?;
            let sftp = session
                .sftp()
                .map_err(|e| StorageError::new("SFTP subsystem open failed", e))?;

            let mut file = sftp
                .open(&remote)
                .map_err(|e| StorageError::new(format!("SFTP open {} failed", remote.display()), e))?;
            let mut data = Vec::new();
            file.read_to_end(&mut data)
                .map_err(|e| StorageError::new("SFTP read failed", e))?;

            if let Some(parent) = local.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StorageError::new("failed to create download directory", e))?;
            }
            std::fs::write(&local, &data)
                .map_err(|e| StorageError::new("failed to write downloaded object", e))?;
            Ok(())
        })
        .await
        .map_err(|e| StorageError::message(format!("SFTP download task failed: {e}")))?
    }

    async fn delete(&self, remote_path: &str) -> Result<(), StorageError> {
        let config = self.config.clone();
        let remote = PathBuf::from(self.remote_file(remote_path));

        tokio::task::spawn_blocking(move || -> Result<(), StorageError> {
            let session = open_session(&config)?;
            let sftp = session
                .sftp()
                .map_err(|e| StorageError::new("SFTP subsystem open failed", e))?;

            match sftp.unlink(&remote) {
                Ok(()) => Ok(()),
                // Already gone counts as deleted.
                Err(_) if sftp.stat(&remote).is_err() => Ok(()),
                Err(e) => Err(StorageError::new(
                    format!("SFTP delete {} failed", remote.display()),
                    e,
                )),
            }
        })
        .await
        .map_err(|e| StorageError::message(format!("SFTP delete task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_paths_are_rooted_at_base_dir() {
        let storage = SftpStorage::new(SftpConfig {
            host: "backup.example.com".to_string(),
            port: 22,
            username: "coffer".to_string(),
            password: Some("secret".to_string()),
            private_key_path: None,
            base_dir: "/srv/backups/".to_string(),
        });

        assert_eq!(storage.remote_file("nightly/b-1"), "/srv/backups/nightly/b-1");
        assert_eq!(storage.remote_file("/nightly/b-1"), "/srv/backups/nightly/b-1");
    }
}
