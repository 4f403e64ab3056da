//! Whole-buffer symmetric encryption for archive bytes.
//!
//! A single AES-256-GCM key is generated on first use and persisted with
//! owner-only permissions; later starts reuse it. Each ciphertext carries
//! its random 96-bit nonce as a prefix. Key rotation is out of scope: one
//! active key exists at a time, identified by the SHA-256 of its raw bytes.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::{debug, info};

use crate::error::{BackupError, Result};

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

pub struct CryptoUnit {
    cipher: Aes256Gcm,
    key_id: String,
}

impl CryptoUnit {
    /// Load the key at `key_path`, generating and persisting a fresh one
    /// (mode 0600) if the file does not exist yet.
    pub fn initialize(key_path: &Path) -> Result<Self> {
        let key_bytes = if key_path.exists() {
            let bytes = std::fs::read(key_path)?;
            if bytes.len() != KEY_LEN {
                return Err(BackupError::Crypto {
                    message: format!(
                        "key file {} is {} bytes, expected {KEY_LEN}",
                        key_path.display(),
                        bytes.len()
                    ),
                });
            }
            debug!("Loaded existing encryption key from {}", key_path.display());
            bytes
        } else {
            Self::generate_key_file(key_path)?
        };

        let key_id = hex::encode(Sha256::digest(&key_bytes));
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes));

        Ok(Self { cipher, key_id })
    }

    fn generate_key_file(key_path: &Path) -> Result<Vec<u8>> {
        use rand::RngCore;

        info!(
            "Encryption key not found, generating new key at {}",
            key_path.display()
        );

        let mut key_bytes = vec![0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut key_bytes);

        if let Some(parent) = key_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(key_path, &key_bytes)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(key_path)?.permissions();
            perms.set_mode(0o600);
            std::fs::set_permissions(key_path, perms)?;
        }

        Ok(key_bytes)
    }

    /// Identifier of the active key, stored on each encrypted backup record.
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Encrypt a whole buffer; the returned bytes are `nonce || ciphertext`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| BackupError::Crypto {
                message: "encryption failed".to_string(),
            })?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt a buffer produced by [`encrypt`](Self::encrypt). Corrupt or
    /// truncated input is rejected.
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < NONCE_LEN + TAG_LEN {
            return Err(BackupError::Crypto {
                message: format!("ciphertext too short: {} bytes", data.len()),
            });
        }

        let (nonce, ciphertext) = data.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| BackupError::Crypto {
                message: "decryption failed: wrong key or corrupt ciphertext".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_in(dir: &tempfile::TempDir) -> CryptoUnit {
        CryptoUnit::initialize(&dir.path().join("backup.key")).unwrap()
    }

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let crypto = unit_in(&dir);

        let plaintext = b"archive bytes of arbitrary content \x00\x01\x02";
        let ciphertext = crypto.encrypt(plaintext).unwrap();
        assert_ne!(&ciphertext[NONCE_LEN..], plaintext.as_slice());
        assert_eq!(crypto.decrypt(&ciphertext).unwrap(), plaintext);
    }

    #[test]
    fn test_key_persisted_and_reused() {
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("backup.key");

        let first = CryptoUnit::initialize(&key_path).unwrap();
        let ciphertext = first.encrypt(b"data").unwrap();

        // Second initialization loads the same key.
        let second = CryptoUnit::initialize(&key_path).unwrap();
        assert_eq!(first.key_id(), second.key_id());
        assert_eq!(second.decrypt(&ciphertext).unwrap(), b"data");
    }

    #[cfg(unix)]
    #[test]
    fn test_key_file_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("backup.key");
        CryptoUnit::initialize(&key_path).unwrap();

        let mode = std::fs::metadata(&key_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_tampered_ciphertext_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let crypto = unit_in(&dir);

        let mut ciphertext = crypto.encrypt(b"data").unwrap();
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0xff;
        assert!(matches!(
            crypto.decrypt(&ciphertext),
            Err(BackupError::Crypto { .. })
        ));
    }

    #[test]
    fn test_truncated_ciphertext_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let crypto = unit_in(&dir);
        assert!(crypto.decrypt(&[0u8; 8]).is_err());
    }

    #[test]
    fn test_wrong_key_length_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("backup.key");
        std::fs::write(&key_path, b"short").unwrap();
        assert!(matches!(
            CryptoUnit::initialize(&key_path),
            Err(BackupError::Crypto { .. })
        ));
    }
}
