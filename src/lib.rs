//! Coffer is a backup and disaster-recovery engine: it collects files from
//! policy-defined source paths, packs and encrypts them, verifies integrity
//! via checksums, ships them to a pluggable storage backend (local disk,
//! S3-compatible object store, SFTP), and restores them later with a
//! safety-net rollback snapshot of the current state.
//!
//! The [`engine::BackupEngine`] facade is the intended entry point for
//! schedulers and operator tooling.

pub mod access;
pub mod archive;
pub mod backup;
pub mod config;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod metadata;
pub mod model;
pub mod recovery;
pub mod storage;

pub use access::AccessControl;
pub use backup::{BackupOrchestrator, BackupStatistics};
pub use config::Config;
pub use crypto::CryptoUnit;
pub use engine::{BackupEngine, OperationOutcome};
pub use error::{BackupError, Result};
pub use metadata::MetadataStore;
pub use model::{
    AccessGrant, BackupKind, BackupPolicy, BackupRecord, BackupStatus, Permission, RecoveryKind,
    RecoveryRecord, RecoveryStatus, StorageKind, VerificationStatus,
};
pub use recovery::RecoveryOrchestrator;
pub use storage::{StorageError, StorageProvider};

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber. Filtering follows `RUST_LOG`,
/// defaulting to `info`. Safe to call more than once; later calls are no-ops.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
