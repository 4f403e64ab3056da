//! S3-compatible object store backend.
//!
//! Credentials and region come from ambient AWS configuration (environment,
//! profile, instance metadata); a custom endpoint supports MinIO-style
//! deployments. No local state is kept.

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use std::path::Path;
use tracing::{debug, info};

use super::{StorageError, StorageProvider};
use crate::config::ObjectStoreConfig;

pub struct ObjectStoreStorage {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl ObjectStoreStorage {
    pub async fn connect(config: &ObjectStoreConfig) -> Result<Self, StorageError> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }
        let shared = loader.load().await;

        let client = match &config.endpoint {
            Some(endpoint) => {
                let conf = aws_sdk_s3::config::Builder::from(&shared)
                    .endpoint_url(endpoint)
                    .force_path_style(true)
                    .build();
                aws_sdk_s3::Client::from_conf(conf)
            }
            None => aws_sdk_s3::Client::new(&shared),
        };

        info!("Object store client initialized: bucket={}", config.bucket);
        Ok(Self {
            client,
            bucket: config.bucket.clone(),
        })
    }

    fn key(remote_path: &str) -> &str {
        remote_path.trim_start_matches('/')
    }
}

#[async_trait]
impl StorageProvider for ObjectStoreStorage {
    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<(), StorageError> {
        let body = ByteStream::from_path(local_path)
            .await
            .map_err(|e| StorageError::new("failed to read upload payload", e))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(Self::key(remote_path))
            .body(body)
            .send()
            .await
            .map_err(|e| StorageError::new(format!("S3 upload of {remote_path} failed"), e))?;

        debug!("Uploaded s3://{}/{}", self.bucket, Self::key(remote_path));
        Ok(())
    }

    async fn download(&self, remote_path: &str, local_path: &Path) -> Result<(), StorageError> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(Self::key(remote_path))
            .send()
            .await
            .map_err(|e| StorageError::new(format!("S3 download of {remote_path} failed"), e))?;

        let data = resp
            .body
            .collect()
            .await
            .map_err(|e| StorageError::new("S3 body read failed", e))?
            .into_bytes();

        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::new("failed to create download directory", e))?;
        }
        tokio::fs::write(local_path, &data)
            .await
            .map_err(|e| StorageError::new("failed to write downloaded object", e))?;
        Ok(())
    }

    async fn delete(&self, remote_path: &str) -> Result<(), StorageError> {
        // S3 DeleteObject succeeds for keys that do not exist.
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(Self::key(remote_path))
            .send()
            .await
            .map_err(|e| StorageError::new(format!("S3 delete of {remote_path} failed"), e))?;
        Ok(())
    }
}
