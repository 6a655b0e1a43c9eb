use std::path::Path;
use std::time::Duration;

use aws_config::retry::RetryConfig;
use aws_config::timeout::TimeoutConfig;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_smithy_types::byte_stream::Length;
use tokio::io::AsyncWriteExt;

use crate::adapters::block_on;
use crate::adapters::object_store::BlobStore;
use crate::runtime::storage_config::{StorageConfig, StorageInfo};
use crate::runtime::storage_keys::reference_url;

const MAX_ATTEMPTS: u32 = 10;
/// Files above this size are sent with multipart upload; a single PUT is
/// capped at 5 GiB by the S3 API.
const MULTIPART_THRESHOLD_BYTES: u64 = 64 * 1024 * 1024;
const MULTIPART_PART_BYTES: u64 = 64 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum StoreInitError {
    #[error("Invalid S3 credentials. Please check your access key id and secret access key.")]
    InvalidCredentials,
    #[error("Network volume '{0}' not found or not accessible.")]
    VolumeNotFound(String),
    #[error("Access denied. Please check your S3 API credentials and permissions.")]
    AccessDenied,
    #[error("S3 client initialization failed: {0}")]
    Unavailable(String),
}

/// Outcome of a `HeadObject` check. Callers only see a boolean; the variants
/// exist so transport failures get logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExistenceCheck {
    Found,
    Missing,
    Failed(String),
}

impl ExistenceCheck {
    pub fn into_exists(self, key: &str) -> bool {
        match self {
            Self::Found => true,
            Self::Missing => false,
            Self::Failed(error) => {
                tracing::error!(key, %error, "error checking object existence");
                false
            }
        }
    }
}

/// [`BlobStore`] over one RunPod network volume through its S3-compatible API.
#[derive(Debug, Clone)]
pub struct S3BlobStore {
    client: aws_sdk_s3::Client,
    config: StorageConfig,
}

impl S3BlobStore {
    /// Builds the client and checks the volume with `HeadBucket`.
    pub async fn connect(config: StorageConfig) -> Result<Self, StoreInitError> {
        let credentials = Credentials::new(
            config.access_key_id(),
            config.secret_access_key(),
            None,
            None,
            "runpod-network-volume",
        );
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region()))
            .endpoint_url(config.endpoint_url())
            .credentials_provider(credentials)
            .retry_config(RetryConfig::standard().with_max_attempts(MAX_ATTEMPTS))
            .timeout_config(
                TimeoutConfig::builder()
                    .read_timeout(Duration::from_secs(config.request_timeout_secs()))
                    .build(),
            )
            .load()
            .await;
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(true)
            .build();
        let client = aws_sdk_s3::Client::from_conf(s3_config);

        if let Err(error) = client
            .head_bucket()
            .bucket(config.bucket_id())
            .send()
            .await
        {
            let status = error.raw_response().map(|response| response.status().as_u16());
            let not_found = error
                .as_service_error()
                .map(|service_error| service_error.is_not_found())
                .unwrap_or(false);
            return Err(match (not_found, status) {
                (true, _) | (_, Some(404)) => {
                    StoreInitError::VolumeNotFound(config.bucket_id().to_string())
                }
                (_, Some(401)) => StoreInitError::InvalidCredentials,
                (_, Some(403)) => StoreInitError::AccessDenied,
                _ => StoreInitError::Unavailable(error.to_string()),
            });
        }

        tracing::info!(
            datacenter = %config.datacenter(),
            network_volume = config.bucket_id(),
            endpoint = config.endpoint_url(),
            "S3 storage initialized"
        );
        Ok(Self { client, config })
    }

    /// Counts every object in the volume. Returns `None` when the listing
    /// fails.
    pub fn storage_info(&self) -> Option<StorageInfo> {
        match block_on(self.list_objects("")) {
            Ok(objects) => Some(StorageInfo::summarize(
                &self.config,
                objects.into_iter().map(|(_, size)| size),
            )),
            Err(error) => {
                tracing::error!(%error, "failed to get storage info");
                None
            }
        }
    }

    fn bucket(&self) -> &str {
        self.config.bucket_id()
    }

    async fn head(&self, key: &str) -> ExistenceCheck {
        match self
            .client
            .head_object()
            .bucket(self.bucket())
            .key(key)
            .send()
            .await
        {
            Ok(_) => ExistenceCheck::Found,
            Err(error) => {
                let not_found = error
                    .as_service_error()
                    .map(|service_error| service_error.is_not_found())
                    .unwrap_or(false)
                    || error.raw_response().map(|response| response.status().as_u16())
                        == Some(404);
                if not_found {
                    ExistenceCheck::Missing
                } else {
                    ExistenceCheck::Failed(error.to_string())
                }
            }
        }
    }

    async fn put_file(&self, local_path: &Path, key: &str) -> Result<(), String> {
        let size = tokio::fs::metadata(local_path)
            .await
            .map_err(|error| format!("failed to stat {}: {error}", local_path.display()))?
            .len();
        if size > MULTIPART_THRESHOLD_BYTES {
            return self.put_file_multipart(local_path, key, size).await;
        }

        let body = ByteStream::from_path(local_path)
            .await
            .map_err(|error| format!("failed to open {}: {error}", local_path.display()))?;
        self.client
            .put_object()
            .bucket(self.bucket())
            .key(key)
            .body(body)
            .send()
            .await
            .map(|_| ())
            .map_err(|error| format!("failed to write object to s3: {error}"))
    }

    async fn put_file_multipart(
        &self,
        local_path: &Path,
        key: &str,
        size: u64,
    ) -> Result<(), String> {
        let upload = self
            .client
            .create_multipart_upload()
            .bucket(self.bucket())
            .key(key)
            .send()
            .await
            .map_err(|error| format!("failed to start multipart upload: {error}"))?;
        let upload_id = upload
            .upload_id()
            .ok_or_else(|| "multipart upload response did not include an upload id".to_string())?
            .to_string();

        let parts = match self.upload_parts(local_path, key, &upload_id, size).await {
            Ok(parts) => parts,
            Err(error) => {
                self.abort_multipart(key, &upload_id).await;
                return Err(error);
            }
        };

        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(parts))
            .build();
        if let Err(error) = self
            .client
            .complete_multipart_upload()
            .bucket(self.bucket())
            .key(key)
            .upload_id(&upload_id)
            .multipart_upload(completed)
            .send()
            .await
        {
            self.abort_multipart(key, &upload_id).await;
            return Err(format!("failed to complete multipart upload: {error}"));
        }
        Ok(())
    }

    async fn upload_parts(
        &self,
        local_path: &Path,
        key: &str,
        upload_id: &str,
        size: u64,
    ) -> Result<Vec<CompletedPart>, String> {
        let mut parts = Vec::new();
        let mut offset = 0u64;
        let mut part_number = 1i32;

        while offset < size {
            let length = MULTIPART_PART_BYTES.min(size - offset);
            let body = ByteStream::read_from()
                .path(local_path)
                .offset(offset)
                .length(Length::Exact(length))
                .build()
                .await
                .map_err(|error| format!("failed to read part {part_number}: {error}"))?;
            let output = self
                .client
                .upload_part()
                .bucket(self.bucket())
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(body)
                .send()
                .await
                .map_err(|error| format!("failed to upload part {part_number}: {error}"))?;

            parts.push(
                CompletedPart::builder()
                    .set_e_tag(output.e_tag().map(str::to_string))
                    .part_number(part_number)
                    .build(),
            );
            offset += length;
            part_number += 1;
        }

        Ok(parts)
    }

    async fn abort_multipart(&self, key: &str, upload_id: &str) {
        if let Err(error) = self
            .client
            .abort_multipart_upload()
            .bucket(self.bucket())
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
        {
            tracing::warn!(key, %error, "failed to abort multipart upload");
        }
    }

    async fn fetch_to_file(&self, key: &str, local_path: &Path) -> Result<(), String> {
        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|error| format!("failed to create {}: {error}", parent.display()))?;
        }

        let output = self
            .client
            .get_object()
            .bucket(self.bucket())
            .key(key)
            .send()
            .await
            .map_err(|error| format!("failed to read object from s3: {error}"))?;

        let reader = output.body.into_async_read();
        tokio::pin!(reader);
        let mut file = tokio::fs::File::create(local_path)
            .await
            .map_err(|error| format!("failed to create {}: {error}", local_path.display()))?;
        tokio::io::copy(&mut reader, &mut file)
            .await
            .map_err(|error| format!("failed to stream object to disk: {error}"))?;
        file.flush()
            .await
            .map_err(|error| format!("failed to flush {}: {error}", local_path.display()))
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<(String, u64)>, String> {
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(self.bucket())
            .prefix(prefix)
            .into_paginator()
            .send();

        let mut objects = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|error| format!("failed to list objects: {error}"))?;
            for object in page.contents() {
                if let Some(key) = object.key() {
                    let size = object.size().unwrap_or(0).max(0) as u64;
                    objects.push((key.to_string(), size));
                }
            }
        }
        Ok(objects)
    }
}

impl BlobStore for S3BlobStore {
    fn exists(&self, key: &str) -> bool {
        block_on(self.head(key)).into_exists(key)
    }

    fn upload_file(&self, local_path: &Path, key: &str) -> bool {
        if !local_path.is_file() {
            tracing::error!(local_path = %local_path.display(), "local file not found");
            return false;
        }

        let url = self.reference_url(key);
        tracing::info!(local_path = %local_path.display(), destination = %url, "uploading");
        match block_on(self.put_file(local_path, key)) {
            Ok(()) => {
                tracing::info!(destination = %url, "upload successful");
                true
            }
            Err(error) => {
                tracing::error!(destination = %url, %error, "upload failed");
                false
            }
        }
    }

    fn download_file(&self, key: &str, local_path: &Path) -> bool {
        let url = self.reference_url(key);
        tracing::info!(source = %url, local_path = %local_path.display(), "downloading");
        match block_on(self.fetch_to_file(key, local_path)) {
            Ok(()) => {
                tracing::info!(local_path = %local_path.display(), "download successful");
                true
            }
            Err(error) => {
                tracing::error!(source = %url, %error, "download failed");
                false
            }
        }
    }

    fn list_keys(&self, prefix: &str) -> Vec<String> {
        match block_on(self.list_objects(prefix)) {
            Ok(objects) => {
                tracing::info!(prefix, count = objects.len(), "listed objects");
                objects.into_iter().map(|(key, _)| key).collect()
            }
            Err(error) => {
                tracing::error!(prefix, %error, "list objects failed");
                Vec::new()
            }
        }
    }

    fn delete(&self, key: &str) -> bool {
        let url = self.reference_url(key);
        let result = block_on(async {
            self.client
                .delete_object()
                .bucket(self.bucket())
                .key(key)
                .send()
                .await
        });
        match result {
            Ok(_) => {
                tracing::info!(target_url = %url, "delete successful");
                true
            }
            Err(error) => {
                tracing::error!(target_url = %url, %error, "delete failed");
                false
            }
        }
    }

    fn reference_url(&self, key: &str) -> String {
        reference_url(self.bucket(), key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::storage_keys::checkpoint_object_key;

    /// Store whose endpoint refuses connections, with a single attempt per call.
    fn unreachable_store() -> S3BlobStore {
        let config = StorageConfig::new("key-id", "secret", "EU-RO-1", "vol-test", 5)
            .expect("config should build");
        let s3_config = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region()))
            .endpoint_url("http://127.0.0.1:1")
            .credentials_provider(Credentials::new("key-id", "secret", None, None, "test"))
            .retry_config(RetryConfig::standard().with_max_attempts(1))
            .force_path_style(true)
            .build();
        S3BlobStore {
            client: aws_sdk_s3::Client::from_conf(s3_config),
            config,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn transport_failures_become_false_or_empty() {
        let store = unreachable_store();

        assert!(!store.exists(&checkpoint_object_key()));
        assert!(store.list_keys("weights/").is_empty());
        assert!(!store.delete("results/job_1/out.mp4"));
        assert!(store.storage_info().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn upload_of_missing_local_file_is_false() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = unreachable_store();

        assert!(!store.upload_file(&dir.path().join("absent.mp4"), "results/job_1/absent.mp4"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn download_creates_parent_directories_before_failing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("weights/ckpts/model/w.pt");
        let store = unreachable_store();

        assert!(!store.download_file("weights/ckpts/model/w.pt", &target));
        assert!(target.parent().expect("parent").is_dir());
        assert!(!target.exists());
    }

    #[test]
    fn reference_url_uses_volume_as_bucket() {
        assert_eq!(
            unreachable_store().reference_url("results/job_1/out.mp4"),
            "s3://vol-test/results/job_1/out.mp4"
        );
    }

    #[test]
    fn missing_and_failed_checks_are_indistinguishable_to_callers() {
        assert!(ExistenceCheck::Found.into_exists("weights/a"));
        assert!(!ExistenceCheck::Missing.into_exists("weights/a"));
        assert!(!ExistenceCheck::Failed("connection reset".to_string()).into_exists("weights/a"));
    }

    #[test]
    fn init_errors_name_the_volume() {
        let error = StoreInitError::VolumeNotFound("vol-123".to_string());
        assert_eq!(
            error.to_string(),
            "Network volume 'vol-123' not found or not accessible."
        );
    }
}
