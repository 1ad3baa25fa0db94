//! # Object Storage Handoff
//!
//! Completed segment files are handed off for upload through the narrow
//! `ObjectUploader` capability. Uploads are best-effort by contract: the
//! caller never learns about failures, which are logged here and nowhere
//! else. Dispatch is detached — the upload task outlives the connection that
//! produced the file, so a client that vanishes mid-stream still gets its
//! final segment pushed.
//!
//! The production implementation owns every provider-specific concern
//! (credential chain, region, endpoint override, path-style addressing); the
//! rest of the server only ever sees `upload(path, key)`.

use crate::config::{ProviderConfig, StorageConfig};
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Capability handed to each session for segment upload.
///
/// Implementations must be callable from many sessions at once and must
/// never surface an error: a failed upload is logged and dropped.
pub trait ObjectUploader: Send + Sync {
    /// Upload the file at `path` under `key`, detached from the caller.
    fn upload(&self, path: PathBuf, key: String);
}

/// Compute the object key for an uploaded segment file:
/// `{prefix}/[{hwid}/]{filename}` with the prefix stripped of surrounding
/// whitespace and slashes.
pub fn object_key(prefix: &str, hwid: Option<&str>, filename: &str) -> String {
    let prefix = prefix.trim().trim_matches('/');
    match (prefix.is_empty(), hwid) {
        (false, Some(hwid)) => format!("{}/{}/{}", prefix, hwid, filename),
        (false, None) => format!("{}/{}", prefix, filename),
        (true, Some(hwid)) => format!("{}/{}", hwid, filename),
        (true, None) => filename.to_string(),
    }
}

/// S3 (or S3-compatible) backed uploader.
#[derive(Clone)]
pub struct S3Uploader {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3Uploader {
    /// Build a client from the storage configuration. For the
    /// `s3_compatible` provider the endpoint URL and path-style flag are
    /// applied on top of the default credential/region chain.
    pub async fn from_config(storage: &StorageConfig) -> Self {
        let base = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(storage.region.clone()))
            .load()
            .await;

        let mut builder = aws_sdk_s3::config::Builder::from(&base);
        if let ProviderConfig::S3Compatible { service_url, force_path_style } = &storage.provider {
            builder = builder.endpoint_url(service_url.clone()).force_path_style(*force_path_style);
        }

        Self { client: aws_sdk_s3::Client::from_conf(builder.build()), bucket: storage.bucket.clone() }
    }
}

impl ObjectUploader for S3Uploader {
    fn upload(&self, path: PathBuf, key: String) {
        let client = self.client.clone();
        let bucket = self.bucket.clone();

        tokio::spawn(async move {
            let body = match ByteStream::from_path(&path).await {
                Ok(body) => body,
                Err(err) => {
                    warn!("skipping upload, cannot read {}: {}", path.display(), DisplayErrorContext(&err));
                    return;
                }
            };

            match client.put_object().bucket(&bucket).key(&key).body(body).send().await {
                Ok(_) => info!("uploaded {} as s3://{}/{}", path.display(), bucket, key),
                Err(err) => {
                    warn!("upload of {} failed: {}", path.display(), DisplayErrorContext(&err));
                }
            }
        });
    }
}

/// Uploader used when object storage is disabled; keeps the handoff path
/// identical while doing nothing.
pub struct DisabledUploader;

impl ObjectUploader for DisabledUploader {
    fn upload(&self, path: PathBuf, key: String) {
        debug!("storage disabled, keeping {} local (key would be {})", path.display(), key);
    }
}
