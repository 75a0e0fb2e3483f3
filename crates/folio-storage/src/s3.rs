//! S3-compatible object store backend.
//!
//! Targets a single bucket through an explicit endpoint with static
//! credentials and path-style addressing, which is what self-hosted stores
//! (Garage, MinIO) expect. `exists` is a `HeadObject` request.

use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{StorageError, StorageResult};
use crate::key::validate_key;
use crate::provider::{BlobReader, StorageProvider};

/// Connection settings for an S3-compatible bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Config {
    /// Endpoint URL, e.g. `http://localhost:3900`.
    pub endpoint: String,
    /// Region name sent with signed requests.
    pub region: String,
    /// Bucket holding every object.
    pub bucket: String,
    /// Access key id.
    #[serde(default)]
    pub access_key: String,
    /// Secret access key.
    #[serde(default)]
    pub secret_key: String,
    /// Prefix prepended to every key (a trailing `/` is added when missing).
    #[serde(default)]
    pub key_prefix: String,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:3900".to_string(),
            region: "garage".to_string(),
            bucket: String::new(),
            access_key: String::new(),
            secret_key: String::new(),
            key_prefix: String::new(),
        }
    }
}

/// Storage backend over one S3 bucket.
pub struct S3Store {
    client: Client,
    bucket: String,
    key_prefix: String,
}

impl S3Store {
    /// Builds a client for the configured endpoint. No request is sent.
    pub fn new(config: &S3Config) -> Self {
        let credentials = Credentials::new(
            config.access_key.clone(),
            config.secret_key.clone(),
            None,
            None,
            "folio-static",
        );
        let sdk_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .endpoint_url(config.endpoint.clone())
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        info!(
            "S3Store created: endpoint={}, bucket={}",
            config.endpoint, config.bucket
        );
        Self {
            client: Client::from_conf(sdk_config),
            bucket: config.bucket.clone(),
            key_prefix: normalize_prefix(&config.key_prefix),
        }
    }

    /// Returns the bucket name.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Maps a validated storage key to the object key inside the bucket.
    pub fn object_key(&self, key: &str) -> StorageResult<String> {
        let key = validate_key(key)?;
        Ok(format!("{}{}", self.key_prefix, key))
    }
}

fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}/", trimmed)
    }
}

fn backend_error(err: impl std::fmt::Display) -> StorageError {
    StorageError::Backend {
        backend: "s3",
        reason: err.to_string(),
    }
}

#[async_trait]
impl StorageProvider for S3Store {
    async fn open(&self, key: &str) -> StorageResult<BlobReader> {
        let object_key = self.object_key(key)?;
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .send()
            .await
            .map_err(|err| match err.as_service_error() {
                Some(service) if service.is_no_such_key() => StorageError::not_found(key),
                _ => backend_error(DisplayErrorContext(&err)),
            })?;
        debug!(key = %object_key, "S3 open");
        Ok(Box::pin(output.body.into_async_read()))
    }

    async fn save(&self, key: &str, body: Bytes) -> StorageResult<()> {
        let object_key = self.object_key(key)?;
        let size = body.len();
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .content_length(size as i64)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|err| {
                warn!(key = %object_key, error = %DisplayErrorContext(&err), "S3 put failed");
                backend_error(DisplayErrorContext(&err))
            })?;
        debug!(key = %object_key, bytes = size, "S3 save");
        Ok(())
    }

    async fn exists(&self, key: &str) -> bool {
        let Ok(object_key) = self.object_key(key) else {
            return false;
        };
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .send()
            .await
        {
            Ok(_) => true,
            Err(err) => {
                debug!(key = %object_key, error = %DisplayErrorContext(&err), "S3 head request negative");
                false
            }
        }
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let object_key = self.object_key(key)?;
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .send()
            .await
            .map_err(|err| backend_error(DisplayErrorContext(&err)))?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }
}
