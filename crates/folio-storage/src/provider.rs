//! The storage provider contract implemented by every backend.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::StorageResult;

/// Streaming reader over a stored blob.
pub type BlobReader = Pin<Box<dyn AsyncRead + Send>>;

/// Uniform blob operations over a storage backend.
///
/// `exists` is infallible on purpose: a backend that cannot answer reports
/// `false`, the same as an absent object.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Opens the blob stored under `key` for streaming.
    async fn open(&self, key: &str) -> StorageResult<BlobReader>;

    /// Stores `body` under `key`, replacing any previous object.
    ///
    /// `body` can be re-read and its length is known before transfer starts.
    async fn save(&self, key: &str, body: Bytes) -> StorageResult<()>;

    /// Reports whether an object is stored under `key`.
    async fn exists(&self, key: &str) -> bool;

    /// Removes the object under `key`. Removing a missing key succeeds.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Short backend name used in logs.
    fn backend_name(&self) -> &'static str;
}

/// Reads the whole blob under `key` into memory.
pub async fn read_all(store: &dyn StorageProvider, key: &str) -> StorageResult<Bytes> {
    let mut reader = store.open(key).await?;
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).await?;
    Ok(Bytes::from(buf))
}
