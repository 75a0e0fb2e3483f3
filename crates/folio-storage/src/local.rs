//! Local filesystem backend jailed to a root directory.
//!
//! Keys are validated lexically, then every path that already exists is
//! canonicalized and checked against the canonical root, so a symlink inside
//! the root cannot be used to reach files outside it. Writes go to a temp file
//! in the destination directory and are renamed into place.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};
use crate::key::validate_key;
use crate::provider::{BlobReader, StorageProvider};

/// Storage backend over a directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Opens (creating if needed) the directory at `root` as a store.
    pub fn new(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        let root = root.canonicalize()?;
        info!(root = %root.display(), "LocalStore opened");
        Ok(Self { root })
    }

    /// Returns the canonical root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn lexical_path(&self, key: &str) -> StorageResult<PathBuf> {
        let key = validate_key(key)?;
        Ok(self.root.join(key))
    }

    /// Canonicalizes an existing path and requires it to stay under the root.
    async fn confine(&self, key: &str, path: &Path) -> StorageResult<PathBuf> {
        let canonical = tokio::fs::canonicalize(path)
            .await
            .map_err(|e| StorageError::from_io(key, e))?;
        if !canonical.starts_with(&self.root) {
            return Err(StorageError::InvalidKey {
                key: key.to_string(),
                reason: "resolves outside the storage root",
            });
        }
        Ok(canonical)
    }
}

#[async_trait]
impl StorageProvider for LocalStore {
    async fn open(&self, key: &str) -> StorageResult<BlobReader> {
        let path = self.lexical_path(key)?;
        let path = self.confine(key, &path).await?;
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| StorageError::from_io(key, e))?;
        if !meta.is_file() {
            return Err(StorageError::not_found(key));
        }
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| StorageError::from_io(key, e))?;
        Ok(Box::pin(file))
    }

    async fn save(&self, key: &str, body: Bytes) -> StorageResult<()> {
        let valid = validate_key(key)?;
        let (dirs, file_name) = match valid.rsplit_once('/') {
            Some((dirs, name)) => (Some(dirs), name),
            None => (None, valid),
        };

        // Create one directory level at a time so a symlinked component is
        // checked before anything is created beneath it.
        let mut parent = self.root.clone();
        for segment in dirs.into_iter().flat_map(|d| d.split('/')) {
            parent.push(segment);
            match tokio::fs::create_dir(&parent).await {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {}
                Err(err) => return Err(err.into()),
            }
            parent = self.confine(key, &parent).await?;
        }

        let final_path = parent.join(file_name);
        let tmp_path = parent.join(format!(".{}.tmp-{}", file_name, uuid::Uuid::new_v4()));

        let mut file = tokio::fs::File::create(&tmp_path).await?;
        let written = async {
            file.write_all(&body).await?;
            file.sync_all().await
        }
        .await;
        drop(file);
        if let Err(err) = written {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(err.into());
        }
        if let Err(err) = tokio::fs::rename(&tmp_path, &final_path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(err.into());
        }

        debug!(key, bytes = body.len(), "LocalStore saved");
        Ok(())
    }

    async fn exists(&self, key: &str) -> bool {
        let lookup = async {
            let path = self.lexical_path(key)?;
            let path = self.confine(key, &path).await?;
            let meta = tokio::fs::metadata(&path).await?;
            Ok::<bool, StorageError>(meta.is_file())
        };
        match lookup.await {
            Ok(found) => found,
            Err(err) => {
                if !err.is_not_found() {
                    debug!(key, error = %err, "LocalStore exists check failed");
                }
                false
            }
        }
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.lexical_path(key)?;
        let path = match self.confine(key, &path).await {
            Ok(path) => path,
            Err(err) if err.is_not_found() => return Ok(()),
            Err(err) => return Err(err),
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }
}
