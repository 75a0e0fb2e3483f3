//! In-memory storage backend.
//!
//! Keeps objects in a map and counts every operation, so tests can assert how
//! often a code path touched storage.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{StorageError, StorageResult};
use crate::key::validate_key;
use crate::provider::{BlobReader, StorageProvider};

/// Operation counters for the memory store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStoreStats {
    /// Number of open operations.
    pub opens: u64,
    /// Number of save operations.
    pub saves: u64,
    /// Number of exists checks.
    pub exists_checks: u64,
    /// Number of delete operations.
    pub deletes: u64,
    /// Total bytes currently stored.
    pub bytes_stored: u64,
}

/// Storage backend holding every object in process memory.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<String, Bytes>>,
    stats: Mutex<MemoryStoreStats>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    /// Creates an empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of the operation counters.
    pub fn stats(&self) -> MemoryStoreStats {
        self.stats.lock().clone()
    }

    /// Returns the number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.lock().len()
    }

    /// Returns true when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.objects.lock().is_empty()
    }

    /// Returns a copy of the object under `key`, bypassing the counters.
    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.objects.lock().get(key).cloned()
    }

    /// Simulates an unreachable backend: every operation fails and `exists`
    /// reports false until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> StorageResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Backend {
                backend: "memory",
                reason: "store marked unavailable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl StorageProvider for MemoryStore {
    async fn open(&self, key: &str) -> StorageResult<BlobReader> {
        self.stats.lock().opens += 1;
        self.check_available()?;
        let key = validate_key(key)?;
        let data = self
            .objects
            .lock()
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::not_found(key))?;
        debug!(key, bytes = data.len(), "memory open");
        Ok(Box::pin(Cursor::new(data)))
    }

    async fn save(&self, key: &str, body: Bytes) -> StorageResult<()> {
        self.stats.lock().saves += 1;
        self.check_available()?;
        let key = validate_key(key)?;
        let size = body.len() as u64;
        let previous = self.objects.lock().insert(key.to_string(), body);

        let mut stats = self.stats.lock();
        let replaced = previous.map(|p| p.len() as u64).unwrap_or(0);
        stats.bytes_stored = stats.bytes_stored.saturating_sub(replaced).saturating_add(size);
        debug!(key, bytes = size, "memory save");
        Ok(())
    }

    async fn exists(&self, key: &str) -> bool {
        self.stats.lock().exists_checks += 1;
        if self.check_available().is_err() {
            return false;
        }
        match validate_key(key) {
            Ok(key) => self.objects.lock().contains_key(key),
            Err(_) => false,
        }
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.stats.lock().deletes += 1;
        self.check_available()?;
        let key = validate_key(key)?;
        let removed = self.objects.lock().remove(key);
        if let Some(data) = removed {
            let mut stats = self.stats.lock();
            stats.bytes_stored = stats.bytes_stored.saturating_sub(data.len() as u64);
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
