//! Bidirectional mapping between asset paths and the opaque identifiers that
//! replace them in rendered output.
//!
//! The rendering side calls [`AssetRegistry::obfuscate`] while rewriting asset
//! references; the delivery side calls [`AssetRegistry::resolve`] to find the
//! source object again. Entries are never removed.

use std::collections::HashMap;
use std::sync::Arc;

use folio_storage::{BlobReader, StorageProvider};
use parking_lot::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::asset_id::AssetId;
use crate::error::{MediaError, MediaResult};

#[derive(Default)]
struct AssetMaps {
    by_path: HashMap<String, AssetId>,
    by_id: HashMap<AssetId, String>,
}

/// Registry of every asset path referenced so far.
pub struct AssetRegistry {
    store: Arc<dyn StorageProvider>,
    namespace: Uuid,
    maps: RwLock<AssetMaps>,
}

impl AssetRegistry {
    /// Creates an empty registry whose identifiers derive from `namespace`.
    pub fn new(store: Arc<dyn StorageProvider>, namespace: Uuid) -> Self {
        Self {
            store,
            namespace,
            maps: RwLock::new(AssetMaps::default()),
        }
    }

    /// Returns the identifier for `path`, issuing one on first use.
    pub fn obfuscate(&self, path: &str) -> MediaResult<AssetId> {
        if path.trim().is_empty() {
            return Err(MediaError::InvalidInput("asset path must not be empty".into()));
        }
        let normalized = normalize_path(path)?;

        let existing = self.maps.read().by_path.get(&normalized).copied();
        if let Some(id) = existing {
            return Ok(id);
        }

        let id = AssetId::derive(&self.namespace, &normalized);
        let mut maps = self.maps.write();
        // Another caller may have won the race between the two locks.
        if let Some(existing) = maps.by_path.get(&normalized) {
            return Ok(*existing);
        }
        maps.by_id.insert(id, normalized.clone());
        debug!(path = %normalized, %id, "asset registered");
        maps.by_path.insert(normalized, id);
        Ok(id)
    }

    /// Returns the normalized path an identifier was issued for.
    pub fn resolve(&self, id: &AssetId) -> MediaResult<String> {
        if id.is_nil() {
            return Err(MediaError::InvalidInput("asset id must not be nil".into()));
        }
        self.maps
            .read()
            .by_id
            .get(id)
            .cloned()
            .ok_or_else(|| MediaError::NotFound(format!("asset {id}")))
    }

    /// Opens the source object behind an identifier.
    pub async fn retrieve(&self, id: &AssetId) -> MediaResult<BlobReader> {
        let path = self.resolve(id)?;
        Ok(self.store.open(&path).await?)
    }

    /// Number of registered assets.
    pub fn len(&self) -> usize {
        self.maps.read().by_id.len()
    }

    /// Returns true when no asset has been registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Lexically cleans a `/`-separated path into a store-relative key.
///
/// Repeated separators and `.` segments are dropped, a leading `/` is
/// ignored, and `..` cancels the preceding segment. Climbing above the root
/// or cleaning down to nothing is `InvalidInput`.
pub fn normalize_path(path: &str) -> MediaResult<String> {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err(MediaError::InvalidInput(format!(
                        "asset path {path:?} escapes the store root"
                    )));
                }
            }
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        return Err(MediaError::InvalidInput(format!(
            "asset path {path:?} names no object"
        )));
    }
    Ok(parts.join("/"))
}
