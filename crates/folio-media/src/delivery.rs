//! Cache-first asset delivery.
//!
//! A request names a variant as `"<identifier>_<width>"`. A stored variant is
//! served directly; otherwise the original source is streamed and every
//! supported width is scheduled in the background.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use folio_storage::{BlobReader, StorageProvider};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, warn, Span};

use crate::asset_id::{AssetId, VariantKey, VariantWidth};
use crate::error::{MediaError, MediaResult};
use crate::pipeline::{VariantJob, VariantPipeline};
use crate::registry::AssetRegistry;

/// Cache directive sent with stored variants, whose keys never change content.
pub const CACHE_FOR_A_YEAR: &str = "public, max-age=31536000, immutable";

/// Content type of every stored variant.
pub const VARIANT_CONTENT_TYPE: &str = "image/webp";

/// Whether a response came from a stored variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// A stored variant was served.
    Hit,
    /// The original source was served.
    Miss,
}

impl CacheStatus {
    /// Value of the `X-Cache` header.
    pub fn as_header(self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
        }
    }
}

/// A resolved response body and its metadata.
pub struct Delivery {
    /// Hit or miss.
    pub cache_status: CacheStatus,
    /// MIME type of `body`.
    pub content_type: &'static str,
    /// Cache directive, set on hits only.
    pub cache_control: Option<&'static str>,
    /// Streamed content.
    pub body: BlobReader,
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("cache_status", &self.cache_status)
            .field("content_type", &self.content_type)
            .field("cache_control", &self.cache_control)
            .finish_non_exhaustive()
    }
}

/// A parsed `"<identifier>_<width>"` request key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssetRequest {
    /// Requested asset.
    pub id: AssetId,
    /// Requested width.
    pub width: VariantWidth,
}

impl AssetRequest {
    /// Parses a request key.
    ///
    /// A wrong shape or an unsupported width is `NotFound`; an identifier that
    /// is not a UUID is `InvalidInput`.
    pub fn parse(key: &str) -> MediaResult<Self> {
        let mut parts = key.split('_');
        let (Some(id), Some(width), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(MediaError::NotFound(format!("malformed asset key {key:?}")));
        };
        let pixels: u32 = width
            .parse()
            .map_err(|_| MediaError::NotFound(format!("malformed width in {key:?}")))?;
        let width = VariantWidth::from_pixels(pixels)
            .ok_or_else(|| MediaError::NotFound(format!("unsupported width {pixels}")))?;
        let id = id.parse::<AssetId>()?;
        Ok(Self { id, width })
    }

    /// Key of the variant this request names.
    pub fn variant_key(&self) -> VariantKey {
        VariantKey::new(self.id, self.width)
    }
}

/// Point-in-time hit and miss counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliverySnapshot {
    /// Requests served from a stored variant.
    pub hits: u64,
    /// Requests that fell through to the original source.
    pub misses: u64,
}

/// Decides between stored variants and the original source.
pub struct AssetDelivery {
    registry: Arc<AssetRegistry>,
    pipeline: Arc<VariantPipeline>,
    store: Arc<dyn StorageProvider>,
    job_timeout: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl AssetDelivery {
    /// Creates the delivery boundary. `job_timeout` bounds each scheduled job.
    pub fn new(
        registry: Arc<AssetRegistry>,
        pipeline: Arc<VariantPipeline>,
        store: Arc<dyn StorageProvider>,
        job_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            pipeline,
            store,
            job_timeout,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Registry used to resolve identifiers.
    pub fn registry(&self) -> &Arc<AssetRegistry> {
        &self.registry
    }

    /// Pipeline receiving background jobs.
    pub fn pipeline(&self) -> &Arc<VariantPipeline> {
        &self.pipeline
    }

    /// Hit and miss counts since startup.
    pub fn stats(&self) -> DeliverySnapshot {
        DeliverySnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Serves the asset named by `key`.
    pub async fn deliver(&self, key: &str) -> MediaResult<Delivery> {
        let request = AssetRequest::parse(key)?;
        let variant_key = request.variant_key().storage_key();

        if self.store.exists(&variant_key).await {
            match self.store.open(&variant_key).await {
                Ok(body) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    debug!(key = %variant_key, "variant hit");
                    return Ok(Delivery {
                        cache_status: CacheStatus::Hit,
                        content_type: VARIANT_CONTENT_TYPE,
                        cache_control: Some(CACHE_FOR_A_YEAR),
                        body,
                    });
                }
                // Removed between the existence check and the read: treat as a miss.
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let path = self.registry.resolve(&request.id)?;
        debug!(key = %variant_key, %path, "variant miss");
        self.schedule_variants(&path, request.id);

        let body = self.registry.retrieve(&request.id).await?;
        Ok(Delivery {
            cache_status: CacheStatus::Miss,
            content_type: content_type_for(&path),
            cache_control: None,
            body,
        })
    }

    /// Queues every supported width for `id`.
    ///
    /// Jobs get their own deadline, so a caller going away does not stop
    /// generation. Scheduling failures are logged and otherwise ignored.
    fn schedule_variants(&self, path: &str, id: AssetId) {
        let deadline = Instant::now() + self.job_timeout;
        let span = Span::current();
        for width in VariantWidth::ALL {
            let job = VariantJob::new(path, id, width)
                .with_deadline(deadline)
                .following(&span);
            if let Err(e) = self.pipeline.enqueue(job) {
                warn!(%id, %width, error = %e, "variant not scheduled");
            }
        }
    }
}

/// MIME type for a source path, by extension.
pub fn content_type_for(path: &str) -> &'static str {
    let ext = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "avif" => "image/avif",
        _ => "application/octet-stream",
    }
}
