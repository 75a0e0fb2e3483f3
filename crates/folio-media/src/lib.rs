#![warn(missing_docs)]

//! Folio media subsystem: opaque asset identifiers, background WebP variant
//! generation, and cache-first asset delivery over HTTP.
//!
//! The [`registry::AssetRegistry`] hands out identifiers for source paths,
//! [`pipeline::VariantPipeline`] renders variants on a bounded worker pool, and
//! [`delivery::AssetDelivery`] decides per request whether a stored variant or
//! the original source is served.

pub mod api;
pub mod asset_id;
pub mod codec;
pub mod config;
pub mod delivery;
pub mod error;
pub mod pipeline;
pub mod registry;
pub mod sync;

pub use asset_id::{AssetId, VariantKey, VariantWidth};
pub use config::{MediaConfig, StorageConfig};
pub use delivery::{AssetDelivery, AssetRequest, CacheStatus, Delivery, DeliverySnapshot};
pub use error::{MediaError, MediaResult};
pub use pipeline::{PipelineConfig, PipelineSnapshot, VariantJob, VariantPipeline};
pub use registry::AssetRegistry;
pub use sync::{sync_assets, SyncReport};
