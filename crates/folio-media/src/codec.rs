//! Variant rendering: decode, downscale, re-encode as lossy WebP.
//!
//! These functions are CPU bound and synchronous; the pipeline runs them on
//! the blocking thread pool.

use bytes::Bytes;
use image::imageops::FilterType;
use image::DynamicImage;

use crate::error::{MediaError, MediaResult};

/// Lossy WebP quality used for every variant (0-100).
pub const WEBP_QUALITY: f32 = 75.0;

/// An encoded variant ready to be stored.
#[derive(Debug, Clone)]
pub struct EncodedVariant {
    /// WebP bytes.
    pub bytes: Bytes,
    /// Output width in pixels.
    pub width: u32,
    /// Output height in pixels.
    pub height: u32,
    /// Whether the source was scaled down.
    pub resized: bool,
}

/// Decodes `source` and produces a WebP no wider than `max_width`.
///
/// Sources that already fit are re-encoded at their own size, never upscaled.
pub fn render_variant(source: &[u8], max_width: u32) -> MediaResult<EncodedVariant> {
    let img = image::load_from_memory(source)
        .map_err(|e| MediaError::Codec(format!("decode error: {e}")))?;
    let original_width = img.width();
    let img = downscale(img, max_width);
    let resized = img.width() != original_width;

    let rgba = img.to_rgba8();
    let encoder = webp::Encoder::from_rgba(rgba.as_raw(), rgba.width(), rgba.height());
    let encoded = encoder
        .encode_simple(false, WEBP_QUALITY)
        .map_err(|e| MediaError::Codec(format!("encode error: {e:?}")))?;

    Ok(EncodedVariant {
        bytes: Bytes::copy_from_slice(&encoded),
        width: rgba.width(),
        height: rgba.height(),
        resized,
    })
}

/// Scales `img` to `max_width` keeping its aspect ratio, only when wider.
pub fn downscale(img: DynamicImage, max_width: u32) -> DynamicImage {
    let (width, height) = (img.width(), img.height());
    if width <= max_width {
        return img;
    }
    let new_height = (u64::from(height) * u64::from(max_width) / u64::from(width)).max(1) as u32;
    // Triangle is bilinear: a good quality/speed balance for photos.
    img.resize_exact(max_width, new_height, FilterType::Triangle)
}
