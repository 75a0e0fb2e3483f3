//! Asset identifiers, supported variant widths, and variant keys.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::MediaError;

/// Opaque identifier standing in for one normalized asset path.
///
/// Identifiers are UUIDv5 values of the normalized path under a namespace,
/// so the same repository always publishes the same links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssetId(Uuid);

impl AssetId {
    /// Derives the identifier of `normalized_path` under `namespace`.
    pub fn derive(namespace: &Uuid, normalized_path: &str) -> Self {
        Self(Uuid::new_v5(namespace, normalized_path.as_bytes()))
    }

    /// Wraps an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns true for the all-zero identifier, which is never issued.
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for AssetId {
    type Err = MediaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(AssetId)
            .map_err(|e| MediaError::InvalidInput(format!("malformed asset id {s:?}: {e}")))
    }
}

/// Target widths a variant can be generated at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VariantWidth {
    /// 800 pixels wide.
    W800,
    /// 1200 pixels wide.
    W1200,
    /// 1920 pixels wide.
    W1920,
}

impl VariantWidth {
    /// Every supported width, narrowest first.
    pub const ALL: [VariantWidth; 3] = [VariantWidth::W800, VariantWidth::W1200, VariantWidth::W1920];

    /// Width in pixels.
    pub fn pixels(self) -> u32 {
        match self {
            VariantWidth::W800 => 800,
            VariantWidth::W1200 => 1200,
            VariantWidth::W1920 => 1920,
        }
    }

    /// Maps a pixel count back to a supported width.
    pub fn from_pixels(pixels: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|w| w.pixels() == pixels)
    }
}

impl fmt::Display for VariantWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.pixels())
    }
}

/// One (asset, width) pair: the unit of deduplication and of storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VariantKey {
    /// Asset the variant derives from.
    pub id: AssetId,
    /// Target width.
    pub width: VariantWidth,
}

impl VariantKey {
    /// Creates a key.
    pub fn new(id: AssetId, width: VariantWidth) -> Self {
        Self { id, width }
    }

    /// Object key the variant is stored under: `"{id}_{width}.webp"`.
    pub fn storage_key(&self) -> String {
        format!("{}_{}.webp", self.id, self.width)
    }
}

impl fmt::Display for VariantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.id, self.width)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn namespace() -> Uuid {
        Uuid::parse_str("570e8400-c29b-45d4-a716-446655440700").unwrap()
    }

    #[test]
    fn test_derive_is_deterministic() {
        let a = AssetId::derive(&namespace(), "photo.jpg");
        let b = AssetId::derive(&namespace(), "photo.jpg");
        let c = AssetId::derive(&namespace(), "other.jpg");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(!a.is_nil());
    }

    #[test]
    fn test_namespace_changes_identity() {
        let other_ns = Uuid::new_v4();
        assert_ne!(
            AssetId::derive(&namespace(), "photo.jpg"),
            AssetId::derive(&other_ns, "photo.jpg")
        );
    }

    #[test]
    fn test_display_parse() {
        let id = AssetId::derive(&namespace(), "photo.jpg");
        let text = id.to_string();
        assert_eq!(text.len(), 36);
        assert_eq!(text.parse::<AssetId>().unwrap(), id);
        assert!(matches!(
            "not-a-uuid".parse::<AssetId>(),
            Err(MediaError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_widths() {
        assert_eq!(VariantWidth::from_pixels(1200), Some(VariantWidth::W1200));
        assert_eq!(VariantWidth::from_pixels(1000), None);
        assert_eq!(VariantWidth::W1920.to_string(), "1920");
    }

    #[test]
    fn test_variant_key_format() {
        let id = AssetId::derive(&namespace(), "photo.jpg");
        let key = VariantKey::new(id, VariantWidth::W800);
        assert_eq!(key.storage_key(), format!("{}_800.webp", id));
        assert_eq!(key.to_string(), format!("{}_800", id));
    }
}
