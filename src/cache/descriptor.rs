//! Semantic descriptors and cache key derivation.
//!
//! A descriptor captures everything that makes one generated asset distinct
//! from another. Key derivation is pure and deterministic: identical
//! descriptors always yield the same key, and any field difference changes
//! the digest.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// What kind of asset a cache entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    ProductCutout,
    SceneBackground,
    Composite,
    TextOverlayVariant,
    Other,
}

impl AssetKind {
    /// Stable lowercase name used in keys and storage paths.
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetKind::ProductCutout => "product_cutout",
            AssetKind::SceneBackground => "scene_background",
            AssetKind::Composite => "composite",
            AssetKind::TextOverlayVariant => "text_overlay_variant",
            AssetKind::Other => "other",
        }
    }

    /// Parse a storage path component back into a kind.
    pub fn from_path_component(s: &str) -> Option<AssetKind> {
        match s {
            "product_cutout" => Some(AssetKind::ProductCutout),
            "scene_background" => Some(AssetKind::SceneBackground),
            "composite" => Some(AssetKind::Composite),
            "text_overlay_variant" => Some(AssetKind::TextOverlayVariant),
            "other" => Some(AssetKind::Other),
            _ => None,
        }
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Campaign season the asset was generated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Season {
    Spring,
    Summer,
    Fall,
    Winter,
    None,
}

impl Season {
    pub fn as_str(&self) -> &'static str {
        match self {
            Season::Spring => "spring",
            Season::Summer => "summer",
            Season::Fall => "fall",
            Season::Winter => "winter",
            Season::None => "none",
        }
    }

    pub fn from_path_component(s: &str) -> Option<Season> {
        match s {
            "spring" => Some(Season::Spring),
            "summer" => Some(Season::Summer),
            "fall" => Some(Season::Fall),
            "winter" => Some(Season::Winter),
            "none" => Some(Season::None),
            _ => None,
        }
    }
}

impl fmt::Display for Season {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output aspect ratio of the creative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AspectRatio {
    #[serde(rename = "1x1")]
    Square1x1,
    #[serde(rename = "9x16")]
    Portrait9x16,
    #[serde(rename = "16x9")]
    Landscape16x9,
}

impl AspectRatio {
    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Square1x1 => "1x1",
            AspectRatio::Portrait9x16 => "9x16",
            AspectRatio::Landscape16x9 => "16x9",
        }
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Uniquely identifies one logical asset across both tiers.
///
/// Fixed-field by design: unknown attributes are rejected at the type level
/// rather than carried through an open-ended map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SemanticDescriptor {
    pub asset_kind: AssetKind,
    pub product_id: String,
    pub region: String,
    pub season: Season,
    pub aspect_ratio: AspectRatio,
    pub variant_index: u32,
    /// Hash of the generating prompt/inputs. Anything that changes the
    /// producible output for otherwise-identical fields must flow in here.
    pub content_fingerprint: String,
}

/// Derived cache key: hex digest over the canonical descriptor encoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Wrap a raw key string (used when rebuilding the index from a scan,
    /// where the key is recovered from the artifact filename).
    pub fn from_raw(raw: impl Into<String>) -> Self {
        CacheKey(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl SemanticDescriptor {
    /// Derive the cache key and the human-navigable path hint.
    ///
    /// Pure and total: no I/O, no clock. The path hint groups artifacts by
    /// asset kind, region, and season so manual inspection of the bucket
    /// stays tractable; uniqueness rests entirely on the key.
    pub fn derive(&self) -> (CacheKey, String) {
        let key = self.derive_key();
        // Truncate on a char boundary; fingerprints are not guaranteed ASCII.
        let mut cut = self.content_fingerprint.len().min(8);
        while !self.content_fingerprint.is_char_boundary(cut) {
            cut -= 1;
        }
        let short_fp = &self.content_fingerprint[..cut];
        let path_hint = format!(
            "{}/{}/{}/{}/{}.bin",
            self.asset_kind,
            self.region.to_lowercase(),
            self.season,
            short_fp,
            key,
        );
        (key, path_hint)
    }

    fn derive_key(&self) -> CacheKey {
        let canonical = format!(
            "{}\n{}\n{}\n{}\n{}\n{}\n{}",
            self.asset_kind,
            self.product_id,
            self.region,
            self.season,
            self.aspect_ratio,
            self.variant_index,
            self.content_fingerprint,
        );
        let digest = Sha256::digest(canonical.as_bytes());
        // First 16 digest bytes (32 hex chars) keep keys short while leaving
        // collisions out of reach for any realistic asset population.
        CacheKey(hex::encode(&digest[..16]))
    }
}

/// Partial descriptor used for discovery queries against the remote tier,
/// e.g. "all composites for this region".
#[derive(Debug, Clone, Default)]
pub struct DescriptorFilter {
    pub asset_kind: Option<AssetKind>,
    pub region: Option<String>,
    pub season: Option<Season>,
}

impl DescriptorFilter {
    pub fn kind(kind: AssetKind) -> Self {
        Self {
            asset_kind: Some(kind),
            ..Default::default()
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_season(mut self, season: Season) -> Self {
        self.season = Some(season);
        self
    }

    /// Deepest concrete path prefix this filter pins down. Components are
    /// positional, so a region filter without a kind cannot be expressed as
    /// a prefix and returns None.
    pub fn path_prefix(&self) -> Option<String> {
        let kind = self.asset_kind?;
        let mut prefix = format!("{kind}/");
        if let Some(region) = &self.region {
            prefix.push_str(&region.to_lowercase());
            prefix.push('/');
            if let Some(season) = self.season {
                prefix.push_str(season.as_str());
                prefix.push('/');
            }
        }
        Some(prefix)
    }
}
