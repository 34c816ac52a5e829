//! Persisted cache index.
//!
//! The index is a performance cache over the artifact tree: it survives
//! restarts as a JSON file, but the directory scan is the source of truth.
//! A lost or desynchronized index is rebuilt by walking the artifacts.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::descriptor::{AssetKind, CacheKey, Season};
use crate::cache::entry::{now_unix, CacheEntry, TierState};
use crate::cache::local::{checksum_hex, LocalStoreError};

/// Mapping from cache key to entry, plus the op counters that should
/// survive a restart.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CacheIndex {
    pub entries: HashMap<CacheKey, CacheEntry>,

    #[serde(default)]
    pub hit_count: u64,

    #[serde(default)]
    pub miss_count: u64,
}

impl CacheIndex {
    /// Load the index file, or start empty if it is missing or unreadable.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(data) => match serde_json::from_str(&data) {
                Ok(index) => index,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Corrupt index file, starting empty");
                    CacheIndex::default()
                }
            },
            Err(_) => CacheIndex::default(),
        }
    }

    /// Persist the index. Written via temp file + rename so a crash never
    /// leaves a truncated index behind.
    pub async fn save(&self, path: &Path) -> Result<(), LocalStoreError> {
        let data = serde_json::to_vec_pretty(self).map_err(LocalStoreError::IndexEncode)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &data).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    /// Rebuild the index from the artifact tree.
    ///
    /// Filenames are content-addressed by key, and the directory layout is
    /// `{asset_kind}/{region}/{season}/{fingerprint}/{key}.bin`, so kind,
    /// region, and season are recovered from path components. The product id
    /// is not encoded in the path and is left empty; it only matters for
    /// prefetch affinity and is refilled on the next put for that asset.
    pub async fn rebuild_from_scan(artifacts_dir: &Path) -> Result<Self, LocalStoreError> {
        let mut index = CacheIndex::default();

        if !artifacts_dir.exists() {
            return Ok(index);
        }

        let mut pending: Vec<PathBuf> = vec![artifacts_dir.to_path_buf()];
        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(dirent) = entries.next_entry().await? {
                let path = dirent.path();
                let meta = dirent.metadata().await?;
                if meta.is_dir() {
                    pending.push(path);
                    continue;
                }
                if path.extension().and_then(|e| e.to_str()) != Some("bin") {
                    continue;
                }
                match Self::adopt_artifact(artifacts_dir, &path, meta.len()).await {
                    Ok(entry) => {
                        debug!(key = %entry.key, path = %path.display(), "Adopted artifact");
                        index.entries.insert(entry.key.clone(), entry);
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Skipping unreadable artifact");
                    }
                }
            }
        }

        info!(
            entries = index.entries.len(),
            dir = %artifacts_dir.display(),
            "Rebuilt index from local scan"
        );
        Ok(index)
    }

    async fn adopt_artifact(
        root: &Path,
        path: &Path,
        size: u64,
    ) -> Result<CacheEntry, LocalStoreError> {
        let key = path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(CacheKey::from_raw)
            .ok_or_else(|| LocalStoreError::MalformedArtifactPath(path.to_path_buf()))?;

        let rel = path.strip_prefix(root).unwrap_or(path);
        let mut components = rel.iter().filter_map(|c| c.to_str());
        let asset_kind = components
            .next()
            .and_then(AssetKind::from_path_component)
            .unwrap_or(AssetKind::Other);
        let region = components.next().unwrap_or("unknown").to_uppercase();
        let season = components
            .next()
            .and_then(Season::from_path_component)
            .unwrap_or(Season::None);

        let data = tokio::fs::read(path).await?;
        let checksum = checksum_hex(&data);
        let now = now_unix();

        Ok(CacheEntry {
            key,
            asset_kind,
            product_id: String::new(),
            region,
            season,
            size_bytes: size,
            checksum,
            created_at: now,
            last_access: now,
            access_count: 0,
            tier_state: TierState::LocalOnly,
            local_path: Some(path.to_path_buf()),
            remote_ref: None,
        })
    }

    /// Total bytes the index believes are resident in the local tier.
    pub fn local_bytes(&self) -> u64 {
        self.entries
            .values()
            .filter(|e| e.tier_state.claims_local())
            .map(|e| e.size_bytes)
            .sum()
    }
}
