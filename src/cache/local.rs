//! Local tier store: on-disk artifacts plus the persisted index.
//!
//! Artifacts are content-addressed by cache key and nested under the
//! human-navigable path hint. Payloads are verified against their stored
//! checksum on every read; a mismatch is treated as a miss after the corrupt
//! file is deleted. A byte budget is enforced by LRU eviction, with entries
//! referenced by in-flight operations pinned against removal.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cache::descriptor::{CacheKey, SemanticDescriptor};
use crate::cache::entry::{now_unix, CacheEntry, TierState};
use crate::cache::evictor::Evictor;
use crate::cache::index::CacheIndex;
use crate::config::LocalTierConfig;

#[derive(Error, Debug)]
pub enum LocalStoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode index: {0}")]
    IndexEncode(serde_json::Error),

    #[error("Artifact path has no key component: {0}")]
    MalformedArtifactPath(PathBuf),
}

/// SHA-256 of a payload, hex-encoded.
pub fn checksum_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Semantic fields carried into a new entry. Built from a full descriptor
/// on ordinary writes, or from an existing entry when promoting a payload
/// whose full descriptor is no longer known (prefetch).
#[derive(Debug, Clone)]
pub struct EntryMeta {
    pub asset_kind: crate::cache::descriptor::AssetKind,
    pub product_id: String,
    pub region: String,
    pub season: crate::cache::descriptor::Season,
}

impl EntryMeta {
    pub fn from_descriptor(descriptor: &SemanticDescriptor) -> Self {
        Self {
            asset_kind: descriptor.asset_kind,
            product_id: descriptor.product_id.clone(),
            region: descriptor.region.clone(),
            season: descriptor.season,
        }
    }

    pub fn from_entry(entry: &CacheEntry) -> Self {
        Self {
            asset_kind: entry.asset_kind,
            product_id: entry.product_id.clone(),
            region: entry.region.clone(),
            season: entry.season,
        }
    }
}

/// Local tier statistics.
#[derive(Debug, Clone, Default)]
pub struct LocalStats {
    /// Entries with a resident local copy.
    pub entry_count: usize,
    /// Total bytes resident in the local tier.
    pub total_bytes: u64,
    pub hit_count: u64,
    pub miss_count: u64,
    pub budget_bytes: u64,
}

struct Inner {
    index: CacheIndex,
    /// Reference counts for entries held by in-flight reads/writes.
    pins: HashMap<CacheKey, usize>,
}

impl Inner {
    fn pin(&mut self, key: &CacheKey) {
        *self.pins.entry(key.clone()).or_insert(0) += 1;
    }

    fn unpin(&mut self, key: &CacheKey) {
        if let Some(count) = self.pins.get_mut(key) {
            *count -= 1;
            if *count == 0 {
                self.pins.remove(key);
            }
        }
    }

    fn pinned_keys(&self) -> HashSet<CacheKey> {
        self.pins.keys().cloned().collect()
    }
}

/// The local tier store.
pub struct LocalStore {
    artifacts_dir: PathBuf,
    index_path: PathBuf,
    budget_bytes: u64,
    evictor: Evictor,
    inner: Mutex<Inner>,
}

impl LocalStore {
    /// Open (or initialize) the local tier rooted at the configured
    /// directory. A missing index is rebuilt by scanning the artifact tree,
    /// so restarts never lose knowledge of local contents.
    pub async fn open(config: &LocalTierConfig) -> Result<Self, LocalStoreError> {
        let artifacts_dir = config.root_dir.join("artifacts");
        let index_path = config.root_dir.join("index.json");
        fs::create_dir_all(&artifacts_dir).await?;

        let index = if index_path.exists() {
            CacheIndex::load(&index_path)
        } else {
            CacheIndex::rebuild_from_scan(&artifacts_dir).await?
        };

        info!(
            entries = index.entries.len(),
            bytes = index.local_bytes(),
            budget = config.budget_bytes,
            root = %config.root_dir.display(),
            "Local tier opened"
        );

        Ok(Self {
            artifacts_dir,
            index_path,
            budget_bytes: config.budget_bytes,
            evictor: Evictor,
            inner: Mutex::new(Inner {
                index,
                pins: HashMap::new(),
            }),
        })
    }

    /// Read a verified-intact local payload.
    ///
    /// Returns None on miss. Index/filesystem desynchronization is repaired
    /// here: a missing or corrupt file demotes the entry (or removes it when
    /// no remote copy exists) instead of being trusted.
    ///
    /// Access metadata is updated in memory only; rewriting the whole index
    /// per read would dominate hot-path latency, so it rides along with the
    /// next mutation's save.
    pub async fn get(
        &self,
        key: &CacheKey,
    ) -> Result<Option<(Bytes, CacheEntry)>, LocalStoreError> {
        let (path, expected_checksum) = {
            let mut inner = self.inner.lock().await;
            let Some(entry) = inner.index.entries.get(key) else {
                inner.index.miss_count += 1;
                return Ok(None);
            };
            if !entry.tier_state.claims_local() {
                inner.index.miss_count += 1;
                return Ok(None);
            }
            let Some(path) = entry.local_path.clone() else {
                // State claims a local copy that was never recorded: repair.
                warn!(key = %key, state = %entry.tier_state, "Entry claims local copy without a path, repairing");
                let entry = inner.index.entries.get_mut(key).unwrap();
                if !entry.demote_to_remote() {
                    inner.index.entries.remove(key);
                }
                inner.index.miss_count += 1;
                inner.index.save(&self.index_path).await?;
                return Ok(None);
            };
            let checksum = entry.checksum.clone();
            inner.pin(key);
            (path, checksum)
        };

        let read_result = fs::read(&path).await;

        let mut inner = self.inner.lock().await;
        inner.unpin(key);

        // The lock was released while reading, so the entry we took the
        // snapshot from may have been replaced by a concurrent put (a writer
        // holds its pin from before the rename until its index update lands).
        // Repairs below only fire when the entry is provably the one we read:
        // checksum unchanged and no other operation in flight on the key.
        let snapshot_intact = |inner: &Inner| {
            inner
                .index
                .entries
                .get(key)
                .is_some_and(|e| e.checksum == expected_checksum)
                && !inner.pins.contains_key(key)
        };

        let data = match read_result {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if snapshot_intact(&inner) {
                    warn!(key = %key, path = %path.display(), "Index claims local file that is missing, repairing");
                    self.repair_missing_local(&mut inner, key);
                    inner.index.save(&self.index_path).await?;
                }
                inner.index.miss_count += 1;
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let actual = checksum_hex(&data);
        if actual != expected_checksum {
            if snapshot_intact(&inner) {
                warn!(key = %key, path = %path.display(), "Checksum mismatch, deleting corrupt artifact");
                let _ = fs::remove_file(&path).await;
                self.repair_missing_local(&mut inner, key);
                inner.index.save(&self.index_path).await?;
                inner.index.miss_count += 1;
                return Ok(None);
            }
        }

        // Hit only when the bytes we read belong to the entry as it stands
        // now; a replacement caught half way is reported as a plain miss.
        let Some(entry) = inner.index.entries.get_mut(key) else {
            inner.index.miss_count += 1;
            return Ok(None);
        };
        if entry.checksum != actual {
            inner.index.miss_count += 1;
            return Ok(None);
        }
        entry.touch();
        let snapshot = entry.clone();
        inner.index.hit_count += 1;

        debug!(key = %key, size = data.len(), "Local tier hit");
        Ok(Some((Bytes::from(data), snapshot)))
    }

    /// Write a payload into the local tier and update the index, then run
    /// eviction if the tier is over budget.
    ///
    /// The caller owns the tier-state decision; new entries start LocalOnly
    /// and keep any previously recorded remote copy.
    pub async fn put(
        &self,
        key: &CacheKey,
        payload: &[u8],
        descriptor: &SemanticDescriptor,
    ) -> Result<CacheEntry, LocalStoreError> {
        let (_, path_hint) = descriptor.derive();
        self.put_with(key, payload, &path_hint, EntryMeta::from_descriptor(descriptor))
            .await
    }

    /// Write a payload at an explicit path hint. Used for promotion when
    /// only the remote object key (which embeds the hint) is known.
    pub async fn put_with(
        &self,
        key: &CacheKey,
        payload: &[u8],
        path_hint: &str,
        meta: EntryMeta,
    ) -> Result<CacheEntry, LocalStoreError> {
        let path = self.artifacts_dir.join(path_hint);

        {
            let mut inner = self.inner.lock().await;
            inner.pin(key);
        }

        let write_result = self.write_atomic(&path, payload).await;

        let mut inner = self.inner.lock().await;
        if let Err(e) = write_result {
            inner.unpin(key);
            return Err(e);
        }

        let now = now_unix();
        let checksum = checksum_hex(payload);
        let previous_remote = inner
            .index
            .entries
            .get(key)
            .and_then(|e| e.remote_ref.clone());

        let entry = CacheEntry {
            key: key.clone(),
            asset_kind: meta.asset_kind,
            product_id: meta.product_id,
            region: meta.region,
            season: meta.season,
            size_bytes: payload.len() as u64,
            checksum,
            created_at: now,
            last_access: now,
            access_count: 0,
            tier_state: if previous_remote.is_some() {
                TierState::Both
            } else {
                TierState::LocalOnly
            },
            local_path: Some(path),
            remote_ref: previous_remote,
        };

        inner.index.entries.insert(key.clone(), entry.clone());
        debug!(key = %key, size = payload.len(), "Local tier write");

        // Still pinned here so the eviction round never victimizes the
        // entry that triggered it.
        self.evict_if_over_budget_locked(&mut inner).await;
        inner.unpin(key);
        inner.index.save(&self.index_path).await?;

        Ok(entry)
    }

    /// Run eviction if the local tier exceeds its byte budget.
    pub async fn evict_if_over_budget(&self) -> Result<usize, LocalStoreError> {
        let mut inner = self.inner.lock().await;
        let evicted = self.evict_if_over_budget_locked(&mut inner).await;
        if evicted > 0 {
            inner.index.save(&self.index_path).await?;
        }
        Ok(evicted)
    }

    /// Look up an entry without recording an access.
    pub async fn entry(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.inner.lock().await.index.entries.get(key).cloned()
    }

    /// Apply a mutation to an entry and persist the index. Used by the
    /// orchestrator for tier-state transitions around uploads/downloads.
    pub async fn update_entry<F>(&self, key: &CacheKey, f: F) -> Result<Option<CacheEntry>, LocalStoreError>
    where
        F: FnOnce(&mut CacheEntry),
    {
        let mut inner = self.inner.lock().await;
        let updated = match inner.index.entries.get_mut(key) {
            Some(entry) => {
                f(entry);
                Some(entry.clone())
            }
            None => None,
        };
        if updated.is_some() {
            inner.index.save(&self.index_path).await?;
        }
        Ok(updated)
    }

    /// Drop an entry from the index. Any local artifact is deleted too.
    pub async fn remove_entry(&self, key: &CacheKey) -> Result<(), LocalStoreError> {
        let mut inner = self.inner.lock().await;
        if let Some(entry) = inner.index.entries.remove(key) {
            if let Some(path) = entry.local_path {
                let _ = fs::remove_file(&path).await;
            }
            inner.index.save(&self.index_path).await?;
        }
        Ok(())
    }

    /// Relative path hint of an entry's local artifact, if it has one.
    pub fn path_hint_of(&self, entry: &CacheEntry) -> Option<String> {
        let path = entry.local_path.as_ref()?;
        let rel = path.strip_prefix(&self.artifacts_dir).ok()?;
        Some(rel.to_string_lossy().replace('\\', "/"))
    }

    /// Snapshot of entries matching a predicate.
    pub async fn entries_matching<F>(&self, pred: F) -> Vec<CacheEntry>
    where
        F: Fn(&CacheEntry) -> bool,
    {
        self.inner
            .lock()
            .await
            .index
            .entries
            .values()
            .filter(|e| pred(e))
            .cloned()
            .collect()
    }

    /// Local tier statistics.
    pub async fn stats(&self) -> LocalStats {
        let inner = self.inner.lock().await;
        let entry_count = inner
            .index
            .entries
            .values()
            .filter(|e| e.tier_state.claims_local())
            .count();
        LocalStats {
            entry_count,
            total_bytes: inner.index.local_bytes(),
            hit_count: inner.index.hit_count,
            miss_count: inner.index.miss_count,
            budget_bytes: self.budget_bytes,
        }
    }

    async fn write_atomic(&self, path: &Path, payload: &[u8]) -> Result<(), LocalStoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        // Unique temp name so concurrent writers of the same key never
        // observe each other's partial file.
        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        fs::write(&tmp, payload).await?;
        fs::rename(&tmp, path).await?;
        Ok(())
    }

    fn repair_missing_local(&self, inner: &mut Inner, key: &CacheKey) {
        if let Some(entry) = inner.index.entries.get_mut(key) {
            if !entry.demote_to_remote() {
                inner.index.entries.remove(key);
            }
        }
    }

    /// Evict least-recently-accessed entries until under budget. Pinned
    /// entries are exempt; if everything is pinned the budget may be
    /// temporarily exceeded and eviction retries on the next put.
    async fn evict_if_over_budget_locked(&self, inner: &mut Inner) -> usize {
        let total = inner.index.local_bytes();
        if total <= self.budget_bytes {
            return 0;
        }
        let needed = total - self.budget_bytes;
        let pinned = inner.pinned_keys();
        let victims = self
            .evictor
            .select_victims(inner.index.entries.values(), needed, &pinned);

        if victims.is_empty() {
            warn!(
                over_budget_bytes = needed,
                "Every local entry is pinned; deferring eviction to the next put"
            );
            return 0;
        }

        let mut evicted = 0;
        let mut freed = 0u64;
        for victim in victims {
            let Some(entry) = inner.index.entries.get_mut(&victim.key) else {
                continue;
            };
            if let Some(path) = entry.local_path.clone() {
                if let Err(e) = fs::remove_file(&path).await {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        warn!(key = %victim.key, error = %e, "Failed to remove evicted artifact");
                        continue;
                    }
                }
            }
            // Eviction is local-only; the remote copy stays the durable
            // source of truth when one exists.
            if !entry.demote_to_remote() {
                inner.index.entries.remove(&victim.key);
            }
            freed += victim.size_bytes;
            evicted += 1;
            debug!(key = %victim.key, size = victim.size_bytes, "Evicted local artifact");
        }

        if evicted > 0 {
            info!(evicted, freed_bytes = freed, "Eviction round complete");
        }
        evicted
    }
}
