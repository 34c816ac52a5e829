//! Hybrid cache orchestrator: composes the local and remote tiers.
//!
//! Reads are served local-first with lazy download-and-promote on a remote
//! hit; at most one download is in flight per key. Writes land locally
//! first and upload asynchronously unless offline. Cache failures never
//! abort the caller: the worst case is a miss (the producer regenerates)
//! or degraded durability (local-only), both logged rather than fatal.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::cache::descriptor::{CacheKey, SemanticDescriptor};
use crate::cache::entry::{CacheEntry, TierState};
use crate::cache::local::{EntryMeta, LocalStats, LocalStore, LocalStoreError};
use crate::cache::prefetcher::{PrefetchPolicy, RegionAffinityPolicy, UsageRecorder, UsageSignal};
use crate::config::Config;
use crate::remote::object_store::{FsObjectStore, LifecycleRule, ObjectStore, ObjectStoreError};
use crate::remote::store::{BatchItem, RemoteOpStats, RemoteStore};

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Local tier error: {0}")]
    Local(#[from] LocalStoreError),

    #[error("Remote tier error: {0}")]
    Remote(#[from] ObjectStoreError),
}

/// Combined statistics across both tiers.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub local: LocalStats,
    pub remote: Option<RemoteOpStats>,
    /// Local misses that were served by download-and-promote.
    pub remote_hits: u64,
    pub offline: bool,
}

/// The hybrid cache orchestrator.
///
/// Constructed once per process (or pipeline run) and passed explicitly to
/// producers and consumers; there is deliberately no ambient instance, so
/// independent caches never cross-contaminate.
pub struct HybridCache {
    local: Arc<LocalStore>,
    remote: Option<Arc<RemoteStore>>,
    recorder: UsageRecorder,
    policy: Box<dyn PrefetchPolicy>,
    prefetch_enabled: bool,
    /// Per-key download locks: at most one remote fetch in flight per key.
    downloads: Mutex<HashMap<CacheKey, Arc<Mutex<()>>>>,
    uploads: Mutex<JoinSet<()>>,
    remote_hits: AtomicU64,
    shutting_down: AtomicBool,
}

impl HybridCache {
    /// Construct the cache from configuration, using the directory-backed
    /// object store rooted at the configured bucket path.
    ///
    /// A remote tier that fails to initialize degrades the cache to
    /// local-only operation instead of failing construction.
    pub async fn new(config: &Config) -> Result<Self, CacheError> {
        let remote = if config.remote_available() && !config.remote.bucket.is_empty() {
            match FsObjectStore::open(&config.remote.bucket).await {
                Ok(store) => Some(Arc::new(store) as Arc<dyn ObjectStore>),
                Err(e) => {
                    warn!(error = %e, "Remote tier unavailable, operating local-only");
                    None
                }
            }
        } else {
            info!("Remote tier disabled, operating local-only");
            None
        };
        Self::with_object_store(config, remote).await
    }

    /// Construct the cache around an injected object store (or none for
    /// pure local-only operation).
    pub async fn with_object_store(
        config: &Config,
        store: Option<Arc<dyn ObjectStore>>,
    ) -> Result<Self, CacheError> {
        let local = Arc::new(LocalStore::open(&config.local).await?);
        let remote = store.map(|s| {
            Arc::new(RemoteStore::new(
                s,
                config.remote.clone(),
                config.retry.clone(),
            ))
        });

        Ok(Self {
            local,
            remote,
            recorder: UsageRecorder::new(config.prefetch.window_size),
            policy: Box::new(RegionAffinityPolicy::new(config.prefetch.clone())),
            prefetch_enabled: config.prefetch.enabled,
            downloads: Mutex::new(HashMap::new()),
            uploads: Mutex::new(JoinSet::new()),
            remote_hits: AtomicU64::new(0),
            shutting_down: AtomicBool::new(false),
        })
    }

    /// Replace the prefetch policy. The heuristic is deliberately pluggable.
    pub fn set_prefetch_policy(&mut self, policy: Box<dyn PrefetchPolicy>) {
        self.policy = policy;
    }

    /// Whether remote operations are currently possible.
    pub fn online(&self) -> bool {
        self.remote.is_some()
    }

    /// Look up an asset. Local tier first; on local miss and online, the
    /// remote tier is consulted and a hit is promoted into the local tier.
    ///
    /// Returns None on an overall miss; the caller then regenerates the
    /// asset and hands it back via [`put`](Self::put). Remote failures
    /// degrade to a miss rather than propagating.
    pub async fn get(&self, descriptor: &SemanticDescriptor) -> Result<Option<Bytes>, CacheError> {
        let (key, path_hint) = descriptor.derive();
        self.recorder.record(UsageSignal {
            product_id: descriptor.product_id.clone(),
            region: descriptor.region.clone(),
        });

        if let Some((data, _)) = self.local.get(&key).await? {
            return Ok(Some(data));
        }

        let Some(remote) = &self.remote else {
            return Ok(None);
        };

        // Single-flight: later callers for the same key wait on the first
        // download instead of fetching again.
        let key_lock = {
            let mut downloads = self.downloads.lock().await;
            downloads
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        let result = {
            let _guard = key_lock.lock().await;

            // Re-check: a concurrent download may already have promoted.
            if let Some((data, _)) = self.local.get(&key).await? {
                Some(data)
            } else {
                self.download_and_promote(remote, &key, &path_hint, descriptor)
                    .await?
            }
        };

        let mut downloads = self.downloads.lock().await;
        // Drop the lock entry once nobody else holds a handle to it.
        if Arc::strong_count(downloads.get(&key).unwrap_or(&key_lock)) <= 2 {
            downloads.remove(&key);
        }

        if result.is_some() {
            self.remote_hits.fetch_add(1, Ordering::Relaxed);
        }
        Ok(result)
    }

    async fn download_and_promote(
        &self,
        remote: &Arc<RemoteStore>,
        key: &CacheKey,
        path_hint: &str,
        descriptor: &SemanticDescriptor,
    ) -> Result<Option<Bytes>, CacheError> {
        let known = self.local.entry(key).await;
        let remote_ref = known
            .as_ref()
            .and_then(|e| e.remote_ref.clone())
            .unwrap_or_else(|| remote.object_key_for_hint(path_hint));

        if known.is_some() {
            self.local
                .update_entry(key, |e| e.tier_state = TierState::PendingDownload)
                .await?;
        }

        match remote.download(&remote_ref).await {
            Ok(data) => {
                debug!(key = %key, remote_ref = %remote_ref, "Remote hit, promoting");
                self.local.put(key, &data, descriptor).await?;
                self.local
                    .update_entry(key, |e| {
                        e.remote_ref = Some(remote_ref.clone());
                        e.tier_state = TierState::Both;
                    })
                    .await?;
                Ok(Some(data))
            }
            Err(ObjectStoreError::NotFound(_)) => {
                // The index claimed a copy the store does not have: trust
                // the store and drop the stale entry.
                if known.is_some() {
                    warn!(key = %key, remote_ref = %remote_ref, "Stale remote reference, dropping entry");
                    self.local.remove_entry(key).await?;
                }
                Ok(None)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Remote lookup failed, reporting miss");
                if known.is_some() {
                    self.local
                        .update_entry(key, |e| e.tier_state = TierState::RemoteOnly)
                        .await?;
                }
                Ok(None)
            }
        }
    }

    /// Store a freshly produced asset.
    ///
    /// The payload is written to the local tier first so it is immediately
    /// usable, then an asynchronous upload is enqueued unless offline. An
    /// upload that exhausts its retries leaves the entry local-only with a
    /// warning: durability is degraded, data is not lost.
    pub async fn put(
        &self,
        descriptor: &SemanticDescriptor,
        payload: Bytes,
    ) -> Result<CacheEntry, CacheError> {
        let (key, _) = descriptor.derive();
        let mut entry = self.local.put(&key, &payload, descriptor).await?;

        let Some(remote) = &self.remote else {
            return Ok(entry);
        };
        if self.shutting_down.load(Ordering::SeqCst) {
            return Ok(entry);
        }

        entry = self
            .local
            .update_entry(&key, |e| e.tier_state = TierState::PendingUpload)
            .await?
            .unwrap_or(entry);

        let remote = remote.clone();
        let local = self.local.clone();
        let descriptor = descriptor.clone();
        let mut uploads = self.uploads.lock().await;
        uploads.spawn(async move {
            match remote.upload(&key, payload, &descriptor).await {
                Ok(remote_ref) => {
                    debug!(key = %key, remote_ref = %remote_ref, "Asynchronous upload complete");
                    if let Err(e) = local
                        .update_entry(&key, |e| e.mark_uploaded(remote_ref.clone()))
                        .await
                    {
                        warn!(key = %key, error = %e, "Failed to record upload in index");
                    }
                    remote.invalidate_cdn(&remote_ref).await;
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Upload failed, entry stays local-only");
                    if let Err(e) = local.update_entry(&key, |e| e.mark_upload_failed()).await {
                        warn!(key = %key, error = %e, "Failed to record upload failure in index");
                    }
                }
            }
        });
        // Reap tasks that already finished so the set stays small.
        while uploads.try_join_next().is_some() {}

        Ok(entry)
    }

    /// Block until every enqueued upload has settled. Entries end up Both
    /// or LocalOnly depending on outcome.
    pub async fn flush_uploads(&self) {
        let mut uploads = self.uploads.lock().await;
        while uploads.join_next().await.is_some() {}
    }

    /// Upload every entry whose durable copy is missing or still pending.
    /// Returns the number of entries that became durable.
    pub async fn sync_pending(&self) -> Result<usize, CacheError> {
        let Some(remote) = &self.remote else {
            return Ok(0);
        };

        let pending = self
            .local
            .entries_matching(|e| {
                matches!(e.tier_state, TierState::LocalOnly | TierState::PendingUpload)
            })
            .await;

        let mut items = Vec::new();
        for entry in &pending {
            let Some(path) = &entry.local_path else { continue };
            let Some(hint) = self.local.path_hint_of(entry) else { continue };
            let payload = match tokio::fs::read(path).await {
                Ok(data) => Bytes::from(data),
                Err(e) => {
                    warn!(key = %entry.key, error = %e, "Skipping unreadable pending entry");
                    continue;
                }
            };
            let tags = HashMap::from([
                ("cache-key".to_string(), entry.key.to_string()),
                ("asset-kind".to_string(), entry.asset_kind.to_string()),
                ("product-id".to_string(), entry.product_id.clone()),
                ("region".to_string(), entry.region.clone()),
                ("season".to_string(), entry.season.to_string()),
            ]);
            items.push(BatchItem {
                key: entry.key.clone(),
                payload,
                object_key: remote.object_key_for_hint(&hint),
                tags,
            });
        }

        let keys: Vec<CacheKey> = items.iter().map(|i| i.key.clone()).collect();
        let results = remote.upload_batch(items).await;

        let mut synced = 0;
        for (key, result) in keys.into_iter().zip(results) {
            match result {
                Ok(remote_ref) => {
                    self.local
                        .update_entry(&key, |e| e.mark_uploaded(remote_ref.clone()))
                        .await?;
                    synced += 1;
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Sync upload failed");
                    self.local
                        .update_entry(&key, |e| e.mark_upload_failed())
                        .await?;
                }
            }
        }

        info!(synced, total = pending.len(), "Sync of pending entries complete");
        Ok(synced)
    }

    /// One prefetch round: promote remote-only entries the policy predicts
    /// will be needed. Purely an optimization: failures are logged and
    /// swallowed, and prefetched entries are evictable like any other.
    pub async fn prefetch(&self) {
        if !self.prefetch_enabled {
            return;
        }
        let Some(remote) = &self.remote else {
            return;
        };

        let recent = self.recorder.snapshot();
        let candidates = self
            .local
            .entries_matching(|e| e.tier_state == TierState::RemoteOnly)
            .await;
        let selected = self.policy.select(&recent, &candidates);
        if selected.is_empty() {
            return;
        }
        debug!(count = selected.len(), "Prefetch round selected entries");

        for key in selected {
            if self.shutting_down.load(Ordering::SeqCst) {
                break;
            }
            if let Err(e) = self.prefetch_one(remote, &key).await {
                debug!(key = %key, error = %e, "Prefetch failed, skipping");
            }
        }
    }

    async fn prefetch_one(
        &self,
        remote: &Arc<RemoteStore>,
        key: &CacheKey,
    ) -> Result<(), CacheError> {
        let Some(entry) = self.local.entry(key).await else {
            return Ok(());
        };
        let Some(remote_ref) = entry.remote_ref.clone() else {
            return Ok(());
        };

        // Same single-flight discipline as foreground promotion.
        let key_lock = {
            let mut downloads = self.downloads.lock().await;
            downloads
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _guard = key_lock.lock().await;

        if self.local.get(key).await?.is_some() {
            return Ok(());
        }

        let data = remote.download(&remote_ref).await?;
        let hint = remote_ref
            .strip_prefix(&format!("{}/", remote.prefix()))
            .unwrap_or(&remote_ref)
            .to_string();
        self.local
            .put_with(key, &data, &hint, EntryMeta::from_entry(&entry))
            .await?;
        self.local
            .update_entry(key, |e| {
                e.remote_ref = Some(remote_ref.clone());
                e.tier_state = TierState::Both;
            })
            .await?;
        debug!(key = %key, "Prefetched into local tier");
        Ok(())
    }

    /// Forward a lifecycle rule to the remote tier. A no-op offline.
    pub async fn configure_lifecycle(&self, rule: &LifecycleRule) -> Result<(), CacheError> {
        match &self.remote {
            Some(remote) => {
                remote.configure_lifecycle(rule).await?;
                Ok(())
            }
            None => {
                warn!("Lifecycle configuration skipped: remote tier unavailable");
                Ok(())
            }
        }
    }

    /// Snapshot of the index entry for a descriptor, if any.
    pub async fn entry(&self, descriptor: &SemanticDescriptor) -> Option<CacheEntry> {
        let (key, _) = descriptor.derive();
        self.local.entry(&key).await
    }

    /// Combined statistics.
    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            local: self.local.stats().await,
            remote: self.remote.as_ref().map(|r| r.stats()),
            remote_hits: self.remote_hits.load(Ordering::Relaxed),
            offline: self.remote.is_none(),
        }
    }

    /// Cooperative shutdown: abort in-flight uploads and leave any entry
    /// whose upload did not complete as local-only, never Both prematurely.
    pub async fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);

        let mut uploads = self.uploads.lock().await;
        uploads.abort_all();
        while uploads.join_next().await.is_some() {}
        drop(uploads);

        let pending = self
            .local
            .entries_matching(|e| e.tier_state == TierState::PendingUpload)
            .await;
        for entry in pending {
            if let Err(e) = self
                .local
                .update_entry(&entry.key, |e| e.mark_upload_failed())
                .await
            {
                warn!(key = %entry.key, error = %e, "Failed to demote cancelled upload");
            }
        }
        info!("Cache shut down");
    }
}
