//! End-to-end tests for the hybrid cache orchestrator: warm and cold round
//! trips, single-flight downloads, offline degradation, sync, and prefetch.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use asset_cache_tier::cache::descriptor::{
    AspectRatio, AssetKind, Season, SemanticDescriptor,
};
use asset_cache_tier::cache::entry::TierState;
use asset_cache_tier::cache::hybrid::HybridCache;
use asset_cache_tier::config::{Config, RetryConfig};
use asset_cache_tier::remote::object_store::{
    FsObjectStore, LifecycleRule, ObjectStore, ObjectStoreError,
};

fn descriptor(product_id: &str, variant_index: u32) -> SemanticDescriptor {
    SemanticDescriptor {
        asset_kind: AssetKind::Composite,
        product_id: product_id.to_string(),
        region: "US".to_string(),
        season: Season::Fall,
        aspect_ratio: AspectRatio::Portrait9x16,
        variant_index,
        content_fingerprint: "fp-cafebabe".to_string(),
    }
}

fn test_config(local_root: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.local.root_dir = local_root.to_path_buf();
    config.local.budget_bytes = 1024 * 1024;
    config.retry = RetryConfig {
        max_attempts: 2,
        base_delay_ms: 1,
        max_delay_ms: 2,
    };
    config
}

/// Object store wrapper that counts downloads and can fail every call.
struct InstrumentedStore {
    inner: FsObjectStore,
    downloads: AtomicU32,
    fail_all: bool,
}

impl InstrumentedStore {
    async fn open(root: &std::path::Path, fail_all: bool) -> Arc<Self> {
        Arc::new(Self {
            inner: FsObjectStore::open(root).await.unwrap(),
            downloads: AtomicU32::new(0),
            fail_all,
        })
    }
}

#[async_trait]
impl ObjectStore for InstrumentedStore {
    async fn put_object(
        &self,
        key: &str,
        data: Bytes,
        tags: &HashMap<String, String>,
        content_type: &str,
    ) -> Result<(), ObjectStoreError> {
        if self.fail_all {
            return Err(ObjectStoreError::classify(
                key,
                std::io::Error::from(std::io::ErrorKind::PermissionDenied),
            ));
        }
        self.inner.put_object(key, data, tags, content_type).await
    }

    async fn get_object(&self, key: &str) -> Result<Bytes, ObjectStoreError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        if self.fail_all {
            return Err(ObjectStoreError::classify(
                key,
                std::io::Error::from(std::io::ErrorKind::PermissionDenied),
            ));
        }
        self.inner.get_object(key).await
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>, ObjectStoreError> {
        self.inner.list_objects(prefix).await
    }

    async fn delete_object(&self, key: &str) -> Result<(), ObjectStoreError> {
        self.inner.delete_object(key).await
    }

    async fn put_lifecycle_rule(&self, rule: &LifecycleRule) -> Result<(), ObjectStoreError> {
        self.inner.put_lifecycle_rule(rule).await
    }
}

#[tokio::test]
async fn test_put_then_get_served_locally() {
    let local = tempfile::TempDir::new().unwrap();
    let bucket = tempfile::TempDir::new().unwrap();
    let store = InstrumentedStore::open(bucket.path(), false).await;
    let cache = HybridCache::with_object_store(&test_config(local.path()), Some(store.clone()))
        .await
        .unwrap();

    let d = descriptor("sku1", 0);
    cache.put(&d, Bytes::from_static(b"rendered pixels")).await.unwrap();
    let data = cache.get(&d).await.unwrap().unwrap();
    assert_eq!(&data[..], b"rendered pixels");

    // Served from the local tier, never the bucket.
    assert_eq!(store.downloads.load(Ordering::SeqCst), 0);
    cache.shutdown().await;
}

#[tokio::test]
async fn test_upload_transitions_entry_to_both() {
    let local = tempfile::TempDir::new().unwrap();
    let bucket = tempfile::TempDir::new().unwrap();
    let store = InstrumentedStore::open(bucket.path(), false).await;
    let cache = HybridCache::with_object_store(&test_config(local.path()), Some(store))
        .await
        .unwrap();

    let d = descriptor("sku1", 0);
    let entry = cache.put(&d, Bytes::from_static(b"img")).await.unwrap();
    assert_eq!(entry.tier_state, TierState::PendingUpload);

    cache.flush_uploads().await;
    let entry = cache.entry(&d).await.unwrap();
    assert_eq!(entry.tier_state, TierState::Both);
    let remote_ref = entry.remote_ref.unwrap();
    assert!(remote_ref.starts_with("creative-assets/composite/us/fall/"));
    assert!(bucket.path().join(&remote_ref).exists());
    cache.shutdown().await;
}

#[tokio::test]
async fn test_cold_start_downloads_and_promotes() {
    let bucket = tempfile::TempDir::new().unwrap();
    let d = descriptor("sku1", 0);
    let payload = vec![9u8; 50];

    {
        let local = tempfile::TempDir::new().unwrap();
        let store = InstrumentedStore::open(bucket.path(), false).await;
        let cache = HybridCache::with_object_store(&test_config(local.path()), Some(store))
            .await
            .unwrap();
        cache.put(&d, Bytes::from(payload.clone())).await.unwrap();
        cache.flush_uploads().await;
        cache.shutdown().await;
    }

    // A different machine with an empty local tier shares the bucket.
    let local = tempfile::TempDir::new().unwrap();
    let store = InstrumentedStore::open(bucket.path(), false).await;
    let cache = HybridCache::with_object_store(&test_config(local.path()), Some(store.clone()))
        .await
        .unwrap();

    let data = cache.get(&d).await.unwrap().unwrap();
    assert_eq!(&data[..], &payload[..]);
    assert_eq!(store.downloads.load(Ordering::SeqCst), 1);

    let entry = cache.entry(&d).await.unwrap();
    assert_eq!(entry.tier_state, TierState::Both);

    // The promoted copy serves subsequent reads without the bucket.
    cache.get(&d).await.unwrap().unwrap();
    assert_eq!(store.downloads.load(Ordering::SeqCst), 1);
    assert_eq!(cache.stats().await.remote_hits, 1);
    cache.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_gets_download_once() {
    let bucket = tempfile::TempDir::new().unwrap();
    let d = descriptor("sku1", 0);

    {
        let local = tempfile::TempDir::new().unwrap();
        let store = InstrumentedStore::open(bucket.path(), false).await;
        let cache = HybridCache::with_object_store(&test_config(local.path()), Some(store))
            .await
            .unwrap();
        cache.put(&d, Bytes::from_static(b"shared")).await.unwrap();
        cache.flush_uploads().await;
        cache.shutdown().await;
    }

    let local = tempfile::TempDir::new().unwrap();
    let store = InstrumentedStore::open(bucket.path(), false).await;
    let cache = Arc::new(
        HybridCache::with_object_store(&test_config(local.path()), Some(store.clone()))
            .await
            .unwrap(),
    );

    let mut handles = Vec::new();
    for _ in 0..8 {
        let cache = cache.clone();
        let d = d.clone();
        handles.push(tokio::spawn(async move { cache.get(&d).await }));
    }
    for handle in handles {
        let data = handle.await.unwrap().unwrap().unwrap();
        assert_eq!(&data[..], b"shared");
    }

    assert_eq!(store.downloads.load(Ordering::SeqCst), 1);
    cache.shutdown().await;
}

#[tokio::test]
async fn test_offline_round_trip() {
    let local = tempfile::TempDir::new().unwrap();
    let mut config = test_config(local.path());
    config.offline = true;
    let cache = HybridCache::new(&config).await.unwrap();
    assert!(!cache.online());

    let d = descriptor("sku1", 0);
    let entry = cache.put(&d, Bytes::from_static(b"offline work")).await.unwrap();
    assert_eq!(entry.tier_state, TierState::LocalOnly);

    let data = cache.get(&d).await.unwrap().unwrap();
    assert_eq!(&data[..], b"offline work");

    // A miss offline is just a miss, no network to consult.
    assert!(cache.get(&descriptor("sku2", 0)).await.unwrap().is_none());
    assert!(cache.stats().await.offline);
    cache.shutdown().await;
}

#[tokio::test]
async fn test_upload_failure_leaves_entry_local_only() {
    let local = tempfile::TempDir::new().unwrap();
    let bucket = tempfile::TempDir::new().unwrap();
    let store = InstrumentedStore::open(bucket.path(), true).await;
    let cache = HybridCache::with_object_store(&test_config(local.path()), Some(store))
        .await
        .unwrap();

    let d = descriptor("sku1", 0);
    cache.put(&d, Bytes::from_static(b"img")).await.unwrap();
    cache.flush_uploads().await;

    let entry = cache.entry(&d).await.unwrap();
    assert_eq!(entry.tier_state, TierState::LocalOnly);
    assert!(entry.remote_ref.is_none());

    // The payload itself is intact.
    let data = cache.get(&d).await.unwrap().unwrap();
    assert_eq!(&data[..], b"img");
    assert_eq!(cache.stats().await.remote.unwrap().upload_failures, 1);
    cache.shutdown().await;
}

#[tokio::test]
async fn test_sync_uploads_entries_written_while_offline() {
    let local = tempfile::TempDir::new().unwrap();
    let bucket = tempfile::TempDir::new().unwrap();
    let d1 = descriptor("sku1", 0);
    let d2 = descriptor("sku2", 0);
    let payload = vec![5u8; 50];

    {
        let cache = HybridCache::with_object_store(&test_config(local.path()), None)
            .await
            .unwrap();
        cache.put(&d1, Bytes::from(payload.clone())).await.unwrap();
        cache.put(&d2, Bytes::from_static(b"other")).await.unwrap();
        assert_eq!(cache.entry(&d1).await.unwrap().tier_state, TierState::LocalOnly);
        cache.shutdown().await;
    }

    // Connectivity returns; the same local tier syncs up.
    let store = InstrumentedStore::open(bucket.path(), false).await;
    let cache = HybridCache::with_object_store(&test_config(local.path()), Some(store))
        .await
        .unwrap();
    assert_eq!(cache.sync_pending().await.unwrap(), 2);

    let entry = cache.entry(&d1).await.unwrap();
    assert_eq!(entry.tier_state, TierState::Both);
    assert!(bucket.path().join(entry.remote_ref.unwrap()).exists());
    assert_eq!(cache.entry(&d2).await.unwrap().tier_state, TierState::Both);

    // Nothing left to sync.
    assert_eq!(cache.sync_pending().await.unwrap(), 0);
    cache.shutdown().await;
}

#[tokio::test]
async fn test_variant_indices_are_independent() {
    let local = tempfile::TempDir::new().unwrap();
    let cache = HybridCache::with_object_store(&test_config(local.path()), None)
        .await
        .unwrap();

    let v0 = descriptor("sku1", 0);
    let v1 = descriptor("sku1", 1);
    cache.put(&v0, Bytes::from_static(b"variant zero")).await.unwrap();
    cache.put(&v1, Bytes::from_static(b"variant one")).await.unwrap();

    assert_eq!(&cache.get(&v0).await.unwrap().unwrap()[..], b"variant zero");
    assert_eq!(&cache.get(&v1).await.unwrap().unwrap()[..], b"variant one");
    assert_ne!(v0.derive().0, v1.derive().0);
    cache.shutdown().await;
}

#[tokio::test]
async fn test_remote_miss_is_an_overall_miss() {
    let local = tempfile::TempDir::new().unwrap();
    let bucket = tempfile::TempDir::new().unwrap();
    let store = InstrumentedStore::open(bucket.path(), false).await;
    let cache = HybridCache::with_object_store(&test_config(local.path()), Some(store))
        .await
        .unwrap();

    assert!(cache.get(&descriptor("unknown", 0)).await.unwrap().is_none());
    cache.shutdown().await;
}

#[tokio::test]
async fn test_prefetch_promotes_region_affine_entries() {
    let local = tempfile::TempDir::new().unwrap();
    let bucket = tempfile::TempDir::new().unwrap();
    let store = InstrumentedStore::open(bucket.path(), false).await;
    let mut config = test_config(local.path());
    // Budget fits one 100-byte artifact, forcing the older one remote-only.
    config.local.budget_bytes = 150;
    let cache = HybridCache::with_object_store(&config, Some(store))
        .await
        .unwrap();

    let d1 = descriptor("sku-a", 0);
    let d2 = descriptor("sku-b", 0);
    cache.put(&d1, Bytes::from(vec![1u8; 100])).await.unwrap();
    cache.flush_uploads().await;
    cache.put(&d2, Bytes::from(vec![2u8; 100])).await.unwrap();
    cache.flush_uploads().await;

    let entry = cache.entry(&d1).await.unwrap();
    assert_eq!(entry.tier_state, TierState::RemoteOnly, "older entry evicted locally");

    // Repeated interest in (sku-a, US) crosses the prefetch threshold.
    for variant in 10..13 {
        let _ = cache.get(&descriptor("sku-a", variant)).await.unwrap();
    }
    cache.prefetch().await;

    let entry = cache.entry(&d1).await.unwrap();
    assert!(entry.tier_state.claims_local(), "prefetch promoted the entry");
    cache.shutdown().await;
}

#[tokio::test]
async fn test_corrupt_local_copy_repaired_from_remote() {
    let local = tempfile::TempDir::new().unwrap();
    let bucket = tempfile::TempDir::new().unwrap();
    let store = InstrumentedStore::open(bucket.path(), false).await;
    let cache = HybridCache::with_object_store(&test_config(local.path()), Some(store.clone()))
        .await
        .unwrap();

    let d = descriptor("sku1", 0);
    cache.put(&d, Bytes::from_static(b"authoritative pixels")).await.unwrap();
    cache.flush_uploads().await;
    assert_eq!(cache.entry(&d).await.unwrap().tier_state, TierState::Both);

    // Tamper with the local artifact behind the cache's back.
    let path = cache.entry(&d).await.unwrap().local_path.unwrap();
    tokio::fs::write(&path, b"bit rot").await.unwrap();

    // The corrupt copy is discarded and the remote one repairs the tier.
    let data = cache.get(&d).await.unwrap().unwrap();
    assert_eq!(&data[..], b"authoritative pixels");
    assert_eq!(store.downloads.load(Ordering::SeqCst), 1);
    assert_eq!(cache.entry(&d).await.unwrap().tier_state, TierState::Both);
    cache.shutdown().await;
}
