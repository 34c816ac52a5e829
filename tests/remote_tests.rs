//! Integration tests for the remote tier: retry behavior, batch uploads,
//! tagging, and discovery listing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use asset_cache_tier::cache::descriptor::{
    AspectRatio, AssetKind, CacheKey, DescriptorFilter, Season, SemanticDescriptor,
};
use asset_cache_tier::config::{RemoteConfig, RetryConfig};
use asset_cache_tier::remote::object_store::{
    FsObjectStore, LifecycleRule, ObjectStore, ObjectStoreError,
};
use asset_cache_tier::remote::store::{BatchItem, RemoteStore};

fn descriptor(product_id: &str) -> SemanticDescriptor {
    SemanticDescriptor {
        asset_kind: AssetKind::SceneBackground,
        product_id: product_id.to_string(),
        region: "DE".to_string(),
        season: Season::Winter,
        aspect_ratio: AspectRatio::Landscape16x9,
        variant_index: 0,
        content_fingerprint: "fp-deadbeef".to_string(),
    }
}

fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        base_delay_ms: 1,
        max_delay_ms: 4,
    }
}

/// Object store that fails a configurable number of times before succeeding.
struct FlakyStore {
    inner: FsObjectStore,
    failures_remaining: AtomicU32,
    calls: AtomicU32,
    permanent: bool,
}

impl FlakyStore {
    fn fail_with(&self, key: &str) -> ObjectStoreError {
        if self.permanent {
            ObjectStoreError::classify(key, std::io::Error::from(std::io::ErrorKind::PermissionDenied))
        } else {
            ObjectStoreError::classify(key, std::io::Error::from(std::io::ErrorKind::TimedOut))
        }
    }

    fn should_fail(&self) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ObjectStore for FlakyStore {
    async fn put_object(
        &self,
        key: &str,
        data: Bytes,
        tags: &HashMap<String, String>,
        content_type: &str,
    ) -> Result<(), ObjectStoreError> {
        if self.should_fail() {
            return Err(self.fail_with(key));
        }
        self.inner.put_object(key, data, tags, content_type).await
    }

    async fn get_object(&self, key: &str) -> Result<Bytes, ObjectStoreError> {
        if self.should_fail() {
            return Err(self.fail_with(key));
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

async fn flaky_remote(
    tmp: &tempfile::TempDir,
    failures: u32,
    permanent: bool,
) -> (RemoteStore, Arc<FlakyStore>) {
    let flaky = Arc::new(FlakyStore {
        inner: FsObjectStore::open(tmp.path()).await.unwrap(),
        failures_remaining: AtomicU32::new(failures),
        calls: AtomicU32::new(0),
        permanent,
    });
    let remote = RemoteStore::new(flaky.clone(), RemoteConfig::default(), fast_retry());
    (remote, flaky)
}

#[tokio::test]
async fn test_upload_attaches_semantic_tags() {
    let tmp = tempfile::TempDir::new().unwrap();
    let store = Arc::new(FsObjectStore::open(tmp.path()).await.unwrap());
    let remote = RemoteStore::new(store.clone(), RemoteConfig::default(), fast_retry());

    let d = descriptor("sku9");
    let (key, _) = d.derive();
    let remote_ref = remote
        .upload(&key, Bytes::from_static(b"pixels"), &d)
        .await
        .unwrap();

    assert!(remote_ref.starts_with("creative-assets/scene_background/de/winter/"));
    let tags = store.object_tags(&remote_ref).await.unwrap();
    assert_eq!(tags["cache-key"], key.to_string());
    assert_eq!(tags["asset-kind"], "scene_background");
    assert_eq!(tags["product-id"], "sku9");
    assert_eq!(tags["region"], "DE");
    assert_eq!(tags["season"], "winter");
}

#[tokio::test]
async fn test_transient_failures_are_retried_to_success() {
    let tmp = tempfile::TempDir::new().unwrap();
    let (remote, flaky) = flaky_remote(&tmp, 2, false).await;

    let d = descriptor("sku9");
    let (key, _) = d.derive();
    let remote_ref = remote
        .upload(&key, Bytes::from_static(b"x"), &d)
        .await
        .unwrap();

    // Two failures plus the successful attempt: exactly max_attempts calls.
    assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    assert_eq!(&remote.download(&remote_ref).await.unwrap()[..], b"x");
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let tmp = tempfile::TempDir::new().unwrap();
    let (remote, flaky) = flaky_remote(&tmp, u32::MAX, false).await;

    let d = descriptor("sku9");
    let (key, _) = d.derive();
    let err = remote
        .upload(&key, Bytes::from_static(b"x"), &d)
        .await
        .unwrap_err();

    assert!(err.is_transient());
    assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_permanent_failure_is_not_retried() {
    let tmp = tempfile::TempDir::new().unwrap();
    let (remote, flaky) = flaky_remote(&tmp, u32::MAX, true).await;

    let d = descriptor("sku9");
    let (key, _) = d.derive();
    let err = remote
        .upload(&key, Bytes::from_static(b"x"), &d)
        .await
        .unwrap_err();

    assert!(matches!(err, ObjectStoreError::Permanent(_)));
    assert_eq!(flaky.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_download_not_found_is_not_retried() {
    let tmp = tempfile::TempDir::new().unwrap();
    let store = Arc::new(FsObjectStore::open(tmp.path()).await.unwrap());
    let remote = RemoteStore::new(store, RemoteConfig::default(), fast_retry());

    let err = remote.download("creative-assets/nope.bin").await.unwrap_err();
    assert!(matches!(err, ObjectStoreError::NotFound(_)));
}

#[tokio::test]
async fn test_batch_upload_preserves_order_and_isolates_failures() {
    let tmp = tempfile::TempDir::new().unwrap();
    let store = Arc::new(FsObjectStore::open(tmp.path()).await.unwrap());
    let mut config = RemoteConfig::default();
    config.max_parallel_uploads = 2;
    let remote = RemoteStore::new(
        store,
        config,
        RetryConfig {
            max_attempts: 1,
            base_delay_ms: 1,
            max_delay_ms: 1,
        },
    );

    let items: Vec<BatchItem> = (0..6)
        .map(|i| BatchItem {
            key: CacheKey::from_raw(format!("key{i}")),
            payload: Bytes::from(vec![i as u8; 16]),
            // An empty object key is unwritable and must fail alone.
            object_key: if i == 3 {
                String::new()
            } else {
                format!("creative-assets/batch/{i}.bin")
            },
            tags: HashMap::new(),
        })
        .collect();

    let results = remote.upload_batch(items).await;
    assert_eq!(results.len(), 6);
    for (i, result) in results.iter().enumerate() {
        if i == 3 {
            assert!(result.is_err());
        } else {
            assert_eq!(result.as_ref().unwrap(), &format!("creative-assets/batch/{i}.bin"));
        }
    }
}

#[tokio::test]
async fn test_list_by_descriptor_prefix() {
    let tmp = tempfile::TempDir::new().unwrap();
    let store = Arc::new(FsObjectStore::open(tmp.path()).await.unwrap());
    let remote = RemoteStore::new(store, RemoteConfig::default(), fast_retry());

    let winter_de = descriptor("sku1");
    let mut summer_de = descriptor("sku2");
    summer_de.season = Season::Summer;
    let mut winter_us = descriptor("sku3");
    winter_us.region = "US".to_string();

    for d in [&winter_de, &summer_de, &winter_us] {
        let (key, _) = d.derive();
        remote.upload(&key, Bytes::from_static(b"img"), d).await.unwrap();
    }

    let filter = DescriptorFilter::kind(AssetKind::SceneBackground)
        .with_region("DE")
        .with_season(Season::Winter);
    let keys = remote.list_by_descriptor_prefix(&filter).await.unwrap();
    assert_eq!(keys.len(), 1);
    assert!(keys[0].starts_with("creative-assets/scene_background/de/winter/"));

    let filter = DescriptorFilter::kind(AssetKind::SceneBackground);
    let keys = remote.list_by_descriptor_prefix(&filter).await.unwrap();
    assert_eq!(keys.len(), 3);
}

#[tokio::test]
async fn test_lifecycle_rule_round_trip() {
    let tmp = tempfile::TempDir::new().unwrap();
    let store = Arc::new(FsObjectStore::open(tmp.path()).await.unwrap());
    let remote = RemoteStore::new(store, RemoteConfig::default(), fast_retry());

    remote
        .configure_lifecycle(&LifecycleRule {
            transition_after_days: 90,
            expire_after_days: Some(365),
            storage_class: "GLACIER".to_string(),
        })
        .await
        .unwrap();

    let recorded: LifecycleRule =
        serde_json::from_slice(&std::fs::read(tmp.path().join("_lifecycle.json")).unwrap()).unwrap();
    assert_eq!(recorded.transition_after_days, 90);
    assert_eq!(recorded.expire_after_days, Some(365));
    assert_eq!(recorded.storage_class, "GLACIER");
}
