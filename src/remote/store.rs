//! Remote tier store: durable objects in a shared bucket.
//!
//! Wraps the object-store boundary with the retry policy, semantic tagging,
//! bounded-parallelism batch upload, prefix discovery, lifecycle
//! configuration, and the best-effort CDN invalidation hook.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::cache::descriptor::{CacheKey, DescriptorFilter, SemanticDescriptor};
use crate::config::{RemoteConfig, RetryConfig};
use crate::remote::object_store::{LifecycleRule, ObjectStore, ObjectStoreError};
use crate::remote::retry::retry;

/// Counters for remote operations.
#[derive(Debug, Clone, Default)]
pub struct RemoteOpStats {
    pub uploads: u64,
    pub downloads: u64,
    pub upload_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    uploads: AtomicU64,
    downloads: AtomicU64,
    upload_failures: AtomicU64,
}

/// One item of a batch upload. Carries a resolved object key so callers can
/// sync entries whose full descriptor is no longer known.
pub struct BatchItem {
    pub key: CacheKey,
    pub payload: Bytes,
    pub object_key: String,
    pub tags: HashMap<String, String>,
}

/// The remote tier store.
pub struct RemoteStore {
    store: Arc<dyn ObjectStore>,
    config: RemoteConfig,
    retry_config: RetryConfig,
    http: reqwest::Client,
    counters: Counters,
}

impl RemoteStore {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        config: RemoteConfig,
        retry_config: RetryConfig,
    ) -> Self {
        Self {
            store,
            config,
            retry_config,
            http: reqwest::Client::new(),
            counters: Counters::default(),
        }
    }

    /// Namespace prefix prepended to every object key.
    pub fn prefix(&self) -> &str {
        &self.config.prefix
    }

    /// Object key for a path hint: namespace prefix plus the semantic
    /// path, so multiple environments can share a bucket.
    pub fn object_key_for_hint(&self, path_hint: &str) -> String {
        format!("{}/{}", self.config.prefix, path_hint)
    }

    /// Object key for a descriptor.
    pub fn object_key(&self, descriptor: &SemanticDescriptor) -> String {
        let (_, path_hint) = descriptor.derive();
        self.object_key_for_hint(&path_hint)
    }

    /// Semantic tags attached to every object, enabling later filtering
    /// without a full download.
    pub fn semantic_tags(key: &CacheKey, descriptor: &SemanticDescriptor) -> HashMap<String, String> {
        HashMap::from([
            ("cache-key".to_string(), key.to_string()),
            ("asset-kind".to_string(), descriptor.asset_kind.to_string()),
            ("product-id".to_string(), descriptor.product_id.clone()),
            ("region".to_string(), descriptor.region.clone()),
            ("season".to_string(), descriptor.season.to_string()),
        ])
    }

    /// Upload one payload, retried on transient failures.
    pub async fn upload(
        &self,
        key: &CacheKey,
        payload: Bytes,
        descriptor: &SemanticDescriptor,
    ) -> Result<String, ObjectStoreError> {
        let object_key = self.object_key(descriptor);
        let tags = Self::semantic_tags(key, descriptor);
        self.upload_object(key, payload, &object_key, &tags).await
    }

    /// Upload to an explicit object key.
    pub async fn upload_object(
        &self,
        key: &CacheKey,
        payload: Bytes,
        object_key: &str,
        tags: &HashMap<String, String>,
    ) -> Result<String, ObjectStoreError> {
        let result = retry(&self.retry_config, "upload", || {
            let payload = payload.clone();
            async move {
                self.store
                    .put_object(object_key, payload, tags, "application/octet-stream")
                    .await
            }
        })
        .await;

        match result {
            Ok(()) => {
                self.counters.uploads.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, object_key = %object_key, size = payload.len(), "Uploaded to remote tier");
                Ok(object_key.to_string())
            }
            Err(e) => {
                self.counters.upload_failures.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Upload many payloads in parallel across a bounded worker pool.
    ///
    /// One item's permanent failure never cancels the others; outcomes are
    /// returned per item, in input order, so callers can retry only the
    /// failed subset.
    pub async fn upload_batch(
        &self,
        items: Vec<BatchItem>,
    ) -> Vec<Result<String, ObjectStoreError>> {
        let total = items.len();
        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel_uploads.max(1)));

        let futures = items.into_iter().map(|item| {
            let semaphore = semaphore.clone();
            async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .expect("upload semaphore never closed");
                self.upload_object(&item.key, item.payload, &item.object_key, &item.tags)
                    .await
            }
        });

        let results = futures::future::join_all(futures).await;
        let failed = results.iter().filter(|r| r.is_err()).count();
        info!(total, failed, "Batch upload complete");
        results
    }

    /// Download a remote object, retried on transient failures. NotFound is
    /// a distinct non-retried outcome.
    pub async fn download(&self, remote_ref: &str) -> Result<Bytes, ObjectStoreError> {
        let data = retry(&self.retry_config, "download", || async {
            self.store.get_object(remote_ref).await
        })
        .await?;
        self.counters.downloads.fetch_add(1, Ordering::Relaxed);
        debug!(remote_ref, size = data.len(), "Downloaded from remote tier");
        Ok(data)
    }

    /// Discovery query: list remote objects under the deepest concrete
    /// prefix a partial descriptor pins down, e.g. "all composites for this
    /// region" without enumerating the whole bucket.
    pub async fn list_by_descriptor_prefix(
        &self,
        filter: &DescriptorFilter,
    ) -> Result<Vec<String>, ObjectStoreError> {
        let suffix = filter.path_prefix().unwrap_or_default();
        let prefix = format!("{}/{}", self.config.prefix, suffix);
        let keys = retry(&self.retry_config, "list", || async {
            self.store.list_objects(&prefix).await
        })
        .await?;
        debug!(prefix = %prefix, count = keys.len(), "Listed remote objects");
        Ok(keys)
    }

    /// Declare the expiration/transition policy for cold objects.
    pub async fn configure_lifecycle(&self, rule: &LifecycleRule) -> Result<(), ObjectStoreError> {
        self.store.put_lifecycle_rule(rule).await?;
        info!(
            transition_days = rule.transition_after_days,
            storage_class = %rule.storage_class,
            "Lifecycle rule configured"
        );
        Ok(())
    }

    /// Request an edge-cache purge for an updated object. Best effort: the
    /// object is already durably written, so failure here is logged and
    /// never propagated as a store failure.
    pub async fn invalidate_cdn(&self, remote_ref: &str) {
        let Some(url) = &self.config.cdn_webhook_url else {
            return;
        };
        let body = serde_json::json!({
            "paths": [format!("/{remote_ref}")],
            "caller_reference": uuid::Uuid::new_v4().to_string(),
        });
        match self.http.post(url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!(remote_ref, "CDN invalidation requested");
            }
            Ok(resp) => {
                warn!(remote_ref, status = %resp.status(), "CDN invalidation rejected");
            }
            Err(e) => {
                warn!(remote_ref, error = %e, "CDN invalidation failed");
            }
        }
    }

    pub fn stats(&self) -> RemoteOpStats {
        RemoteOpStats {
            uploads: self.counters.uploads.load(Ordering::Relaxed),
            downloads: self.counters.downloads.load(Ordering::Relaxed),
            upload_failures: self.counters.upload_failures.load(Ordering::Relaxed),
        }
    }
}
