//! Object storage boundary.
//!
//! The cache consumes an object store, it does not reimplement one. The
//! trait mirrors the provider contract (put/get/list/delete plus lifecycle
//! configuration), and its error type carries the transient/permanent
//! classification the retry layer branches on: retryability is decided by
//! the transport's taxonomy, never by inspecting message strings.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ObjectStoreError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Transient storage error: {0}")]
    Transient(#[source] std::io::Error),

    #[error("Permanent storage error: {0}")]
    Permanent(#[source] std::io::Error),
}

impl ObjectStoreError {
    /// Whether a retry could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ObjectStoreError::Transient(_))
    }

    /// Classify a transport error by its kind.
    pub fn classify(key: &str, e: std::io::Error) -> Self {
        match e.kind() {
            ErrorKind::NotFound => ObjectStoreError::NotFound(key.to_string()),
            ErrorKind::TimedOut
            | ErrorKind::Interrupted
            | ErrorKind::WouldBlock
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::ConnectionRefused => ObjectStoreError::Transient(e),
            _ => ObjectStoreError::Permanent(e),
        }
    }
}

/// Expiration/transition policy for cold objects. A bucket-level
/// configuration, not a per-object call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleRule {
    /// Days until objects transition to the archive storage class.
    pub transition_after_days: u32,

    /// Optional days until objects expire entirely.
    pub expire_after_days: Option<u32>,

    /// Target storage class for transitioned objects.
    pub storage_class: String,
}

/// Provider-agnostic object storage contract.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_object(
        &self,
        key: &str,
        data: Bytes,
        tags: &HashMap<String, String>,
        content_type: &str,
    ) -> Result<(), ObjectStoreError>;

    async fn get_object(&self, key: &str) -> Result<Bytes, ObjectStoreError>;

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>, ObjectStoreError>;

    async fn delete_object(&self, key: &str) -> Result<(), ObjectStoreError>;

    async fn put_lifecycle_rule(&self, rule: &LifecycleRule) -> Result<(), ObjectStoreError>;
}

/// Sidecar record storing tags and content type alongside an object.
#[derive(Debug, Serialize, Deserialize)]
struct ObjectSidecar {
    tags: HashMap<String, String>,
    content_type: String,
}

const SIDECAR_SUFFIX: &str = ".tags.json";
const LIFECYCLE_FILE: &str = "_lifecycle.json";

/// Directory-backed object store.
///
/// Serves as the bucket implementation for development and tests, and for
/// deployments where the durable tier is a mounted network share. Object
/// tags live in a JSON sidecar next to each object.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, ObjectStoreError> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .map_err(|e| ObjectStoreError::classify("", e))?;
        Ok(Self { root })
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put_object(
        &self,
        key: &str,
        data: Bytes,
        tags: &HashMap<String, String>,
        content_type: &str,
    ) -> Result<(), ObjectStoreError> {
        let path = self.object_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| ObjectStoreError::classify(key, e))?;
        }
        fs::write(&path, &data)
            .await
            .map_err(|e| ObjectStoreError::classify(key, e))?;

        let sidecar = ObjectSidecar {
            tags: tags.clone(),
            content_type: content_type.to_string(),
        };
        let sidecar_path = PathBuf::from(format!("{}{SIDECAR_SUFFIX}", path.display()));
        let encoded = serde_json::to_vec(&sidecar)
            .map_err(|e| ObjectStoreError::Permanent(std::io::Error::other(e)))?;
        fs::write(&sidecar_path, encoded)
            .await
            .map_err(|e| ObjectStoreError::classify(key, e))?;

        debug!(key, size = data.len(), "Stored object");
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Bytes, ObjectStoreError> {
        let path = self.object_path(key);
        let data = fs::read(&path)
            .await
            .map_err(|e| ObjectStoreError::classify(key, e))?;
        Ok(Bytes::from(data))
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>, ObjectStoreError> {
        let mut keys = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(ObjectStoreError::classify(prefix, e)),
            };
            while let Some(dirent) = entries
                .next_entry()
                .await
                .map_err(|e| ObjectStoreError::classify(prefix, e))?
            {
                let path = dirent.path();
                let meta = dirent
                    .metadata()
                    .await
                    .map_err(|e| ObjectStoreError::classify(prefix, e))?;
                if meta.is_dir() {
                    pending.push(path);
                    continue;
                }
                let Ok(rel) = path.strip_prefix(&self.root) else {
                    continue;
                };
                let rel = rel.to_string_lossy().replace('\\', "/");
                if rel.ends_with(SIDECAR_SUFFIX) || rel == LIFECYCLE_FILE {
                    continue;
                }
                if rel.starts_with(prefix) {
                    keys.push(rel);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn delete_object(&self, key: &str) -> Result<(), ObjectStoreError> {
        let path = self.object_path(key);
        fs::remove_file(&path)
            .await
            .map_err(|e| ObjectStoreError::classify(key, e))?;
        let sidecar = PathBuf::from(format!("{}{SIDECAR_SUFFIX}", path.display()));
        let _ = fs::remove_file(&sidecar).await;
        Ok(())
    }

    async fn put_lifecycle_rule(&self, rule: &LifecycleRule) -> Result<(), ObjectStoreError> {
        let encoded = serde_json::to_vec_pretty(rule)
            .map_err(|e| ObjectStoreError::Permanent(std::io::Error::other(e)))?;
        fs::write(self.root.join(LIFECYCLE_FILE), encoded)
            .await
            .map_err(|e| ObjectStoreError::classify(LIFECYCLE_FILE, e))?;
        Ok(())
    }
}

impl FsObjectStore {
    /// Read back the tags stored with an object.
    pub async fn object_tags(&self, key: &str) -> Result<HashMap<String, String>, ObjectStoreError> {
        let path = PathBuf::from(format!("{}{SIDECAR_SUFFIX}", self.object_path(key).display()));
        let data = fs::read(&path)
            .await
            .map_err(|e| ObjectStoreError::classify(key, e))?;
        let sidecar: ObjectSidecar = serde_json::from_slice(&data)
            .map_err(|e| ObjectStoreError::Permanent(std::io::Error::other(e)))?;
        Ok(sidecar.tags)
    }
}
