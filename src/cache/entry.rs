//! Cache entry types and tier-state transitions.
//!
//! A CacheEntry records where the copies of one logical asset live. The
//! tier state must always reflect actually-present copies; callers detect
//! desynchronization on access and repair the entry rather than trusting it.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::cache::descriptor::{AssetKind, CacheKey, Season};

/// Which tiers currently hold a copy of the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TierState {
    /// Only the local artifact file exists.
    LocalOnly,
    /// Only the remote object exists; a get must download first.
    RemoteOnly,
    /// Both copies exist and are intact.
    Both,
    /// Local copy written; asynchronous upload still in flight.
    PendingUpload,
    /// Remote hit being promoted; download in flight.
    PendingDownload,
}

impl TierState {
    /// Whether this state claims a local artifact file.
    pub fn claims_local(&self) -> bool {
        matches!(
            self,
            TierState::LocalOnly | TierState::Both | TierState::PendingUpload
        )
    }

    /// Whether this state claims a remote object.
    pub fn claims_remote(&self) -> bool {
        matches!(self, TierState::RemoteOnly | TierState::Both)
    }
}

impl std::fmt::Display for TierState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TierState::LocalOnly => "local_only",
            TierState::RemoteOnly => "remote_only",
            TierState::Both => "both",
            TierState::PendingUpload => "pending_upload",
            TierState::PendingDownload => "pending_download",
        };
        f.write_str(s)
    }
}

/// Seconds since the unix epoch; keeps the persisted index portable.
pub fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// One logical asset tracked by the cache index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Derived cache key.
    pub key: CacheKey,

    /// Semantic attributes retained for discovery and prefetch filtering.
    pub asset_kind: AssetKind,
    pub product_id: String,
    pub region: String,
    pub season: Season,

    /// Payload size in bytes.
    pub size_bytes: u64,

    /// SHA-256 of the payload, hex-encoded.
    pub checksum: String,

    /// Creation time (unix seconds).
    pub created_at: u64,

    /// Last access time (unix seconds).
    pub last_access: u64,

    /// Number of times this entry has been read.
    pub access_count: u64,

    /// Which tiers hold a copy.
    pub tier_state: TierState,

    /// Path of the local artifact file, if a local copy exists.
    pub local_path: Option<PathBuf>,

    /// Remote object key, if a remote copy exists.
    pub remote_ref: Option<String>,
}

impl CacheEntry {
    /// Record an access, refreshing timestamp and counter.
    pub fn touch(&mut self) {
        self.last_access = now_unix();
        self.access_count += 1;
    }

    /// Transition after a successful asynchronous upload.
    pub fn mark_uploaded(&mut self, remote_ref: String) {
        self.remote_ref = Some(remote_ref);
        self.tier_state = TierState::Both;
    }

    /// Transition after an upload failed or was cancelled mid-flight:
    /// the local copy is intact, durability is simply degraded.
    pub fn mark_upload_failed(&mut self) {
        self.tier_state = TierState::LocalOnly;
    }

    /// Transition after the local copy was evicted or found corrupt.
    /// Returns false if no remote copy exists to fall back on, in which
    /// case the entry should be removed outright.
    pub fn demote_to_remote(&mut self) -> bool {
        self.local_path = None;
        if self.remote_ref.is_some() {
            self.tier_state = TierState::RemoteOnly;
            true
        } else {
            false
        }
    }

}
