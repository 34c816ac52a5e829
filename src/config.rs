//! Runtime configuration for asset-cache-tier.
//!
//! Configuration can be loaded from a JSON file or constructed programmatically.
//! All cache knobs (budgets, retry policy, prefetch thresholds) live here.
//! Bucket identifiers and credentials come from the environment, never from
//! source.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "asset-cache-tier", about = "Two-tier semantic asset cache")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Maintenance commands exposed by the binary.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print cache statistics.
    Stats,
    /// Upload every local-only entry to the remote tier.
    Sync,
    /// Configure the remote lifecycle rule for cold objects.
    Lifecycle {
        /// Days until objects transition to the archive storage class.
        #[arg(long, default_value_t = 90)]
        transition_days: u32,
        /// Optional days until objects expire entirely.
        #[arg(long)]
        expire_days: Option<u32>,
    },
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Local tier settings.
    pub local: LocalTierConfig,

    /// Remote tier settings.
    pub remote: RemoteConfig,

    /// Retry/backoff policy for remote operations.
    pub retry: RetryConfig,

    /// Prefetch heuristic tuning.
    pub prefetch: PrefetchConfig,

    /// Disable all remote operations; the cache serves local-only.
    #[serde(default)]
    pub offline: bool,
}

/// Local tier capacity and path configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalTierConfig {
    /// Root directory holding the index file and the artifact tree.
    pub root_dir: PathBuf,

    /// Maximum bytes the local tier may hold before eviction kicks in.
    pub budget_bytes: u64,
}

impl Default for LocalTierConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("cache"),
            budget_bytes: 10 * 1024 * 1024 * 1024, // 10 GB
        }
    }
}

/// Remote tier (object store + CDN) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Whether the remote tier is available at all.
    pub enabled: bool,

    /// Bucket name. Overridden by ASSET_CACHE_BUCKET if set.
    pub bucket: String,

    /// Bucket region. Overridden by ASSET_CACHE_REGION if set.
    pub region: String,

    /// Namespace prefix prepended to every object key, allowing multiple
    /// environments/campaigns to share a bucket.
    pub prefix: String,

    /// Storage class for newly uploaded objects.
    pub storage_class: String,

    /// Webhook invoked to purge CDN edge caches after an upload (optional).
    pub cdn_webhook_url: Option<String>,

    /// Worker-pool size for batch uploads.
    pub max_parallel_uploads: usize,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bucket: String::new(),
            region: "us-east-1".to_string(),
            prefix: "creative-assets".to_string(),
            storage_class: "STANDARD".to_string(),
            cdn_webhook_url: None,
            max_parallel_uploads: 10,
        }
    }
}

/// Retry policy for transient remote failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per operation (initial try included).
    pub max_attempts: u32,

    /// Base delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,

    /// Cap on the backoff delay, in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
            max_delay_ms: 5_000,
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Prefetch heuristic settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrefetchConfig {
    /// Enable background prefetching.
    pub enabled: bool,

    /// Accesses to the same (product, region) pair within the window that
    /// trigger prefetching of related remote-only entries.
    pub trigger_threshold: usize,

    /// Number of recent accesses kept in the sliding window.
    pub window_size: usize,

    /// Upper bound on entries downloaded per prefetch round.
    pub max_prefetch_items: usize,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            trigger_threshold: 3,
            window_size: 64,
            max_prefetch_items: 8,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for
    /// missing fields, then apply environment overrides.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let data = std::fs::read_to_string(path)?;
            serde_json::from_str(&data)?
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Config::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Bucket identifiers come from the environment when present.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(bucket) = std::env::var("ASSET_CACHE_BUCKET") {
            self.remote.bucket = bucket;
        }
        if let Ok(region) = std::env::var("ASSET_CACHE_REGION") {
            self.remote.region = region;
        }
    }

    /// Whether remote operations are permitted under this configuration.
    pub fn remote_available(&self) -> bool {
        self.remote.enabled && !self.offline
    }
}
