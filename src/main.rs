//! asset-cache-tier: semantic two-tier cache for creative asset pipelines.
//!
//! Memoizes expensive generated assets through a hierarchy of two tiers:
//!   Local disk (hot) → Cloud object store (durable, shared)
//!
//! The binary exposes maintenance commands; the cache itself is consumed
//! as a library by the generation pipeline.

use std::sync::Arc;

use clap::Parser;
use tracing::info;

use asset_cache_tier::cache::hybrid::HybridCache;
use asset_cache_tier::config::{Cli, Command, Config};
use asset_cache_tier::remote::object_store::LifecycleRule;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "asset_cache_tier=debug"
    } else {
        "asset_cache_tier=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .init();

    info!("asset-cache-tier v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let config = Config::load(&cli.config)?;

    info!(
        root_dir = %config.local.root_dir.display(),
        budget_bytes = config.local.budget_bytes,
        remote_enabled = config.remote.enabled,
        bucket = %config.remote.bucket,
        offline = config.offline,
        "Configuration loaded"
    );

    let cache = Arc::new(HybridCache::new(&config).await?);

    match cli.command {
        Command::Stats => {
            let stats = cache.stats().await;
            let total = stats.local.hit_count + stats.local.miss_count;
            let hit_rate = if total > 0 {
                stats.local.hit_count as f64 / total as f64
            } else {
                0.0
            };
            println!("entries:        {}", stats.local.entry_count);
            println!("local bytes:    {}", stats.local.total_bytes);
            println!("budget bytes:   {}", stats.local.budget_bytes);
            println!("local hits:     {}", stats.local.hit_count);
            println!("local misses:   {}", stats.local.miss_count);
            println!("remote hits:    {}", stats.remote_hits);
            println!("hit rate:       {hit_rate:.2}");
            if let Some(remote) = stats.remote {
                println!("uploads:        {}", remote.uploads);
                println!("downloads:      {}", remote.downloads);
                println!("upload fails:   {}", remote.upload_failures);
            } else {
                println!("remote tier:    offline");
            }
        }
        Command::Sync => {
            let synced = cache.sync_pending().await?;
            info!(synced, "Sync complete");
            println!("synced {synced} entries");
        }
        Command::Lifecycle {
            transition_days,
            expire_days,
        } => {
            let rule = LifecycleRule {
                transition_after_days: transition_days,
                expire_after_days: expire_days,
                storage_class: config.remote.storage_class.clone(),
            };
            cache.configure_lifecycle(&rule).await?;
            println!("lifecycle rule configured");
        }
    }

    cache.shutdown().await;
    Ok(())
}
