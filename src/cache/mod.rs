//! Tiered asset cache management.
//!
//! This module contains the core cache data structures and algorithms:
//! - [`descriptor`]: SemanticDescriptor and deterministic key derivation
//! - [`entry`]: CacheEntry metadata and the tier-state machine
//! - [`index`]: Persistent key → entry index with scan-based recovery
//! - [`local`]: Local disk tier (checksummed artifacts, budget enforcement)
//! - [`evictor`]: Eviction policy (LRU with size tie-break)
//! - [`prefetcher`]: Usage-driven prefetch predictions for tier promotion
//! - [`hybrid`]: Orchestrator composing the local and remote tiers

pub mod descriptor;
pub mod entry;
pub mod evictor;
pub mod hybrid;
pub mod index;
pub mod local;
pub mod prefetcher;
