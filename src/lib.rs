//! asset-cache-tier: semantic two-tier cache for creative asset pipelines.
//!
//! Generated assets (product cutouts, scene backgrounds, composites) are
//! expensive to produce, so the pipeline memoizes them through a hierarchy
//! of two storage tiers:
//!   Local disk (hot) → Cloud object store (durable, shared)
//!
//! Reads are served local-first with lazy download-and-promote on a remote
//! hit; writes land locally first and upload asynchronously. The cache
//! degrades to local-only operation when the remote tier is unreachable.

pub mod cache;
pub mod config;
pub mod remote;
