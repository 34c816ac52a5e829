//! Remote durable tier.
//!
//! - [`object_store`]: ObjectStore trait, error taxonomy, directory-backed impl
//! - [`retry`]: Bounded exponential backoff with jitter for transient failures
//! - [`store`]: RemoteStore built on the trait (uploads, downloads, lifecycle)

pub mod object_store;
pub mod retry;
pub mod store;
