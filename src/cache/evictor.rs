//! Eviction policy for the local tier.
//!
//! Least-recently-accessed entries go first; ties in last-access time are
//! broken by larger size, which frees budget faster for equal staleness.
//! Pinned entries (in-flight reads/writes) are never selected.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use crate::cache::descriptor::CacheKey;
use crate::cache::entry::CacheEntry;

/// An eviction candidate ordered by eviction priority.
#[derive(Debug, Clone)]
pub struct EvictionCandidate {
    pub key: CacheKey,
    pub last_access: u64,
    pub size_bytes: u64,
}

impl PartialEq for EvictionCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.last_access == other.last_access && self.size_bytes == other.size_bytes
    }
}

impl Eq for EvictionCandidate {}

impl PartialOrd for EvictionCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// BinaryHeap pops the greatest element, so "greatest" means "evict first":
// older access wins, then larger size.
impl Ord for EvictionCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .last_access
            .cmp(&self.last_access)
            .then(self.size_bytes.cmp(&other.size_bytes))
    }
}

/// The eviction policy engine.
#[derive(Debug, Default)]
pub struct Evictor;

impl Evictor {
    /// Select entries to evict from the local tier until at least
    /// `bytes_needed` would be freed.
    ///
    /// Only entries with a local copy qualify; pinned keys are skipped.
    /// May return less than requested when everything else is pinned.
    pub fn select_victims<'a>(
        &self,
        entries: impl Iterator<Item = &'a CacheEntry>,
        bytes_needed: u64,
        pinned: &HashSet<CacheKey>,
    ) -> Vec<EvictionCandidate> {
        let mut heap = BinaryHeap::new();

        for entry in entries {
            if !entry.tier_state.claims_local() {
                continue;
            }
            if pinned.contains(&entry.key) {
                continue;
            }
            heap.push(EvictionCandidate {
                key: entry.key.clone(),
                last_access: entry.last_access,
                size_bytes: entry.size_bytes,
            });
        }

        let mut victims = Vec::new();
        let mut freed = 0u64;
        while freed < bytes_needed {
            match heap.pop() {
                Some(candidate) => {
                    freed += candidate.size_bytes;
                    victims.push(candidate);
                }
                None => break,
            }
        }

        victims
    }
}
