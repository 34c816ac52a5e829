//! Prefetching: predicts which remote-only assets will be needed soon and
//! promotes them into the local tier ahead of demand.
//!
//! The trigger heuristic is a pluggable policy behind a narrow interface.
//! The default policy watches for repeated (product, region) affinity in a
//! sliding window of recent accesses.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::cache::descriptor::CacheKey;
use crate::cache::entry::CacheEntry;
use crate::config::PrefetchConfig;

/// One observed access, recorded on every orchestrator get.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UsageSignal {
    pub product_id: String,
    pub region: String,
}

/// Decides which remote-only entries to promote, given recent accesses.
pub trait PrefetchPolicy: Send + Sync {
    fn select(&self, recent: &[UsageSignal], candidates: &[CacheEntry]) -> Vec<CacheKey>;
}

/// Sliding window of the most recent access signals.
pub struct UsageRecorder {
    window: Mutex<VecDeque<UsageSignal>>,
    capacity: usize,
}

impl UsageRecorder {
    pub fn new(capacity: usize) -> Self {
        Self {
            window: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&self, signal: UsageSignal) {
        let mut window = self.window.lock().expect("usage window poisoned");
        if window.len() == self.capacity {
            window.pop_front();
        }
        window.push_back(signal);
    }

    pub fn snapshot(&self) -> Vec<UsageSignal> {
        self.window
            .lock()
            .expect("usage window poisoned")
            .iter()
            .cloned()
            .collect()
    }
}

/// Default policy: a (product, region) pair requested at least
/// `trigger_threshold` times within the window selects matching remote-only
/// entries for promotion, up to `max_prefetch_items` per round.
pub struct RegionAffinityPolicy {
    config: PrefetchConfig,
}

impl RegionAffinityPolicy {
    pub fn new(config: PrefetchConfig) -> Self {
        Self { config }
    }
}

impl PrefetchPolicy for RegionAffinityPolicy {
    fn select(&self, recent: &[UsageSignal], candidates: &[CacheEntry]) -> Vec<CacheKey> {
        let mut counts: HashMap<&UsageSignal, usize> = HashMap::new();
        for signal in recent {
            *counts.entry(signal).or_insert(0) += 1;
        }

        let hot: Vec<&UsageSignal> = counts
            .into_iter()
            .filter(|(_, count)| *count >= self.config.trigger_threshold)
            .map(|(signal, _)| signal)
            .collect();

        if hot.is_empty() {
            return Vec::new();
        }

        let mut selected = Vec::new();
        for entry in candidates {
            let matches = hot.iter().any(|signal| {
                entry.region == signal.region
                    // Entries adopted from a directory scan have no product
                    // id recorded; region affinity alone qualifies them.
                    && (entry.product_id == signal.product_id || entry.product_id.is_empty())
            });
            if matches {
                selected.push(entry.key.clone());
                if selected.len() >= self.config.max_prefetch_items {
                    break;
                }
            }
        }
        selected
    }
}
