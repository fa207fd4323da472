//! Engine counters

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Monotonic workflow counters
#[derive(Debug, Default)]
pub struct EngineStats {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    generations: AtomicU64,
    reverifications: AtomicU64,
    invalidated: AtomicU64,
    failures: AtomicU64,
}

/// Point-in-time copy of [`EngineStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Successful generate-and-store passes
    pub generations: u64,
    /// TTL-elapsed checks that recomputed and matched the source hash
    pub reverifications: u64,
    /// Rows flipped from valid to invalid
    pub invalidated: u64,
    pub failures: u64,
}

impl EngineStats {
    pub(crate) fn hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn generated(&self) {
        self.generations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn reverified(&self) {
        self.reverifications.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn invalidated(&self, rows: usize) {
        self.invalidated
            .fetch_add(u64::try_from(rows).unwrap_or(u64::MAX), Ordering::Relaxed);
    }

    pub(crate) fn failed(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            generations: self.generations.load(Ordering::Relaxed),
            reverifications: self.reverifications.load(Ordering::Relaxed),
            invalidated: self.invalidated.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counters() {
        let stats = EngineStats::default();
        stats.hit();
        stats.hit();
        stats.miss();
        stats.invalidated(3);
        let snap = stats.snapshot();
        assert_eq!(snap.cache_hits, 2);
        assert_eq!(snap.cache_misses, 1);
        assert_eq!(snap.invalidated, 3);
        assert_eq!(snap.generations, 0);
    }
}
