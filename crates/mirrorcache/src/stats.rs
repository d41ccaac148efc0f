//! Cache statistics tracking

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters describing how the local mirror is being used
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    inserts: AtomicU64,
    removals: AtomicU64,
}

/// Point-in-time copy of [`CacheStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatsSnapshot {
    /// Reads served from the mirror
    pub hits: u64,
    /// Reads that went to the store
    pub misses: u64,
    /// Entries written into the mirror
    pub inserts: u64,
    /// Entries removed from the mirror by deletes or failed writes
    pub removals: u64,
    /// `hits / (hits + misses)`, 0.0 before any read
    pub hit_ratio: f64,
}

impl CacheStats {
    /// Create new stats tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a read served from the mirror
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a read that had to go to the store
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an entry written into the mirror
    pub fn record_insert(&self) {
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an entry removed from the mirror
    pub fn record_removal(&self) {
        self.removals.fetch_add(1, Ordering::Relaxed);
    }

    /// Get total hits
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Get total misses
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Get total inserts
    pub fn inserts(&self) -> u64 {
        self.inserts.load(Ordering::Relaxed)
    }

    /// Get total removals
    pub fn removals(&self) -> u64 {
        self.removals.load(Ordering::Relaxed)
    }

    /// Calculate hit ratio (0.0 to 1.0)
    pub fn hit_ratio(&self) -> f64 {
        ratio(self.hits(), self.misses())
    }

    /// Copy all counters at once
    pub fn snapshot(&self) -> StatsSnapshot {
        let hits = self.hits();
        let misses = self.misses();
        StatsSnapshot {
            hits,
            misses,
            inserts: self.inserts(),
            removals: self.removals(),
            hit_ratio: ratio(hits, misses),
        }
    }

    /// Reset all statistics
    pub fn reset(&self) {
        for counter in [&self.hits, &self.misses, &self.inserts, &self.removals] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

fn ratio(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}
