use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Monotone cache counters, updated with relaxed atomics so readers on
/// API worker threads never contend with the block-processing thread.
#[derive(Debug, Default)]
pub struct StatsCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    inserts: AtomicU64,
    bytes: AtomicI64,
}

impl StatsCounters {
    pub fn count_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count_insert(&self) {
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_bytes(&self, delta: i64) {
        self.bytes.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn reset_bytes(&self) {
        self.bytes.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self, size: usize) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            size,
            bytes: self.bytes.load(Ordering::Relaxed).max(0),
        }
    }
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
    /// Current entry count.
    pub size: usize,
    /// Approximate payload bytes, history cache only.
    pub bytes: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let counters = StatsCounters::default();
        counters.count_hit();
        counters.count_hit();
        counters.count_miss();
        counters.count_insert();
        counters.add_bytes(128);
        counters.add_bytes(-28);

        let stats = counters.snapshot(3);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.inserts, 1);
        assert_eq!(stats.size, 3);
        assert_eq!(stats.bytes, 100);

        counters.reset_bytes();
        assert_eq!(counters.snapshot(0).bytes, 0);
    }
}
