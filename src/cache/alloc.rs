use crate::model::BigmapAlloc;
use crate::types::BigmapId;

use super::stats::{CacheStats, StatsCounters};
use super::two_queue::TwoQueueCache;

/// Bounded cache of allocation records for fast type and counter
/// access on the hot diff path.
///
/// The engine writes through: every allocation mutation it persists is
/// mirrored here, and allocations removed by rollback are evicted. The
/// whole cache is purged on block disconnect.
pub struct AllocCache {
    cache: TwoQueueCache<BigmapId, BigmapAlloc>,
    stats: StatsCounters,
}

impl AllocCache {
    pub fn new(capacity: usize) -> Self {
        AllocCache {
            cache: TwoQueueCache::new(capacity),
            stats: StatsCounters::default(),
        }
    }

    pub fn get(&self, id: BigmapId) -> Option<BigmapAlloc> {
        match self.cache.get(&id) {
            Some(alloc) => {
                self.stats.count_hit();
                Some(alloc)
            }
            None => {
                self.stats.count_miss();
                None
            }
        }
    }

    pub fn put(&self, alloc: &BigmapAlloc) {
        self.cache.put(alloc.bigmap_id, alloc.clone());
        self.stats.count_insert();
    }

    pub fn remove(&self, id: BigmapId) {
        self.cache.remove(&id);
    }

    pub fn purge(&self) {
        self.cache.purge();
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot(self.cache.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BigmapEvent, TypeDesc};

    fn alloc(id: BigmapId) -> BigmapAlloc {
        BigmapAlloc::new(
            5,
            &BigmapEvent::alloc(id, TypeDesc::new("nat"), TypeDesc::new("string")),
        )
    }

    #[test]
    fn write_through_reads_back_latest() {
        let cache = AllocCache::new(16);
        let mut a = alloc(3);
        cache.put(&a);

        a.n_live_keys = 7;
        cache.put(&a);
        assert_eq!(cache.get(3).unwrap().n_live_keys, 7);
    }

    #[test]
    fn purge_empties_and_counts_misses() {
        let cache = AllocCache::new(16);
        cache.put(&alloc(1));
        assert!(cache.get(1).is_some());

        cache.purge();
        assert!(cache.get(1).is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.inserts, 1);
        assert_eq!(stats.size, 0);
    }

    #[test]
    fn remove_evicts_single_entry() {
        let cache = AllocCache::new(16);
        cache.put(&alloc(1));
        cache.put(&alloc(2));
        cache.remove(1);
        assert!(cache.get(1).is_none());
        assert!(cache.get(2).is_some());
    }
}
