//! Point-in-time snapshots of a big-map's live key-set.
//!
//! A snapshot packs every live `(key, value)` pair of one big-map at
//! one height into a single byte buffer with parallel offset arrays.
//! Snapshots are immutable once built; incremental roll-forward decodes
//! into a transient map, replays the update log past the snapshot
//! height and packs a fresh snapshot, leaving the original shared with
//! concurrent readers.

use std::ops::ControlFlow;
use std::sync::Arc;

use hashbrown::HashMap;

use crate::error::{StoreError, StoreResult};
use crate::model::{key_id, BigmapUpdate, BigmapValue};
use crate::store::{Field, Query, Table};
use crate::types::{BigmapId, DiffAction, Height, KeyHash, KeyId};

use super::stats::{CacheStats, StatsCounters};
use super::two_queue::TwoQueueCache;

pub const DEFAULT_HISTORY_CACHE_ENTRIES: usize = 2048;

/// Offset-packed live key-set of one big-map at one height.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BigmapHistory {
    pub bigmap_id: BigmapId,
    pub height: Height,
    key_offsets: Vec<u32>,
    value_offsets: Vec<u32>,
    data: Vec<u8>,
}

impl BigmapHistory {
    fn pack<'a>(
        bigmap_id: BigmapId,
        height: Height,
        entries: impl Iterator<Item = (&'a [u8], &'a [u8])>,
        size_hint: usize,
    ) -> Self {
        let mut hist = BigmapHistory {
            bigmap_id,
            height,
            key_offsets: Vec::new(),
            value_offsets: Vec::new(),
            data: Vec::with_capacity(size_hint),
        };
        for (key, value) in entries {
            hist.key_offsets.push(hist.data.len() as u32);
            hist.data.extend_from_slice(key);
            hist.value_offsets.push(hist.data.len() as u32);
            hist.data.extend_from_slice(value);
        }
        hist
    }

    pub fn len(&self) -> usize {
        self.key_offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.key_offsets.is_empty()
    }

    /// Approximate heap footprint used by the cache byte gauge.
    pub fn size_bytes(&self) -> usize {
        self.data.len() + 8 * self.key_offsets.len()
    }

    fn entry(&self, i: usize) -> (&[u8], &[u8]) {
        let key_start = self.key_offsets[i] as usize;
        let value_start = self.value_offsets[i] as usize;
        let value_end = match self.key_offsets.get(i + 1) {
            Some(next) => *next as usize,
            None => self.data.len(),
        };
        (
            &self.data[key_start..value_start],
            &self.data[value_start..value_end],
        )
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        (0..self.len()).map(|i| self.entry(i))
    }

    /// Linear probe by canonical key hash.
    pub fn get(&self, key_hash: &KeyHash) -> Option<BigmapValue> {
        (0..self.len()).find_map(|i| {
            let (key, value) = self.entry(i);
            if KeyHash::of(key) != *key_hash {
                return None;
            }
            Some(self.synthesize(i, key, value, *key_hash))
        })
    }

    /// Entries `[from, to)` with synthetic ordinal row ids, clamped to
    /// the snapshot length.
    pub fn range(&self, from: usize, to: usize) -> Vec<BigmapValue> {
        let to = to.min(self.len());
        (from..to)
            .map(|i| {
                let (key, value) = self.entry(i);
                self.synthesize(i, key, value, KeyHash::of(key))
            })
            .collect()
    }

    fn synthesize(&self, i: usize, key: &[u8], value: &[u8], key_hash: KeyHash) -> BigmapValue {
        BigmapValue {
            row_id: (i + 1) as u64,
            bigmap_id: self.bigmap_id,
            key_id: key_id(self.bigmap_id, &key_hash),
            key_hash,
            key: key.to_vec(),
            value: value.to_vec(),
        }
    }

    /// Wire encoding: `u32 n_keys`, key offsets, value offsets, data,
    /// all little-endian.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + 8 * self.len() + self.data.len());
        buf.extend_from_slice(&(self.len() as u32).to_le_bytes());
        for off in &self.key_offsets {
            buf.extend_from_slice(&off.to_le_bytes());
        }
        for off in &self.value_offsets {
            buf.extend_from_slice(&off.to_le_bytes());
        }
        buf.extend_from_slice(&self.data);
        buf
    }

    /// Decodes the wire form; id and height come from the carrier.
    pub fn from_bytes(bigmap_id: BigmapId, height: Height, buf: &[u8]) -> StoreResult<Self> {
        let invalid = |reason| StoreError::InvalidSnapshot { reason };
        if buf.len() < 4 {
            return Err(invalid("short header"));
        }
        let n_keys = u32::from_le_bytes(buf[0..4].try_into().expect("length checked")) as usize;
        let offsets_end = 4 + 8 * n_keys;
        if buf.len() < offsets_end {
            return Err(invalid("short offset table"));
        }

        let word = |pos: usize| {
            u32::from_le_bytes(buf[pos..pos + 4].try_into().expect("length checked"))
        };
        let key_offsets: Vec<u32> = (0..n_keys).map(|i| word(4 + 4 * i)).collect();
        let value_offsets: Vec<u32> = (0..n_keys).map(|i| word(4 + 4 * (n_keys + i))).collect();
        let data = buf[offsets_end..].to_vec();

        for i in 0..n_keys {
            let next = key_offsets
                .get(i + 1)
                .copied()
                .unwrap_or(data.len() as u32);
            if key_offsets[i] > value_offsets[i]
                || value_offsets[i] > next
                || next as usize > data.len()
            {
                return Err(invalid("offsets not monotone"));
            }
        }

        Ok(BigmapHistory {
            bigmap_id,
            height,
            key_offsets,
            value_offsets,
            data,
        })
    }
}

/// Bounded cache of history snapshots keyed by `(id << 32) | height`.
pub struct HistoryCache {
    cache: TwoQueueCache<u64, Arc<BigmapHistory>>,
    stats: StatsCounters,
}

impl HistoryCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = if capacity == 0 {
            DEFAULT_HISTORY_CACHE_ENTRIES
        } else {
            capacity
        };
        HistoryCache {
            cache: TwoQueueCache::new(capacity),
            stats: StatsCounters::default(),
        }
    }

    /// The packed key only fits ids (and heights) below 2^32.
    fn check_id(id: BigmapId) -> StoreResult<()> {
        if id < 0 || id > u32::MAX as i64 {
            return Err(StoreError::HistoryIdOverflow { id });
        }
        Ok(())
    }

    fn make_key(id: BigmapId, height: Height) -> u64 {
        ((id as u64) << 32) | (height as u64 & 0xffff_ffff)
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot(self.cache.len())
    }

    pub fn purge(&self) {
        self.cache.purge();
        self.stats.reset_bytes();
    }

    /// Exact snapshot for `(id, height)`.
    pub fn get(&self, id: BigmapId, height: Height) -> Option<Arc<BigmapHistory>> {
        match self.cache.get(&Self::make_key(id, height)) {
            Some(hist) => {
                self.stats.count_hit();
                Some(hist)
            }
            None => {
                self.stats.count_miss();
                None
            }
        }
    }

    /// Snapshot for the greatest cached height at or below `height`.
    pub fn get_best(&self, id: BigmapId, height: Height) -> Option<Arc<BigmapHistory>> {
        let mut best: Option<Height> = None;
        for key in self.cache.keys() {
            if (key >> 32) != id as u64 {
                continue;
            }
            let cached_height = (key & 0xffff_ffff) as Height;
            if cached_height > height {
                continue;
            }
            if best.map_or(true, |b| b < cached_height) {
                best = Some(cached_height);
            }
        }
        match best {
            Some(best) => self.get(id, best),
            None => {
                self.stats.count_miss();
                None
            }
        }
    }

    /// Builds the live key-set at `height` from the update log and
    /// caches it under the requested height.
    pub fn build(
        &self,
        updates: &dyn Table<BigmapUpdate>,
        id: BigmapId,
        height: Height,
    ) -> StoreResult<Arc<BigmapHistory>> {
        Self::check_id(id)?;

        let mut kv: HashMap<KeyId, (Vec<u8>, Vec<u8>)> = HashMap::new();
        let mut scanned = 0usize;
        let query = Query::tagged("history.build")
            .and_eq(Field::BigmapId, id)
            .and_le(Field::Height, height);
        updates.stream(&query, &mut |row| {
            scanned += 1;
            Self::replay(&mut kv, &row);
            Ok(ControlFlow::Continue(()))
        })?;

        tracing::debug!(
            bigmap = id,
            height,
            scanned,
            live = kv.len(),
            "Built bigmap history snapshot"
        );
        Ok(self.insert(id, height, kv))
    }

    /// Rolls an existing snapshot forward to `height`. The input
    /// snapshot is left untouched; a new one is cached and returned.
    pub fn update(
        &self,
        hist: &Arc<BigmapHistory>,
        updates: &dyn Table<BigmapUpdate>,
        height: Height,
    ) -> StoreResult<Arc<BigmapHistory>> {
        Self::check_id(hist.bigmap_id)?;

        // Unpack the immutable snapshot into a transient map.
        let mut kv: HashMap<KeyId, (Vec<u8>, Vec<u8>)> = HashMap::with_capacity(hist.len());
        for (key, value) in hist.iter() {
            let kid = key_id(hist.bigmap_id, &KeyHash::of(key));
            kv.insert(kid, (key.to_vec(), value.to_vec()));
        }

        let mut scanned = 0usize;
        let query = Query::tagged("history.update")
            .and_eq(Field::BigmapId, hist.bigmap_id)
            .and_gt(Field::Height, hist.height)
            .and_le(Field::Height, height);
        updates.stream(&query, &mut |row| {
            scanned += 1;
            Self::replay(&mut kv, &row);
            Ok(ControlFlow::Continue(()))
        })?;

        tracing::debug!(
            bigmap = hist.bigmap_id,
            from = hist.height,
            height,
            scanned,
            live = kv.len(),
            "Rolled bigmap history snapshot forward"
        );
        Ok(self.insert(hist.bigmap_id, height, kv))
    }

    /// Replay one log row onto the transient key-set: updates insert or
    /// replace, removes delete, big-map level rows only carry types.
    fn replay(kv: &mut HashMap<KeyId, (Vec<u8>, Vec<u8>)>, row: &BigmapUpdate) {
        match row.action {
            DiffAction::Alloc | DiffAction::Copy => {}
            DiffAction::Update => {
                kv.insert(row.key_id, (row.key.clone(), row.value.clone()));
            }
            DiffAction::Remove => {
                kv.remove(&row.key_id);
            }
        }
    }

    fn insert(
        &self,
        id: BigmapId,
        height: Height,
        kv: HashMap<KeyId, (Vec<u8>, Vec<u8>)>,
    ) -> Arc<BigmapHistory> {
        let size_hint = kv.values().map(|(k, v)| k.len() + v.len()).sum();
        let hist = Arc::new(BigmapHistory::pack(
            id,
            height,
            kv.values().map(|(k, v)| (k.as_slice(), v.as_slice())),
            size_hint,
        ));

        let evicted = self.cache.put(Self::make_key(id, height), Arc::clone(&hist));
        self.stats.count_insert();
        self.stats.add_bytes(hist.size_bytes() as i64);
        for (_, old) in evicted {
            self.stats.add_bytes(-(old.size_bytes() as i64));
        }
        hist
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryTable;
    use crate::types::BigmapEvent;

    fn insert_update(table: &MemoryTable<BigmapUpdate>, height: Height, event: &BigmapEvent) {
        let mut rows = vec![BigmapUpdate::from_event(height, event)];
        table.insert(&mut rows).unwrap();
    }

    fn seeded_table() -> MemoryTable<BigmapUpdate> {
        let table = MemoryTable::new();
        insert_update(&table, 10, &BigmapEvent::update(1, b"a".as_slice(), b"1".as_slice()));
        insert_update(&table, 11, &BigmapEvent::update(1, b"b".as_slice(), b"2".as_slice()));
        insert_update(&table, 12, &BigmapEvent::update(1, b"a".as_slice(), b"3".as_slice()));
        insert_update(&table, 13, &BigmapEvent::remove_key(1, b"b".as_slice()));
        insert_update(&table, 13, &BigmapEvent::update(2, b"x".as_slice(), b"9".as_slice()));
        table
    }

    #[test]
    fn build_replays_updates_and_removes() {
        let table = seeded_table();
        let cache = HistoryCache::new(8);

        let hist = cache.build(&table, 1, 13).unwrap();
        assert_eq!(hist.len(), 1);
        let live = hist.get(&KeyHash::of(b"a")).unwrap();
        assert_eq!(live.value, b"3");
        assert!(hist.get(&KeyHash::of(b"b")).is_none());
    }

    #[test]
    fn build_at_earlier_height_sees_old_values() {
        let table = seeded_table();
        let cache = HistoryCache::new(8);

        let hist = cache.build(&table, 1, 11).unwrap();
        assert_eq!(hist.len(), 2);
        assert_eq!(hist.get(&KeyHash::of(b"a")).unwrap().value, b"1");
        assert_eq!(hist.get(&KeyHash::of(b"b")).unwrap().value, b"2");
    }

    #[test]
    fn get_best_picks_greatest_cached_height() {
        let table = seeded_table();
        let cache = HistoryCache::new(8);
        cache.build(&table, 1, 10).unwrap();
        cache.build(&table, 1, 12).unwrap();

        assert!(cache.get_best(1, 9).is_none());
        assert_eq!(cache.get_best(1, 11).unwrap().height, 10);
        assert_eq!(cache.get_best(1, 12).unwrap().height, 12);
        assert_eq!(cache.get_best(1, 500).unwrap().height, 12);
        assert!(cache.get_best(2, 500).is_none());
    }

    #[test]
    fn update_rolls_forward_without_touching_the_original() {
        let table = seeded_table();
        let cache = HistoryCache::new(8);

        let base = cache.build(&table, 1, 11).unwrap();
        let rolled = cache.update(&base, &table, 13).unwrap();

        assert_eq!(base.len(), 2);
        assert_eq!(rolled.len(), 1);
        assert_eq!(rolled.height, 13);
        assert_eq!(rolled.get(&KeyHash::of(b"a")).unwrap().value, b"3");
        assert_eq!(cache.get(1, 13).unwrap().as_ref(), rolled.as_ref());
    }

    #[test]
    fn negative_or_wide_ids_do_not_fit_the_packed_key() {
        let table = MemoryTable::new();
        let cache = HistoryCache::new(8);
        assert!(matches!(
            cache.build(&table, -1, 5),
            Err(StoreError::HistoryIdOverflow { id: -1 })
        ));
        assert!(matches!(
            cache.build(&table, (u32::MAX as i64) + 1, 5),
            Err(StoreError::HistoryIdOverflow { .. })
        ));
    }

    #[test]
    fn wire_round_trip_preserves_entries() {
        let table = seeded_table();
        let cache = HistoryCache::new(8);
        let hist = cache.build(&table, 1, 11).unwrap();

        let decoded = BigmapHistory::from_bytes(1, 11, &hist.to_bytes()).unwrap();
        assert_eq!(&decoded, hist.as_ref());

        assert!(BigmapHistory::from_bytes(1, 11, &[1, 0]).is_err());
        assert!(BigmapHistory::from_bytes(1, 11, &[1, 0, 0, 0, 9]).is_err());
    }

    #[test]
    fn range_clamps_and_reports_ordinals() {
        let table = seeded_table();
        let cache = HistoryCache::new(8);
        let hist = cache.build(&table, 1, 11).unwrap();

        let all = hist.range(0, 100);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].row_id, 1);
        assert_eq!(all[1].row_id, 2);
        assert!(hist.range(2, 100).is_empty());
    }

    #[test]
    fn byte_gauge_tracks_inserts_and_evictions() {
        let table = seeded_table();
        let cache = HistoryCache::new(2);
        cache.build(&table, 1, 10).unwrap();
        cache.build(&table, 1, 11).unwrap();
        let before = cache.stats().bytes;
        assert!(before > 0);

        // A third snapshot evicts one of the first two.
        cache.build(&table, 1, 12).unwrap();
        assert_eq!(cache.stats().size, 2);

        cache.purge();
        assert_eq!(cache.stats().bytes, 0);
        assert_eq!(cache.stats().size, 0);
    }
}
