//! The diff application engine.
//!
//! Driven by a single block-processing thread: `connect_block` consumes
//! a block's ordered operations and emits the exact table mutations,
//! `disconnect_block` reverses every mutation belonging to a height.
//! The caches tolerate concurrent readers from API worker threads.

use std::ops::ControlFlow;
use std::sync::Arc;

use crate::cache::{AllocCache, BigmapHistory, CacheStats, HistoryCache};
use crate::config::EngineConfig;
use crate::error::{StoreError, StoreResult};
use crate::model::{key_id, BigmapAlloc, BigmapValue};
use crate::store::{BigmapStore, CancelToken, Field, Query};
use crate::types::{BigmapId, Block, Height, KeyHash};

mod apply;
mod rollback;
mod scratch;

pub struct BigmapEngine {
    pub(crate) store: Arc<dyn BigmapStore>,
    pub(crate) allocs: AllocCache,
    history: HistoryCache,
    cancel: CancelToken,
}

impl BigmapEngine {
    pub fn new(store: Arc<dyn BigmapStore>, config: EngineConfig) -> Self {
        BigmapEngine {
            store,
            allocs: AllocCache::new(config.alloc_cache_entries),
            history: HistoryCache::new(config.history_cache_entries),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_defaults(store: Arc<dyn BigmapStore>) -> Self {
        Self::new(store, EngineConfig::default())
    }

    /// Applies a block's big-map events in delivered order.
    ///
    /// # Errors
    ///
    /// Store failures and invariant violations (missing allocation or
    /// scratch, collision mismatch) abort the block; the caller is
    /// expected to purge caches before retrying.
    pub fn connect_block(&self, block: &Block) -> StoreResult<()> {
        apply::connect_block(self, block)
    }

    /// Rolls back every mutation of `height`, leaving the tables as
    /// they were at `height - 1`. Both caches are purged first.
    pub fn disconnect_block(&self, height: Height) -> StoreResult<()> {
        self.allocs.purge();
        // Snapshots at or above the rolled-back height are stale.
        self.history.purge();
        rollback::delete_block(self, height)
    }

    /// Rollback without the cache purge, for callers that manage cache
    /// lifetime themselves.
    pub fn delete_block(&self, height: Height) -> StoreResult<()> {
        rollback::delete_block(self, height)
    }

    /// Forces the table store to persist.
    pub fn flush(&self) -> StoreResult<()> {
        self.store.flush()
    }

    /// Allocation record for `id`, through the cache.
    pub fn alloc(&self, id: BigmapId) -> StoreResult<BigmapAlloc> {
        self.load_alloc(id)
    }

    /// Live key-set of `id` at `height`: exact cache hit, incremental
    /// roll-forward from the best older snapshot, or a full log replay.
    pub fn history_at(&self, id: BigmapId, height: Height) -> StoreResult<Arc<BigmapHistory>> {
        if let Some(hist) = self.history.get(id, height) {
            return Ok(hist);
        }
        if let Some(best) = self.history.get_best(id, height) {
            if best.height == height {
                return Ok(best);
            }
            return self.history.update(&best, self.store.updates(), height);
        }
        self.history.build(self.store.updates(), id, height)
    }

    pub fn store(&self) -> &Arc<dyn BigmapStore> {
        &self.store
    }

    pub fn history_cache(&self) -> &HistoryCache {
        &self.history
    }

    pub fn alloc_cache_stats(&self) -> CacheStats {
        self.allocs.stats()
    }

    /// Cancellation flag honoured by every scan this engine issues.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub(crate) fn query(&self, tag: &'static str) -> Query {
        Query::tagged(tag).with_cancel(self.cancel.clone())
    }

    pub(crate) fn load_alloc(&self, id: BigmapId) -> StoreResult<BigmapAlloc> {
        if let Some(alloc) = self.allocs.get(id) {
            return Ok(alloc);
        }
        let alloc = self
            .store
            .allocs()
            .lookup(&self.query("bigmap.find_alloc").and_eq(Field::BigmapId, id))?
            .ok_or(StoreError::MissingAlloc { id })?;
        self.allocs.put(&alloc);
        Ok(alloc)
    }

    /// Persists an allocation and mirrors it into the cache so
    /// subsequent reads stay consistent.
    pub(crate) fn store_alloc(&self, alloc: &BigmapAlloc) -> StoreResult<()> {
        self.store.allocs().update(std::slice::from_ref(alloc))?;
        self.allocs.put(alloc);
        Ok(())
    }

    /// Most recent live row for `(id, key_hash)`. The `key_id` filter
    /// narrows the scan; the full hash comparison resolves collisions.
    pub(crate) fn find_live(
        &self,
        id: BigmapId,
        key_hash: &KeyHash,
    ) -> StoreResult<Option<BigmapValue>> {
        let mut found = None;
        self.store.values().stream(
            &self
                .query("bigmap.find_live")
                .and_eq(Field::BigmapId, id)
                .and_eq(Field::KeyId, key_id(id, key_hash))
                .desc(),
            &mut |row| {
                if row.key_hash == *key_hash {
                    found = Some(row);
                    return Ok(ControlFlow::Break(()));
                }
                Ok(ControlFlow::Continue(()))
            },
        )?;
        Ok(found)
    }
}
