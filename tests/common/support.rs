use std::ops::ControlFlow;
use std::sync::Arc;

use mapledger::store::Query;
use mapledger::types::{BigmapEvent, BigmapId, Block, Height, Op, TypeDesc};
use mapledger::{
    BigmapAlloc, BigmapEngine, BigmapStore, BigmapUpdate, BigmapValue, KeyHash, MemoryStore,
};

pub fn memory_engine() -> BigmapEngine {
    BigmapEngine::with_defaults(Arc::new(MemoryStore::new()))
}

pub fn nat_string_alloc(id: BigmapId) -> BigmapEvent {
    BigmapEvent::alloc(id, TypeDesc::new("nat"), TypeDesc::new("string"))
}

pub fn block(height: Height, ops: Vec<Op>) -> Block {
    Block::new(height, ops)
}

pub fn simple_block(height: Height, events: Vec<BigmapEvent>) -> Block {
    Block::new(height, vec![Op::new(events)])
}

/// A key hash that shares its leading four bytes with every other hash
/// produced by this helper, forcing key-id collisions.
pub fn colliding_hash(tail: u8) -> KeyHash {
    let mut raw = [0u8; 32];
    raw[0] = 0xC0;
    raw[1] = 0x11;
    raw[2] = 0x1D;
    raw[3] = 0xE5;
    raw[31] = tail;
    KeyHash(raw)
}

pub fn all_allocs(store: &dyn BigmapStore) -> Vec<BigmapAlloc> {
    let mut rows = Vec::new();
    store
        .allocs()
        .stream(&Query::new(), &mut |row| {
            rows.push(row);
            Ok(ControlFlow::Continue(()))
        })
        .unwrap();
    rows
}

pub fn all_updates(store: &dyn BigmapStore) -> Vec<BigmapUpdate> {
    let mut rows = Vec::new();
    store
        .updates()
        .stream(&Query::new(), &mut |row| {
            rows.push(row);
            Ok(ControlFlow::Continue(()))
        })
        .unwrap();
    rows
}

pub fn all_values(store: &dyn BigmapStore) -> Vec<BigmapValue> {
    let mut rows = Vec::new();
    store
        .values()
        .stream(&Query::new(), &mut |row| {
            rows.push(row);
            Ok(ControlFlow::Continue(()))
        })
        .unwrap();
    rows
}

/// Live rows with the store-assigned row id masked out, sorted, so
/// states can be compared across a rollback that re-inserts rows.
pub fn live_fingerprint(store: &dyn BigmapStore) -> Vec<(BigmapId, u64, Vec<u8>, Vec<u8>)> {
    let mut rows: Vec<_> = all_values(store)
        .into_iter()
        .map(|row| (row.bigmap_id, row.key_id, row.key, row.value))
        .collect();
    rows.sort();
    rows
}

pub fn live_values_of(store: &dyn BigmapStore, id: BigmapId) -> Vec<BigmapValue> {
    all_values(store)
        .into_iter()
        .filter(|row| row.bigmap_id == id)
        .collect()
}

pub fn updates_at(store: &dyn BigmapStore, height: Height) -> Vec<BigmapUpdate> {
    all_updates(store)
        .into_iter()
        .filter(|row| row.height == height)
        .collect()
}
