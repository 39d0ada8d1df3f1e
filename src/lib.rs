//! # Mapledger
//!
//! A durable, versioned big-map state engine for blockchain indexers:
//! per-block key/value diffs in, three indexed tables out, with exact
//! block-granular rollback and a two-tier cache for historical
//! point-in-time queries.
//!
//! ## Features
//!
//! - **Append path**: ordered per-block diff application with
//!   copy-on-write temporaries and batch table writes
//! - **Exact rollback**: any block's mutations can be reversed from the
//!   update log alone
//! - **History snapshots**: offset-packed live key-sets at arbitrary
//!   past heights, built and rolled forward incrementally
//! - **Pluggable storage**: LMDB-backed tables for production, an
//!   in-memory store for tests and embedding
//!
//! ## Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use mapledger::{BigmapEngine, MemoryStore};
//! use mapledger::types::{BigmapEvent, Block, Op, TypeDesc};
//!
//! let engine = BigmapEngine::with_defaults(Arc::new(MemoryStore::new()));
//!
//! // Allocate bigmap 1 and insert one key at height 10.
//! let block = Block::new(10, vec![Op::new(vec![
//!     BigmapEvent::alloc(1, TypeDesc::new("nat"), TypeDesc::new("string")),
//!     BigmapEvent::update(1, b"key".as_slice(), b"value".as_slice()),
//! ])]);
//! engine.connect_block(&block)?;
//! assert_eq!(engine.alloc(1)?.n_live_keys, 1);
//!
//! // Reorg: drop the block again.
//! engine.disconnect_block(10)?;
//! assert!(engine.alloc(1).is_err());
//! # Ok::<(), mapledger::StoreError>(())
//! ```

pub mod api;
pub mod cache;
pub mod engine;
pub mod model;
pub mod store;

pub use crate::api::{config, error, types};

pub use api::config::EngineConfig;
pub use api::error::{StoreError, StoreResult};
pub use cache::{AllocCache, BigmapHistory, CacheStats, HistoryCache, TwoQueueCache};
pub use engine::BigmapEngine;
pub use model::{key_id, BigmapAlloc, BigmapUpdate, BigmapValue, ContractScript, TypeDesc};
pub use store::{
    BigmapStore, CancelToken, Field, FieldValue, LmdbStore, MemoryStore, Order, Query, Table,
    TableRow,
};
pub use types::{BigmapEvent, BigmapId, Block, DiffAction, Height, KeyHash, KeyId, Op, RowId};
