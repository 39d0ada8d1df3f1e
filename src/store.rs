//! Narrow adapter over the three indexed tables the engine mutates.
//!
//! Rows are plain serde structs keyed by a store-assigned, strictly
//! monotone 64-bit row id. Scans are streamed in row-id order with
//! predicate evaluation after decode; callers stop early by returning
//! [`ControlFlow::Break`].

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StoreResult;
use crate::model::{BigmapAlloc, BigmapUpdate, BigmapValue};
use crate::types::RowId;

pub mod lmdb;
pub mod memory;
pub mod query;

pub use lmdb::LmdbStore;
pub use memory::MemoryStore;
pub use query::{Field, FieldValue, Filter, Order, Query};

/// Cooperative cancellation flag shared between a query issuer and the
/// scans it drives. Cancelling aborts in-flight streams with
/// [`crate::error::StoreError::Cancelled`]; the engine performs no
/// partial cache writes on that path.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// A persistent row: serde-serializable, row-id addressable, and
/// queryable through its indexed fields.
pub trait TableRow:
    Clone + Send + Sync + Serialize + DeserializeOwned + 'static
{
    const TABLE: &'static str;

    fn row_id(&self) -> RowId;
    fn set_row_id(&mut self, id: RowId);

    /// Indexed field access for predicate evaluation. `None` means the
    /// field does not exist on this table; such predicates never match.
    fn field(&self, field: Field) -> Option<FieldValue>;
}

/// One indexed table. Implementations assign row ids on insert and
/// surface every failure as a [`crate::error::StoreError`].
pub trait Table<R: TableRow>: Send + Sync {
    /// Inserts a batch, assigning each row a fresh monotone row id.
    fn insert(&self, rows: &mut [R]) -> StoreResult<()>;

    /// Rewrites rows in place by their existing row id.
    fn update(&self, rows: &[R]) -> StoreResult<()>;

    fn delete_ids(&self, ids: &[RowId]) -> StoreResult<()>;

    /// Deletes every row matching the query; returns the count.
    fn delete_where(&self, query: &Query) -> StoreResult<usize>;

    /// Streams matching rows in query order until exhaustion or until
    /// the callback breaks.
    fn stream(
        &self,
        query: &Query,
        each: &mut dyn FnMut(R) -> StoreResult<ControlFlow<()>>,
    ) -> StoreResult<()>;

    /// First matching row in query order.
    fn lookup(&self, query: &Query) -> StoreResult<Option<R>> {
        let mut found = None;
        self.stream(query, &mut |row| {
            found = Some(row);
            Ok(ControlFlow::Break(()))
        })?;
        Ok(found)
    }

    fn count(&self, query: &Query) -> StoreResult<usize> {
        let mut n = 0;
        self.stream(query, &mut |_| {
            n += 1;
            Ok(ControlFlow::Continue(()))
        })?;
        Ok(n)
    }
}

/// The three tables of the big-map subsystem plus the flush hook the
/// crawler drives between blocks.
pub trait BigmapStore: Send + Sync {
    fn allocs(&self) -> &dyn Table<BigmapAlloc>;
    fn updates(&self) -> &dyn Table<BigmapUpdate>;
    fn values(&self) -> &dyn Table<BigmapValue>;

    /// Forces durable persistence of previously committed batches.
    fn flush(&self) -> StoreResult<()>;
}
