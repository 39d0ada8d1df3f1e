use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::error::StoreResult;
use crate::model::{BigmapAlloc, BigmapUpdate, BigmapValue};
use crate::types::RowId;

use super::query::{Order, Query};
use super::{BigmapStore, Table, TableRow};

/// In-memory table keyed by row id. Reference backend for tests and
/// embedded use; semantics mirror the LMDB backend exactly.
pub struct MemoryTable<R> {
    rows: RwLock<BTreeMap<RowId, R>>,
    next_row: AtomicU64,
}

impl<R> Default for MemoryTable<R> {
    fn default() -> Self {
        MemoryTable {
            rows: RwLock::new(BTreeMap::new()),
            next_row: AtomicU64::new(0),
        }
    }
}

impl<R> MemoryTable<R> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<R: TableRow> Table<R> for MemoryTable<R> {
    fn insert(&self, rows: &mut [R]) -> StoreResult<()> {
        let mut table = self.rows.write();
        for row in rows {
            let id = self.next_row.fetch_add(1, Ordering::Relaxed) + 1;
            row.set_row_id(id);
            table.insert(id, row.clone());
        }
        Ok(())
    }

    fn update(&self, rows: &[R]) -> StoreResult<()> {
        let mut table = self.rows.write();
        for row in rows {
            debug_assert_ne!(row.row_id(), 0, "update requires an assigned row id");
            table.insert(row.row_id(), row.clone());
        }
        Ok(())
    }

    fn delete_ids(&self, ids: &[RowId]) -> StoreResult<()> {
        let mut table = self.rows.write();
        for id in ids {
            table.remove(id);
        }
        Ok(())
    }

    fn delete_where(&self, query: &Query) -> StoreResult<usize> {
        let mut table = self.rows.write();
        let before = table.len();
        table.retain(|_, row| !query.matches(row));
        Ok(before - table.len())
    }

    fn stream(
        &self,
        query: &Query,
        each: &mut dyn FnMut(R) -> StoreResult<ControlFlow<()>>,
    ) -> StoreResult<()> {
        query.check_cancel()?;
        let (lo, hi) = query.row_id_bounds();
        if lo > hi {
            return Ok(());
        }

        // Matching rows are collected under the read lock so callbacks
        // may freely issue writes against the same table.
        let matching: Vec<R> = {
            let table = self.rows.read();
            let range = table.range(lo..=hi);
            match query.order() {
                Order::Asc => range
                    .filter(|(_, row)| query.matches(*row))
                    .map(|(_, row)| row.clone())
                    .collect(),
                Order::Desc => range
                    .rev()
                    .filter(|(_, row)| query.matches(*row))
                    .map(|(_, row)| row.clone())
                    .collect(),
            }
        };

        for row in matching {
            query.check_cancel()?;
            if let ControlFlow::Break(()) = each(row)? {
                break;
            }
        }
        Ok(())
    }
}

/// Fully in-memory [`BigmapStore`].
#[derive(Default)]
pub struct MemoryStore {
    allocs: MemoryTable<BigmapAlloc>,
    updates: MemoryTable<BigmapUpdate>,
    values: MemoryTable<BigmapValue>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BigmapStore for MemoryStore {
    fn allocs(&self) -> &dyn Table<BigmapAlloc> {
        &self.allocs
    }

    fn updates(&self) -> &dyn Table<BigmapUpdate> {
        &self.updates
    }

    fn values(&self) -> &dyn Table<BigmapValue> {
        &self.values
    }

    fn flush(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{CancelToken, Field};
    use crate::types::BigmapEvent;

    fn update_row(bigmap: i64, height: i64, key: &[u8]) -> BigmapUpdate {
        BigmapUpdate::from_event(height, &BigmapEvent::update(bigmap, key, b"v".as_slice()))
    }

    #[test]
    fn insert_assigns_monotone_row_ids() {
        let table = MemoryTable::<BigmapUpdate>::new();
        let mut rows = vec![update_row(1, 5, b"a"), update_row(1, 5, b"b")];
        table.insert(&mut rows).unwrap();
        assert_eq!(rows[0].row_id, 1);
        assert_eq!(rows[1].row_id, 2);

        let mut more = vec![update_row(2, 6, b"c")];
        table.insert(&mut more).unwrap();
        assert_eq!(more[0].row_id, 3);
    }

    #[test]
    fn stream_desc_reverses_row_order() {
        let table = MemoryTable::<BigmapUpdate>::new();
        let mut rows = vec![
            update_row(1, 5, b"a"),
            update_row(2, 5, b"b"),
            update_row(1, 6, b"c"),
        ];
        table.insert(&mut rows).unwrap();

        let mut seen = Vec::new();
        table
            .stream(
                &Query::new().and_eq(Field::BigmapId, 1i64).desc(),
                &mut |row| {
                    seen.push(row.row_id);
                    Ok(ControlFlow::Continue(()))
                },
            )
            .unwrap();
        assert_eq!(seen, vec![3, 1]);
    }

    #[test]
    fn lookup_returns_first_in_query_order() {
        let table = MemoryTable::<BigmapUpdate>::new();
        let mut rows = vec![update_row(1, 5, b"a"), update_row(1, 6, b"b")];
        table.insert(&mut rows).unwrap();

        let newest = table
            .lookup(&Query::new().and_eq(Field::BigmapId, 1i64).desc())
            .unwrap()
            .unwrap();
        assert_eq!(newest.height, 6);
    }

    #[test]
    fn delete_where_counts_removed_rows() {
        let table = MemoryTable::<BigmapUpdate>::new();
        let mut rows = vec![
            update_row(1, 5, b"a"),
            update_row(1, 6, b"b"),
            update_row(2, 6, b"c"),
        ];
        table.insert(&mut rows).unwrap();

        let removed = table
            .delete_where(&Query::new().and_eq(Field::Height, 6i64))
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(table.count(&Query::new()).unwrap(), 1);
    }

    #[test]
    fn cancelled_stream_aborts() {
        let table = MemoryTable::<BigmapUpdate>::new();
        let mut rows = vec![update_row(1, 5, b"a")];
        table.insert(&mut rows).unwrap();

        let token = CancelToken::new();
        token.cancel();
        let err = table
            .stream(&Query::new().with_cancel(token), &mut |_| {
                Ok(ControlFlow::Continue(()))
            })
            .unwrap_err();
        assert!(matches!(err, crate::error::StoreError::Cancelled));
    }
}
