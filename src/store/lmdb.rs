use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use heed::byteorder::BigEndian;
use heed::types::{SerdeBincode, U64};
use heed::{Database, Env, EnvFlags, EnvOpenOptions};

use crate::error::StoreResult;
use crate::model::{BigmapAlloc, BigmapUpdate, BigmapValue};
use crate::types::RowId;

use super::query::{Order, Query};
use super::{BigmapStore, Table, TableRow};

/// 2 GiB of reserved address space; free on 64-bit systems until used.
pub const DEFAULT_MAP_SIZE: usize = 2 << 30;

const MAX_DBS: u32 = 4;

/// One LMDB-backed table: rows keyed by big-endian row id so forward
/// and reverse range scans follow insertion order.
pub struct LmdbTable<R: TableRow> {
    env: Arc<Env>,
    db: Database<U64<BigEndian>, SerdeBincode<R>>,
    next_row: AtomicU64,
}

impl<R: TableRow> LmdbTable<R> {
    fn open(env: Arc<Env>, db: Database<U64<BigEndian>, SerdeBincode<R>>) -> StoreResult<Self> {
        let txn = env.read_txn()?;
        let last = db.last(&txn)?.map(|(id, _)| id).unwrap_or(0);
        drop(txn);
        Ok(LmdbTable {
            env,
            db,
            next_row: AtomicU64::new(last),
        })
    }
}

impl<R: TableRow> Table<R> for LmdbTable<R> {
    fn insert(&self, rows: &mut [R]) -> StoreResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut txn = self.env.write_txn()?;
        for row in rows {
            let id = self.next_row.fetch_add(1, Ordering::Relaxed) + 1;
            row.set_row_id(id);
            self.db.put(&mut txn, &id, row)?;
        }
        txn.commit()?;
        Ok(())
    }

    fn update(&self, rows: &[R]) -> StoreResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut txn = self.env.write_txn()?;
        for row in rows {
            debug_assert_ne!(row.row_id(), 0, "update requires an assigned row id");
            self.db.put(&mut txn, &row.row_id(), row)?;
        }
        txn.commit()?;
        Ok(())
    }

    fn delete_ids(&self, ids: &[RowId]) -> StoreResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut txn = self.env.write_txn()?;
        for id in ids {
            self.db.delete(&mut txn, id)?;
        }
        txn.commit()?;
        Ok(())
    }

    fn delete_where(&self, query: &Query) -> StoreResult<usize> {
        let (lo, hi) = query.row_id_bounds();
        if lo > hi {
            return Ok(0);
        }

        let mut txn = self.env.write_txn()?;
        let mut doomed = Vec::new();
        for item in self.db.range(&txn, &(lo..=hi))? {
            let (id, row) = item?;
            query.check_cancel()?;
            if query.matches(&row) {
                doomed.push(id);
            }
        }
        for id in &doomed {
            self.db.delete(&mut txn, id)?;
        }
        txn.commit()?;
        Ok(doomed.len())
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

        let txn = self.env.read_txn()?;
        match query.order() {
            Order::Asc => {
                for item in self.db.range(&txn, &(lo..=hi))? {
                    let (_, row) = item?;
                    query.check_cancel()?;
                    if !query.matches(&row) {
                        continue;
                    }
                    if let ControlFlow::Break(()) = each(row)? {
                        break;
                    }
                }
            }
            Order::Desc => {
                for item in self.db.rev_range(&txn, &(lo..=hi))? {
                    let (_, row) = item?;
                    query.check_cancel()?;
                    if !query.matches(&row) {
                        continue;
                    }
                    if let ControlFlow::Break(()) = each(row)? {
                        break;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Durable [`BigmapStore`] over a shared LMDB environment with one
/// named database per table.
pub struct LmdbStore {
    env: Arc<Env>,
    path: PathBuf,
    allocs: LmdbTable<BigmapAlloc>,
    updates: LmdbTable<BigmapUpdate>,
    values: LmdbTable<BigmapValue>,
}

impl LmdbStore {
    /// Opens (or creates) the store with the default map size.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Self::open_with_map_size(path, DEFAULT_MAP_SIZE)
    }

    pub fn open_with_map_size(path: impl AsRef<Path>, map_size: usize) -> StoreResult<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;

        let mut options = EnvOpenOptions::new();
        options.map_size(map_size);
        options.max_dbs(MAX_DBS);
        let env = match unsafe { options.open(path) } {
            Ok(env) => env,
            Err(err) => {
                tracing::error!(path = ?path, map_size, ?err, "Failed to open LMDB environment");
                return Err(err.into());
            }
        };

        Self::from_env(Arc::new(env), path.to_path_buf(), true)
    }

    /// Opens an existing store read-only, for API worker processes.
    pub fn open_read_only(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let mut options = EnvOpenOptions::new();
        options.map_size(DEFAULT_MAP_SIZE);
        options.max_dbs(MAX_DBS);
        unsafe {
            options.flags(EnvFlags::READ_ONLY);
        }
        let env = unsafe { options.open(path)? };
        Self::from_env(Arc::new(env), path.to_path_buf(), false)
    }

    fn from_env(env: Arc<Env>, path: PathBuf, create: bool) -> StoreResult<Self> {
        type AllocDb = Database<U64<BigEndian>, SerdeBincode<BigmapAlloc>>;
        type UpdateDb = Database<U64<BigEndian>, SerdeBincode<BigmapUpdate>>;
        type ValueDb = Database<U64<BigEndian>, SerdeBincode<BigmapValue>>;

        let (alloc_db, update_db, value_db): (AllocDb, UpdateDb, ValueDb) = if create {
            let mut txn = env.write_txn()?;
            let alloc_db = env.create_database(&mut txn, Some(BigmapAlloc::TABLE))?;
            let update_db = env.create_database(&mut txn, Some(BigmapUpdate::TABLE))?;
            let value_db = env.create_database(&mut txn, Some(BigmapValue::TABLE))?;
            txn.commit()?;
            (alloc_db, update_db, value_db)
        } else {
            let txn = env.read_txn()?;
            let alloc_db = env
                .open_database(&txn, Some(BigmapAlloc::TABLE))?
                .ok_or_else(|| heed::Error::from(heed::MdbError::NotFound))?;
            let update_db = env
                .open_database(&txn, Some(BigmapUpdate::TABLE))?
                .ok_or_else(|| heed::Error::from(heed::MdbError::NotFound))?;
            let value_db = env
                .open_database(&txn, Some(BigmapValue::TABLE))?
                .ok_or_else(|| heed::Error::from(heed::MdbError::NotFound))?;
            txn.commit()?;
            (alloc_db, update_db, value_db)
        };

        Ok(LmdbStore {
            allocs: LmdbTable::open(Arc::clone(&env), alloc_db)?,
            updates: LmdbTable::open(Arc::clone(&env), update_db)?,
            values: LmdbTable::open(Arc::clone(&env), value_db)?,
            env,
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn env(&self) -> Arc<Env> {
        Arc::clone(&self.env)
    }
}

impl BigmapStore for LmdbStore {
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
        self.env.force_sync()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use tempfile::tempdir_in;

    use crate::store::Field;
    use crate::types::BigmapEvent;

    fn testdata_dir() -> PathBuf {
        let dir = std::env::current_dir().unwrap().join("target/testdata");
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn update_row(bigmap: i64, height: i64, key: &[u8]) -> BigmapUpdate {
        BigmapUpdate::from_event(height, &BigmapEvent::update(bigmap, key, b"v".as_slice()))
    }

    #[test]
    fn insert_stream_and_delete_round_trip() {
        let tmp = tempdir_in(testdata_dir()).unwrap();
        let store = LmdbStore::open(tmp.path()).unwrap();

        let mut rows = vec![
            update_row(1, 5, b"a"),
            update_row(2, 5, b"b"),
            update_row(1, 6, b"c"),
        ];
        store.updates().insert(&mut rows).unwrap();
        assert_eq!(rows[2].row_id, 3);

        let mut seen = Vec::new();
        store
            .updates()
            .stream(
                &Query::new().and_eq(Field::BigmapId, 1i64).desc(),
                &mut |row| {
                    seen.push((row.row_id, row.height));
                    Ok(ControlFlow::Continue(()))
                },
            )
            .unwrap();
        assert_eq!(seen, vec![(3, 6), (1, 5)]);

        let removed = store
            .updates()
            .delete_where(&Query::new().and_eq(Field::Height, 5i64))
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.updates().count(&Query::new()).unwrap(), 1);
        store.flush().unwrap();
    }

    #[test]
    fn reopen_reseeds_monotone_row_ids() {
        let tmp = tempdir_in(testdata_dir()).unwrap();
        {
            let store = LmdbStore::open(tmp.path()).unwrap();
            let mut rows = vec![update_row(1, 5, b"a"), update_row(1, 5, b"b")];
            store.updates().insert(&mut rows).unwrap();
        }

        let store = LmdbStore::open(tmp.path()).unwrap();
        let mut rows = vec![update_row(1, 6, b"c")];
        store.updates().insert(&mut rows).unwrap();
        assert_eq!(rows[0].row_id, 3);
    }

    #[test]
    fn update_preserves_row_id() {
        let tmp = tempdir_in(testdata_dir()).unwrap();
        let store = LmdbStore::open(tmp.path()).unwrap();

        let mut rows = vec![update_row(1, 5, b"a")];
        store.updates().insert(&mut rows).unwrap();

        let mut changed = rows[0].clone();
        changed.value = b"w".to_vec();
        store.updates().update(&[changed.clone()]).unwrap();

        let found = store
            .updates()
            .lookup(&Query::new().and_eq(Field::RowId, rows[0].row_id))
            .unwrap()
            .unwrap();
        assert_eq!(found.value, b"w");
    }
}
