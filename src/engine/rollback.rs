//! Inverse diff application: remove every mutation of one block.
//!
//! Updates of the doomed height are walked in reverse arrival order;
//! each row is undone against the most recent surviving log row for
//! the same key. Allocation counters are recomputed along the way and
//! written back once, allocations born at the doomed height are
//! deleted outright.

use std::ops::ControlFlow;

use hashbrown::hash_map::Entry;
use hashbrown::HashMap;

use crate::error::{StoreError, StoreResult};
use crate::model::{BigmapAlloc, BigmapUpdate};
use crate::store::Field;
use crate::types::{BigmapId, DiffAction, Height};

use super::BigmapEngine;

pub(super) fn delete_block(engine: &BigmapEngine, height: Height) -> StoreResult<()> {
    // Reverse arrival order: later rows are undone first so same-block
    // sequences unwind one step at a time.
    let mut doomed: Vec<BigmapUpdate> = Vec::new();
    engine.store.updates().stream(
        &engine
            .query("rollback.scan")
            .and_eq(Field::Height, height)
            .desc(),
        &mut |row| {
            doomed.push(row);
            Ok(ControlFlow::Continue(()))
        },
    )?;

    let mut touched: HashMap<BigmapId, BigmapAlloc> = HashMap::new();

    for update in &doomed {
        // Temporary bigmaps leave log rows but no allocation or live
        // state; their rows are dropped with the block below.
        if update.bigmap_id < 0 {
            tracing::trace!(
                bigmap = update.bigmap_id,
                height,
                "Skipping temporary bigmap row during rollback"
            );
            continue;
        }

        let alloc = match touched.entry(update.bigmap_id) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let mut alloc = engine.load_alloc(update.bigmap_id)?;
                // Recompute from surviving rows; the floor is the birth
                // height. A clear at this height is undone.
                alloc.updated_height = alloc.alloc_height;
                if alloc.deleted_height == height {
                    alloc.deleted_height = 0;
                }
                entry.insert(alloc)
            }
        };

        // Alloc rows, copy headers and terminal clears carry no per-key
        // state; loading the allocation above already undid the clear.
        if update.is_bigmap_level() {
            continue;
        }

        let prev = find_prev(engine, update, alloc.alloc_height, height)?;

        match update.action {
            DiffAction::Remove => rollback_remove(engine, update, prev.as_ref(), alloc)?,
            DiffAction::Update | DiffAction::Copy => {
                rollback_update(engine, update, prev.as_ref(), alloc)?
            }
            DiffAction::Alloc => {}
        }

        // Same-block rows say nothing about the pre-block state.
        if let Some(prev) = &prev {
            if prev.height < height {
                alloc.updated_height = alloc.updated_height.max(prev.height);
            }
        }
    }

    engine
        .store
        .updates()
        .delete_where(&engine.query("rollback.drop").and_eq(Field::Height, height))?;

    // Surviving allocations get their recomputed counters; allocations
    // born at this height did not exist before it.
    let mut write_back = Vec::new();
    for (_, alloc) in touched {
        if alloc.alloc_height == height {
            engine.allocs.remove(alloc.bigmap_id);
        } else {
            engine.allocs.put(&alloc);
            write_back.push(alloc);
        }
    }
    engine.store.allocs().update(&write_back)?;
    engine
        .store
        .allocs()
        .delete_where(&engine.query("rollback.drop").and_eq(Field::Height, height))?;

    tracing::debug!(height, rows = doomed.len(), "Rolled back block");
    Ok(())
}

/// Most recent log row for the same key below `update`, within the
/// allocation's lifetime and up to the doomed height. Same-block rows
/// participate so multi-step sequences unwind correctly.
fn find_prev(
    engine: &BigmapEngine,
    update: &BigmapUpdate,
    alloc_height: Height,
    height: Height,
) -> StoreResult<Option<BigmapUpdate>> {
    let mut prev = None;
    engine.store.updates().stream(
        &engine
            .query("rollback.prev")
            .and_eq(Field::BigmapId, update.bigmap_id)
            .and_eq(Field::KeyId, update.key_id)
            .and_lt(Field::RowId, update.row_id)
            .and_ge(Field::Height, alloc_height)
            .and_le(Field::Height, height)
            .desc(),
        &mut |row| {
            if row.key_hash == update.key_hash {
                prev = Some(row);
                return Ok(ControlFlow::Break(()));
            }
            Ok(ControlFlow::Continue(()))
        },
    )?;
    Ok(prev)
}

fn rollback_remove(
    engine: &BigmapEngine,
    update: &BigmapUpdate,
    prev: Option<&BigmapUpdate>,
    alloc: &mut BigmapAlloc,
) -> StoreResult<()> {
    match prev {
        Some(prev) if matches!(prev.action, DiffAction::Update | DiffAction::Copy) => {
            // Remove after update: resurrect the removed row.
            let mut values = [prev.to_live_value()];
            engine.store.values().insert(&mut values)?;
            alloc.n_live_keys += 1;
            alloc.n_updates -= 1;
        }
        Some(prev) => {
            // Double remove, nothing to resurrect.
            tracing::debug!(
                bigmap = update.bigmap_id,
                key = %update.key_hash,
                prev_action = %prev.action,
                "Rolling back remove without a live predecessor"
            );
            alloc.n_updates -= 1;
        }
        None => {
            // The connect side tolerated this remove, so its count
            // still comes off.
            tracing::warn!(
                bigmap = update.bigmap_id,
                key = %update.key_hash,
                "Missing previous update while rolling back remove"
            );
            alloc.n_updates -= 1;
        }
    }
    Ok(())
}

fn rollback_update(
    engine: &BigmapEngine,
    update: &BigmapUpdate,
    prev: Option<&BigmapUpdate>,
    alloc: &mut BigmapAlloc,
) -> StoreResult<()> {
    let live = engine.find_live(update.bigmap_id, &update.key_hash)?;

    match prev {
        None | Some(BigmapUpdate { action: DiffAction::Remove, .. }) => {
            // First-ever insert, or insert after remove: the live row
            // must go.
            let Some(live) = live else {
                tracing::warn!(
                    bigmap = update.bigmap_id,
                    key = %update.key_hash,
                    "Missing live key while rolling back update"
                );
                return Ok(());
            };
            engine.store.values().delete_ids(&[live.row_id])?;
            alloc.n_live_keys -= 1;
            alloc.n_updates -= 1;
        }
        Some(prev) => {
            // Update after update: restore the previous payload in
            // place.
            let live = live.ok_or(StoreError::MissingLiveValue {
                id: update.bigmap_id,
                key_hash: update.key_hash,
            })?;
            let mut restored = prev.to_live_value();
            restored.row_id = live.row_id;
            engine
                .store
                .values()
                .update(std::slice::from_ref(&restored))?;
            alloc.n_updates -= 1;
        }
    }
    Ok(())
}
