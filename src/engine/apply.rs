//! Forward diff application: one block in, the exact table mutations out.

use std::ops::ControlFlow;

use crate::error::{StoreError, StoreResult};
use crate::model::{BigmapAlloc, BigmapUpdate, BigmapValue};
use crate::store::Field;
use crate::types::{BigmapEvent, Block, DiffAction, Height, Op};

use super::scratch::{ScratchSet, TempBigmap};
use super::BigmapEngine;

/// First protocol version whose alloc diffs drop type annotations and
/// require reconciliation against the contract script.
const SCRIPT_TYPES_VERSION: u32 = 13;

pub(super) fn connect_block(engine: &BigmapEngine, block: &Block) -> StoreResult<()> {
    let mut scratch = ScratchSet::new();

    for op in &block.ops {
        // Temporaries never outlive their outer operation batch.
        if !op.is_internal && !scratch.is_empty() {
            scratch.clear();
        }

        if op.events.is_empty() || !op.is_success {
            continue;
        }

        for event in &op.events {
            match event.action {
                DiffAction::Alloc => apply_alloc(engine, block, op, event, &mut scratch)?,
                DiffAction::Copy => apply_copy(engine, block.height, event, &mut scratch)?,
                DiffAction::Remove => apply_remove(engine, block.height, event, &mut scratch)?,
                DiffAction::Update => apply_update(engine, block.height, event, &mut scratch)?,
            }
        }
    }

    Ok(())
}

fn apply_alloc(
    engine: &BigmapEngine,
    block: &Block,
    op: &Op,
    event: &BigmapEvent,
    scratch: &mut ScratchSet,
) -> StoreResult<()> {
    let mut alloc = BigmapAlloc::new(block.height, event);

    // Untyped alloc diffs: recover the annotated types from the script.
    if block.version >= SCRIPT_TYPES_VERSION && event.id >= 0 {
        reconcile_types(&mut alloc, op, block.height);
    }

    if event.id < 0 {
        scratch.insert(TempBigmap::new(alloc));
        return Ok(());
    }

    // The allocation's own log row counts as its first update.
    alloc.n_updates = 1;
    let mut allocs = [alloc];
    engine.store.allocs().insert(&mut allocs)?;
    let alloc = &allocs[0];
    engine.allocs.put(alloc);

    let mut rows = [alloc.to_alloc_update(block.height)];
    engine.store.updates().insert(&mut rows)?;

    tracing::debug!(
        bigmap = alloc.bigmap_id,
        height = block.height,
        "Allocated bigmap"
    );
    Ok(())
}

fn reconcile_types(alloc: &mut BigmapAlloc, op: &Op, height: Height) {
    let Some(script) = &op.script else {
        tracing::warn!(
            bigmap = alloc.bigmap_id,
            height,
            "No contract script for bigmap alloc, keeping declared types"
        );
        return;
    };

    for (key_type, value_type) in script.bigmap_types() {
        if !key_type.matches(&alloc.key_type) {
            continue;
        }
        if !value_type.matches(&alloc.value_type) {
            continue;
        }
        alloc.key_type = key_type.clone();
        alloc.value_type = value_type.clone();
        return;
    }

    tracing::warn!(
        bigmap = alloc.bigmap_id,
        height,
        "No script type match for bigmap alloc, keeping declared types"
    );
}

fn apply_copy(
    engine: &BigmapEngine,
    height: Height,
    event: &BigmapEvent,
    scratch: &mut ScratchSet,
) -> StoreResult<()> {
    let source_id = event.source_id;
    let dest_id = event.id;

    let mut alloc;
    let mut updates;
    let mut live;

    if source_id < 0 {
        let source = scratch
            .get(source_id)
            .ok_or(StoreError::MissingScratch { id: source_id })?;

        alloc = BigmapAlloc::copy_of(&source.alloc, dest_id, height);
        updates = vec![alloc.to_copy_update(height, source_id)];
        live = Vec::with_capacity(source.live.len());
        for value in &source.live {
            let copied = value.copy_to(dest_id);
            updates.push(copied.to_copy_update(height));
            live.push(copied);
        }
    } else {
        let source_alloc = engine.load_alloc(source_id)?;
        alloc = BigmapAlloc::copy_of(&source_alloc, dest_id, height);
        updates = vec![alloc.to_copy_update(height, source_id)];
        live = Vec::new();

        engine.store.values().stream(
            &engine
                .query("bigmap.copy")
                .and_eq(Field::BigmapId, source_id),
            &mut |row| {
                let copied = row.copy_to(dest_id);
                updates.push(copied.to_copy_update(height));
                live.push(copied);
                Ok(ControlFlow::Continue(()))
            },
        )?;
    }

    // Only the per-key rows count; the copy header does not.
    alloc.n_live_keys = live.len() as i64;
    alloc.n_updates = live.len() as i64;

    if dest_id < 0 {
        scratch.insert(TempBigmap::with_contents(alloc, updates, live));
        return Ok(());
    }

    let mut allocs = [alloc];
    engine.store.allocs().insert(&mut allocs)?;
    let alloc = &allocs[0];
    engine.allocs.put(alloc);
    engine.store.values().insert(&mut live)?;
    engine.store.updates().insert(&mut updates)?;

    tracing::debug!(
        source = source_id,
        bigmap = dest_id,
        height,
        keys = alloc.n_live_keys,
        "Copied bigmap"
    );
    Ok(())
}

fn apply_remove(
    engine: &BigmapEngine,
    height: Height,
    event: &BigmapEvent,
    scratch: &mut ScratchSet,
) -> StoreResult<()> {
    if event.key_hash.is_zero() {
        return apply_remove_all(engine, height, event, scratch);
    }

    // Single key removal from a temporary bigmap.
    if event.id < 0 {
        let temp = scratch
            .get_mut(event.id)
            .ok_or(StoreError::MissingScratch { id: event.id })?;

        if let Some(pos) = temp
            .live
            .iter()
            .position(|value| value.key_hash == event.key_hash)
        {
            let removed = temp.live.remove(pos);
            let mut rows = [removed.to_remove_update(height)];
            engine.store.updates().insert(&mut rows)?;
            temp.alloc.n_live_keys -= 1;
        }
        // Drop the first pending update for this key from the scratch
        // list; later copies must not resurrect the removed entry.
        if let Some(pos) = temp
            .updates
            .iter()
            .position(|row| row.key_hash == event.key_hash)
        {
            temp.updates.remove(pos);
        }
        return Ok(());
    }

    // Single key removal from a durable bigmap.
    let mut alloc = engine.load_alloc(event.id)?;
    match engine.find_live(event.id, &event.key_hash)? {
        Some(prev) => {
            engine.store.values().delete_ids(&[prev.row_id])?;
            alloc.n_live_keys -= 1;
        }
        None => {
            // Double removes exist on-chain; record the update only.
            tracing::debug!(
                bigmap = event.id,
                key = %event.key_hash,
                height,
                "Remove of non-existing key"
            );
        }
    }
    alloc.updated_height = height;
    alloc.n_updates += 1;

    let mut rows = [BigmapUpdate::from_event(height, event)];
    engine.store.updates().insert(&mut rows)?;
    engine.store_alloc(&alloc)?;
    Ok(())
}

/// Full big-map clear: retire every live key and the map itself.
fn apply_remove_all(
    engine: &BigmapEngine,
    height: Height,
    event: &BigmapEvent,
    scratch: &mut ScratchSet,
) -> StoreResult<()> {
    if event.id < 0 {
        let temp = scratch
            .remove(event.id)
            .ok_or(StoreError::MissingScratch { id: event.id })?;
        let mut rows = [temp.alloc.to_remove_update(height)];
        engine.store.updates().insert(&mut rows)?;
        return Ok(());
    }

    let mut alloc = engine.load_alloc(event.id)?;

    let mut doomed_ids = Vec::new();
    let mut removes = Vec::new();
    engine.store.values().stream(
        &engine
            .query("bigmap.clear")
            .and_eq(Field::BigmapId, event.id),
        &mut |row| {
            doomed_ids.push(row.row_id);
            removes.push(row.to_remove_update(height));
            Ok(ControlFlow::Continue(()))
        },
    )?;

    alloc.n_live_keys = 0;
    alloc.n_updates += removes.len() as i64;
    alloc.updated_height = height;
    alloc.deleted_height = height;

    engine.store.updates().insert(&mut removes)?;
    // Terminal remove row for the map as a whole, not counted.
    let mut terminal = [alloc.to_remove_update(height)];
    engine.store.updates().insert(&mut terminal)?;
    engine.store_alloc(&alloc)?;
    engine.store.values().delete_ids(&doomed_ids)?;

    tracing::debug!(
        bigmap = event.id,
        height,
        keys = doomed_ids.len(),
        "Cleared bigmap"
    );
    Ok(())
}

fn apply_update(
    engine: &BigmapEngine,
    height: Height,
    event: &BigmapEvent,
    scratch: &mut ScratchSet,
) -> StoreResult<()> {
    // Update on a temporary bigmap.
    if event.id < 0 {
        let temp = scratch
            .get_mut(event.id)
            .ok_or(StoreError::MissingScratch { id: event.id })?;

        let value = BigmapValue::from_event(event);
        match temp
            .live
            .iter()
            .position(|live| live.key_hash == event.key_hash)
        {
            Some(pos) => {
                temp.alloc.n_updates += 1;
                temp.live[pos] = value;
            }
            None => {
                temp.alloc.n_live_keys += 1;
                temp.alloc.n_updates += 1;
                temp.live.push(value);
            }
        }

        // The log row is authoritative history even for temporaries.
        let mut rows = [BigmapUpdate::from_event(height, event)];
        engine.store.updates().insert(&mut rows)?;
        temp.updates.push(rows[0].clone());
        return Ok(());
    }

    // Update on a durable bigmap.
    let mut alloc = engine.load_alloc(event.id)?;
    let mut value = BigmapValue::from_event(event);
    match engine.find_live(event.id, &event.key_hash)? {
        Some(prev) => {
            value.row_id = prev.row_id;
            engine.store.values().update(std::slice::from_ref(&value))?;
        }
        None => {
            let mut values = [value];
            engine.store.values().insert(&mut values)?;
            alloc.n_live_keys += 1;
        }
    }
    alloc.updated_height = height;
    alloc.n_updates += 1;

    let mut rows = [BigmapUpdate::from_event(height, event)];
    engine.store.updates().insert(&mut rows)?;
    engine.store_alloc(&alloc)?;
    Ok(())
}
