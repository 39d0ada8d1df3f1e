use serde::{Deserialize, Serialize};

use crate::store::{Field, FieldValue, TableRow};
use crate::types::{BigmapEvent, BigmapId, DiffAction, Height, KeyHash, RowId};

use super::typedesc::TypeDesc;
use super::update::BigmapUpdate;
use super::value::key_id;

/// The metadata record of one big-map: identity, types and counters.
///
/// Counter invariants: `alloc_height <= updated_height`,
/// `n_live_keys >= 0`, `deleted_height` is 0 while the map is live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BigmapAlloc {
    pub row_id: RowId,
    pub bigmap_id: BigmapId,
    pub key_type: TypeDesc,
    pub value_type: TypeDesc,
    pub alloc_height: Height,
    pub updated_height: Height,
    pub deleted_height: Height,
    pub n_live_keys: i64,
    pub n_updates: i64,
}

impl BigmapAlloc {
    /// Allocation born from an `Alloc` event. Missing type fields fall
    /// back to `unit`, matching untyped legacy diffs.
    pub fn new(height: Height, event: &BigmapEvent) -> Self {
        BigmapAlloc {
            row_id: 0,
            bigmap_id: event.id,
            key_type: event
                .key_type
                .clone()
                .unwrap_or_else(|| TypeDesc::new("unit")),
            value_type: event
                .value_type
                .clone()
                .unwrap_or_else(|| TypeDesc::new("unit")),
            alloc_height: height,
            updated_height: height,
            deleted_height: 0,
            n_live_keys: 0,
            n_updates: 0,
        }
    }

    /// Allocation born from a `Copy` event, cloning the source's types.
    pub fn copy_of(source: &BigmapAlloc, dest_id: BigmapId, height: Height) -> Self {
        BigmapAlloc {
            row_id: 0,
            bigmap_id: dest_id,
            key_type: source.key_type.clone(),
            value_type: source.value_type.clone(),
            alloc_height: height,
            updated_height: height,
            deleted_height: 0,
            n_live_keys: 0,
            n_updates: 0,
        }
    }

    #[inline]
    pub fn is_deleted(&self) -> bool {
        self.deleted_height > 0
    }

    /// The big-map level `Alloc` log row.
    pub fn to_alloc_update(&self, height: Height) -> BigmapUpdate {
        self.bigmap_level_row(DiffAction::Alloc, height, 0)
    }

    /// The big-map level `Copy` header row referencing the source map.
    pub fn to_copy_update(&self, height: Height, source_id: BigmapId) -> BigmapUpdate {
        self.bigmap_level_row(DiffAction::Copy, height, source_id)
    }

    /// The terminal big-map level `Remove` row of a full clear.
    pub fn to_remove_update(&self, height: Height) -> BigmapUpdate {
        self.bigmap_level_row(DiffAction::Remove, height, 0)
    }

    fn bigmap_level_row(
        &self,
        action: DiffAction,
        height: Height,
        source_id: BigmapId,
    ) -> BigmapUpdate {
        BigmapUpdate {
            row_id: 0,
            bigmap_id: self.bigmap_id,
            height,
            action,
            key_id: key_id(self.bigmap_id, &KeyHash::ZERO),
            key_hash: KeyHash::ZERO,
            key: Vec::new(),
            value: Vec::new(),
            source_id,
        }
    }
}

impl TableRow for BigmapAlloc {
    const TABLE: &'static str = "allocs";

    fn row_id(&self) -> RowId {
        self.row_id
    }

    fn set_row_id(&mut self, id: RowId) {
        self.row_id = id;
    }

    fn field(&self, field: Field) -> Option<FieldValue> {
        match field {
            Field::RowId => Some(FieldValue::U64(self.row_id)),
            Field::BigmapId => Some(FieldValue::I64(self.bigmap_id)),
            Field::KeyId => None,
            // An allocation's natural height is the height it was born at.
            Field::Height => Some(FieldValue::I64(self.alloc_height)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alloc_event(id: BigmapId) -> BigmapEvent {
        BigmapEvent::alloc(id, TypeDesc::new("nat"), TypeDesc::new("string"))
    }

    #[test]
    fn new_alloc_starts_live_with_zero_counters() {
        let alloc = BigmapAlloc::new(10, &alloc_event(1));
        assert_eq!(alloc.bigmap_id, 1);
        assert_eq!(alloc.alloc_height, 10);
        assert_eq!(alloc.updated_height, 10);
        assert!(!alloc.is_deleted());
        assert_eq!(alloc.n_live_keys, 0);
        assert_eq!(alloc.n_updates, 0);
    }

    #[test]
    fn copy_clones_types_and_resets_counters() {
        let mut src = BigmapAlloc::new(10, &alloc_event(1));
        src.n_live_keys = 4;
        src.n_updates = 9;
        let dst = BigmapAlloc::copy_of(&src, 7, 20);
        assert_eq!(dst.bigmap_id, 7);
        assert_eq!(dst.key_type, src.key_type);
        assert_eq!(dst.value_type, src.value_type);
        assert_eq!(dst.alloc_height, 20);
        assert_eq!(dst.n_live_keys, 0);
        assert_eq!(dst.n_updates, 0);
    }

    #[test]
    fn bigmap_level_rows_carry_zero_hash() {
        let alloc = BigmapAlloc::new(10, &alloc_event(3));
        let row = alloc.to_copy_update(12, 1);
        assert_eq!(row.action, DiffAction::Copy);
        assert_eq!(row.source_id, 1);
        assert!(row.is_bigmap_level());
        assert_eq!(row.key_id, key_id(3, &KeyHash::ZERO));
        assert_eq!(alloc.to_remove_update(13).action, DiffAction::Remove);
        assert_eq!(alloc.to_alloc_update(10).action, DiffAction::Alloc);
    }
}
