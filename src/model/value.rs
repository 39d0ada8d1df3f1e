use serde::{Deserialize, Serialize};

use crate::store::{Field, FieldValue, TableRow};
use crate::types::{BigmapEvent, BigmapId, DiffAction, Height, KeyHash, KeyId, RowId};

use super::update::BigmapUpdate;

/// Packs a bigmap id and the leading key-hash bytes into the 64-bit
/// filterable key index.
///
/// Collisions are possible by construction; every lookup through a key
/// id must confirm the full key hash before trusting the row.
#[inline]
pub fn key_id(id: BigmapId, key_hash: &KeyHash) -> KeyId {
    ((id as u64) << 32) | key_hash.short() as u64
}

/// A currently-live key/value pair of one big-map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BigmapValue {
    pub row_id: RowId,
    pub bigmap_id: BigmapId,
    pub key_id: KeyId,
    pub key_hash: KeyHash,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl BigmapValue {
    pub fn from_event(event: &BigmapEvent) -> Self {
        BigmapValue {
            row_id: 0,
            bigmap_id: event.id,
            key_id: key_id(event.id, &event.key_hash),
            key_hash: event.key_hash,
            key: event.key.clone(),
            value: event.value.clone(),
        }
    }

    /// Re-keys this live entry for a copy destination. The row id is
    /// cleared so the store assigns a fresh one on insert.
    pub fn copy_to(&self, dest_id: BigmapId) -> Self {
        BigmapValue {
            row_id: 0,
            bigmap_id: dest_id,
            key_id: key_id(dest_id, &self.key_hash),
            key_hash: self.key_hash,
            key: self.key.clone(),
            value: self.value.clone(),
        }
    }

    /// Synthesises the per-key `Remove` log row that retires this entry.
    pub fn to_remove_update(&self, height: Height) -> BigmapUpdate {
        BigmapUpdate {
            row_id: 0,
            bigmap_id: self.bigmap_id,
            height,
            action: DiffAction::Remove,
            key_id: self.key_id,
            key_hash: self.key_hash,
            key: self.key.clone(),
            value: Vec::new(),
            source_id: 0,
        }
    }

    /// Synthesises the per-key `Copy` log row that materialised this entry.
    pub fn to_copy_update(&self, height: Height) -> BigmapUpdate {
        BigmapUpdate {
            row_id: 0,
            bigmap_id: self.bigmap_id,
            height,
            action: DiffAction::Copy,
            key_id: self.key_id,
            key_hash: self.key_hash,
            key: self.key.clone(),
            value: self.value.clone(),
            source_id: 0,
        }
    }
}

impl TableRow for BigmapValue {
    const TABLE: &'static str = "values";

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
            Field::KeyId => Some(FieldValue::U64(self.key_id)),
            Field::Height => None,
        }
    }
}
