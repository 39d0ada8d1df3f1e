use serde::{Deserialize, Serialize};

use crate::store::{Field, FieldValue, TableRow};
use crate::types::{BigmapEvent, BigmapId, DiffAction, Height, KeyHash, KeyId, RowId};

use super::value::{key_id, BigmapValue};

/// One record of the append-only big-map update log.
///
/// The log is the authoritative history: live values and allocation
/// counters are derived views that rollback and the history cache
/// reconstruct from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BigmapUpdate {
    pub row_id: RowId,
    pub bigmap_id: BigmapId,
    pub height: Height,
    pub action: DiffAction,
    pub key_id: KeyId,
    pub key_hash: KeyHash,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    /// Copied-from big-map, `Copy` header rows only.
    pub source_id: BigmapId,
}

impl BigmapUpdate {
    /// Log row for a keyed `Update` or `Remove` event.
    pub fn from_event(height: Height, event: &BigmapEvent) -> Self {
        BigmapUpdate {
            row_id: 0,
            bigmap_id: event.id,
            height,
            action: event.action,
            key_id: key_id(event.id, &event.key_hash),
            key_hash: event.key_hash,
            key: event.key.clone(),
            value: event.value.clone(),
            source_id: 0,
        }
    }

    /// Materialises the live value this row describes. Only meaningful
    /// for `Update` and per-key `Copy` rows.
    pub fn to_live_value(&self) -> BigmapValue {
        BigmapValue {
            row_id: 0,
            bigmap_id: self.bigmap_id,
            key_id: self.key_id,
            key_hash: self.key_hash,
            key: self.key.clone(),
            value: self.value.clone(),
        }
    }

    /// Big-map level rows (alloc, copy header, full remove) carry the
    /// zero key hash.
    #[inline]
    pub fn is_bigmap_level(&self) -> bool {
        self.key_hash.is_zero()
    }
}

impl TableRow for BigmapUpdate {
    const TABLE: &'static str = "updates";

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
            Field::Height => Some(FieldValue::I64(self.height)),
        }
    }
}
