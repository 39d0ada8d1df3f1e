use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

pub use crate::model::typedesc::{ContractScript, TypeDesc};

/// Block height. Signed to match the chain's own encoding.
pub type Height = i64;

/// Big-map identifier.
///
/// Non-negative ids denote durable big-maps persisted in the tables;
/// negative ids denote temporary big-maps that only exist inside the
/// internal sub-operations of one outer operation.
pub type BigmapId = i64;

/// Row identifier assigned by the table store on insert, strictly
/// monotone per table.
pub type RowId = u64;

/// Packed 64-bit key index, see [`crate::model::value::key_id`].
pub type KeyId = u64;

pub const KEY_HASH_LEN: usize = 32;

/// Fixed-width script-expression hash of a big-map key.
///
/// The all-zero hash is reserved: big-map level log rows (alloc, copy
/// header, full remove) carry it in place of a key hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyHash(pub [u8; KEY_HASH_LEN]);

impl KeyHash {
    pub const ZERO: KeyHash = KeyHash([0u8; KEY_HASH_LEN]);

    /// Canonical hash of a key's serialized bytes.
    pub fn of(key: &[u8]) -> Self {
        KeyHash(*blake3::hash(key).as_bytes())
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; KEY_HASH_LEN]
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8; KEY_HASH_LEN] {
        &self.0
    }

    /// First four bytes as a big-endian word, the low half of a key id.
    #[inline]
    pub fn short(&self) -> u32 {
        u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }
}

impl fmt::Display for KeyHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0[..8] {
            write!(f, "{b:02x}")?;
        }
        write!(f, "..")
    }
}

/// One big-map diff action.
///
/// The numeric encoding is part of the event payload and stable across
/// versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum DiffAction {
    Alloc = 0,
    Copy = 1,
    Update = 2,
    Remove = 3,
}

impl DiffAction {
    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for DiffAction {
    type Error = StoreError;

    fn try_from(code: u8) -> Result<Self, StoreError> {
        match code {
            0 => Ok(DiffAction::Alloc),
            1 => Ok(DiffAction::Copy),
            2 => Ok(DiffAction::Update),
            3 => Ok(DiffAction::Remove),
            code => Err(StoreError::UnknownAction { code }),
        }
    }
}

impl fmt::Display for DiffAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiffAction::Alloc => "alloc",
            DiffAction::Copy => "copy",
            DiffAction::Update => "update",
            DiffAction::Remove => "remove",
        };
        f.write_str(name)
    }
}

/// One big-map event as delivered by the block builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BigmapEvent {
    pub action: DiffAction,
    /// Target big-map id; negative ids are temporary.
    pub id: BigmapId,
    /// Source big-map for `Copy`, 0 otherwise.
    pub source_id: BigmapId,
    /// Zero for big-map level removes.
    pub key_hash: KeyHash,
    /// Declared key type, `Alloc` only.
    pub key_type: Option<TypeDesc>,
    /// Declared value type, `Alloc` only.
    pub value_type: Option<TypeDesc>,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl BigmapEvent {
    pub fn alloc(id: BigmapId, key_type: TypeDesc, value_type: TypeDesc) -> Self {
        BigmapEvent {
            action: DiffAction::Alloc,
            id,
            source_id: 0,
            key_hash: KeyHash::ZERO,
            key_type: Some(key_type),
            value_type: Some(value_type),
            key: Vec::new(),
            value: Vec::new(),
        }
    }

    pub fn copy(source_id: BigmapId, dest_id: BigmapId) -> Self {
        BigmapEvent {
            action: DiffAction::Copy,
            id: dest_id,
            source_id,
            key_hash: KeyHash::ZERO,
            key_type: None,
            value_type: None,
            key: Vec::new(),
            value: Vec::new(),
        }
    }

    pub fn update(id: BigmapId, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        let key = key.into();
        let key_hash = KeyHash::of(&key);
        BigmapEvent {
            action: DiffAction::Update,
            id,
            source_id: 0,
            key_hash,
            key_type: None,
            value_type: None,
            key,
            value: value.into(),
        }
    }

    pub fn remove_key(id: BigmapId, key: impl Into<Vec<u8>>) -> Self {
        let key = key.into();
        let key_hash = KeyHash::of(&key);
        BigmapEvent {
            action: DiffAction::Remove,
            id,
            source_id: 0,
            key_hash,
            key_type: None,
            value_type: None,
            key,
            value: Vec::new(),
        }
    }

    pub fn remove_all(id: BigmapId) -> Self {
        BigmapEvent {
            action: DiffAction::Remove,
            id,
            source_id: 0,
            key_hash: KeyHash::ZERO,
            key_type: None,
            value_type: None,
            key: Vec::new(),
            value: Vec::new(),
        }
    }

    /// Overrides the event's key hash, for callers that carry wire hashes.
    pub fn with_key_hash(mut self, key_hash: KeyHash) -> Self {
        self.key_hash = key_hash;
        self
    }
}

/// One operation of a block, in delivered order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Op {
    /// Part of the same outer batch as the preceding operation.
    pub is_internal: bool,
    pub is_success: bool,
    /// Script of the target contract, used to reconcile alloc types.
    pub script: Option<ContractScript>,
    pub events: Vec<BigmapEvent>,
}

impl Op {
    pub fn new(events: Vec<BigmapEvent>) -> Self {
        Op {
            is_internal: false,
            is_success: true,
            script: None,
            events,
        }
    }

    pub fn internal(events: Vec<BigmapEvent>) -> Self {
        Op {
            is_internal: true,
            is_success: true,
            script: None,
            events,
        }
    }

    pub fn with_script(mut self, script: ContractScript) -> Self {
        self.script = Some(script);
        self
    }
}

/// A block as delivered by the builder: ordered operations plus the
/// protocol version that governs alloc type reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub height: Height,
    pub version: u32,
    pub ops: Vec<Op>,
}

impl Block {
    pub fn new(height: Height, ops: Vec<Op>) -> Self {
        Block {
            height,
            version: 0,
            ops,
        }
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_codes_are_stable() {
        assert_eq!(DiffAction::Alloc.code(), 0);
        assert_eq!(DiffAction::Copy.code(), 1);
        assert_eq!(DiffAction::Update.code(), 2);
        assert_eq!(DiffAction::Remove.code(), 3);

        for code in 0u8..4 {
            assert_eq!(DiffAction::try_from(code).unwrap().code(), code);
        }
        assert!(DiffAction::try_from(4).is_err());
    }

    #[test]
    fn zero_hash_marks_bigmap_level_rows() {
        assert!(KeyHash::ZERO.is_zero());
        assert!(!KeyHash::of(b"key").is_zero());
        assert_eq!(BigmapEvent::remove_all(4).key_hash, KeyHash::ZERO);
        assert!(!BigmapEvent::remove_key(4, b"key".as_slice())
            .key_hash
            .is_zero());
    }

    #[test]
    fn short_takes_leading_bytes_big_endian() {
        let mut raw = [0u8; KEY_HASH_LEN];
        raw[0] = 0x12;
        raw[1] = 0x34;
        raw[2] = 0x56;
        raw[3] = 0x78;
        assert_eq!(KeyHash(raw).short(), 0x1234_5678);
    }
}
