use hashbrown::HashMap;

use crate::model::{BigmapAlloc, BigmapUpdate, BigmapValue};
use crate::types::BigmapId;

/// Scratch state of one temporary big-map: the allocation, the pending
/// update rows and the live key list, none of it persisted.
pub(crate) struct TempBigmap {
    pub alloc: BigmapAlloc,
    pub updates: Vec<BigmapUpdate>,
    pub live: Vec<BigmapValue>,
}

impl TempBigmap {
    pub fn new(alloc: BigmapAlloc) -> Self {
        TempBigmap {
            alloc,
            updates: Vec::new(),
            live: Vec::new(),
        }
    }

    pub fn with_contents(
        alloc: BigmapAlloc,
        updates: Vec<BigmapUpdate>,
        live: Vec<BigmapValue>,
    ) -> Self {
        TempBigmap {
            alloc,
            updates,
            live,
        }
    }
}

/// Temporary big-maps visible to the internal operations of one outer
/// batch, keyed by their negative id. Lifetime is data-flow driven: the
/// set is cleared whenever a non-internal operation is observed.
#[derive(Default)]
pub(crate) struct ScratchSet {
    maps: HashMap<BigmapId, TempBigmap>,
}

impl ScratchSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    pub fn clear(&mut self) {
        self.maps.clear();
    }

    pub fn insert(&mut self, temp: TempBigmap) {
        debug_assert!(temp.alloc.bigmap_id < 0, "scratch holds temporary ids only");
        self.maps.insert(temp.alloc.bigmap_id, temp);
    }

    pub fn get(&self, id: BigmapId) -> Option<&TempBigmap> {
        self.maps.get(&id)
    }

    pub fn get_mut(&mut self, id: BigmapId) -> Option<&mut TempBigmap> {
        self.maps.get_mut(&id)
    }

    pub fn remove(&mut self, id: BigmapId) -> Option<TempBigmap> {
        self.maps.remove(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BigmapEvent, TypeDesc};

    fn temp(id: BigmapId) -> TempBigmap {
        TempBigmap::new(BigmapAlloc::new(
            4,
            &BigmapEvent::alloc(id, TypeDesc::new("nat"), TypeDesc::new("nat")),
        ))
    }

    #[test]
    fn scratch_tracks_temporaries_by_id() {
        let mut scratch = ScratchSet::new();
        assert!(scratch.is_empty());

        scratch.insert(temp(-1));
        scratch.insert(temp(-2));
        assert!(scratch.get(-1).is_some());
        assert!(scratch.get_mut(-2).is_some());
        assert!(scratch.get(-3).is_none());

        assert!(scratch.remove(-1).is_some());
        assert!(scratch.get(-1).is_none());

        scratch.clear();
        assert!(scratch.is_empty());
    }
}
