//! Scan-resistant two-queue replacement.
//!
//! New keys are admitted into a small FIFO; only a second touch
//! promotes them into the protected segment. Keys evicted from the
//! admission FIFO leave a ghost entry behind, and a hit on a ghost
//! re-admits straight into the protected segment. History rebuilds
//! touch many cold entries exactly once, which plain least-recently-used
//! replacement does not survive.

use std::collections::BTreeMap;
use std::hash::Hash;

use hashbrown::HashMap;
use parking_lot::Mutex;

/// Share of the capacity reserved for the admission FIFO.
const RECENT_RATIO_NUM: usize = 1;
const RECENT_RATIO_DEN: usize = 4;
/// Ghost entries tracked relative to the capacity.
const GHOST_RATIO_NUM: usize = 1;
const GHOST_RATIO_DEN: usize = 2;

/// Ordered key set with O(log n) touch/evict, ticket-ordered.
struct OrderList<K> {
    ticket: u64,
    by_key: HashMap<K, u64>,
    by_ticket: BTreeMap<u64, K>,
}

impl<K: Eq + Hash + Copy> OrderList<K> {
    fn new() -> Self {
        OrderList {
            ticket: 0,
            by_key: HashMap::new(),
            by_ticket: BTreeMap::new(),
        }
    }

    fn len(&self) -> usize {
        self.by_key.len()
    }

    fn contains(&self, key: &K) -> bool {
        self.by_key.contains_key(key)
    }

    /// Inserts or refreshes a key at the back of the list.
    fn touch(&mut self, key: K) {
        if let Some(old) = self.by_key.remove(&key) {
            self.by_ticket.remove(&old);
        }
        self.ticket += 1;
        self.by_key.insert(key, self.ticket);
        self.by_ticket.insert(self.ticket, key);
    }

    fn remove(&mut self, key: &K) -> bool {
        match self.by_key.remove(key) {
            Some(ticket) => {
                self.by_ticket.remove(&ticket);
                true
            }
            None => false,
        }
    }

    fn pop_front(&mut self) -> Option<K> {
        let (&ticket, &key) = self.by_ticket.iter().next()?;
        self.by_ticket.remove(&ticket);
        self.by_key.remove(&key);
        Some(key)
    }

    fn clear(&mut self) {
        self.by_key.clear();
        self.by_ticket.clear();
    }
}

struct Inner<K, V> {
    entries: HashMap<K, V>,
    recent: OrderList<K>,
    frequent: OrderList<K>,
    ghost: OrderList<K>,
}

/// Bounded associative cache with two-queue replacement. Internally
/// mutable: one mutex guards the queues so readers on other threads
/// observe consistent state.
pub struct TwoQueueCache<K, V> {
    capacity: usize,
    recent_cap: usize,
    ghost_cap: usize,
    inner: Mutex<Inner<K, V>>,
}

impl<K: Eq + Hash + Copy, V: Clone> TwoQueueCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        TwoQueueCache {
            capacity,
            recent_cap: (capacity * RECENT_RATIO_NUM / RECENT_RATIO_DEN).max(1),
            ghost_cap: (capacity * GHOST_RATIO_NUM / GHOST_RATIO_DEN).max(1),
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                recent: OrderList::new(),
                frequent: OrderList::new(),
                ghost: OrderList::new(),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        if inner.frequent.contains(key) {
            inner.frequent.touch(*key);
            return inner.entries.get(key).cloned();
        }
        if inner.recent.remove(key) {
            // Second touch: promote out of the admission FIFO.
            inner.frequent.touch(*key);
            return inner.entries.get(key).cloned();
        }
        None
    }

    /// Inserts or replaces a value; returns the entries evicted to make
    /// room so callers can keep exact byte accounting.
    pub fn put(&self, key: K, value: V) -> Vec<(K, V)> {
        let mut inner = self.inner.lock();

        if inner.frequent.contains(&key) {
            inner.frequent.touch(key);
            inner.entries.insert(key, value);
            return Vec::new();
        }
        if inner.recent.remove(&key) {
            inner.frequent.touch(key);
            inner.entries.insert(key, value);
            return Vec::new();
        }
        if inner.ghost.remove(&key) {
            // A ghost hit is a frequency signal.
            inner.frequent.touch(key);
        } else {
            inner.recent.touch(key);
        }
        inner.entries.insert(key, value);
        self.evict_over_capacity(&mut inner)
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        inner.recent.remove(key);
        inner.frequent.remove(key);
        inner.ghost.remove(key);
        inner.entries.remove(key)
    }

    pub fn purge(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.recent.clear();
        inner.frequent.clear();
        inner.ghost.clear();
    }

    /// Currently resident keys, in no particular order.
    pub fn keys(&self) -> Vec<K> {
        self.inner.lock().entries.keys().copied().collect()
    }

    fn evict_over_capacity(&self, inner: &mut Inner<K, V>) -> Vec<(K, V)> {
        let mut evicted = Vec::new();
        while inner.entries.len() > self.capacity {
            let victim = if inner.recent.len() > self.recent_cap || inner.frequent.len() == 0 {
                let key = inner.recent.pop_front();
                if let Some(key) = key {
                    inner.ghost.touch(key);
                    while inner.ghost.len() > self.ghost_cap {
                        inner.ghost.pop_front();
                    }
                }
                key
            } else {
                inner.frequent.pop_front()
            };
            let Some(key) = victim else { break };
            if let Some(value) = inner.entries.remove(&key) {
                evicted.push((key, value));
            }
        }
        evicted
    }
}
