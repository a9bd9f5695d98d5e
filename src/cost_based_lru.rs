//! A [CostBasedLru] is an LRU map which evicts by accumulated item cost
//! rather than by entry count.
//!
//! Entries live in a vec-backed doubly linked list ordered most-recent first,
//! with a hash index from key to slot and a freelist of vacated slots.  Ties
//! in recency cannot arise: the list order is exactly touch order, and
//! entries that have never been touched since insertion stay in insertion
//! order, oldest nearest the tail.
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use ahash::RandomState;

struct OccupiedSlot<K, V> {
    key: Arc<K>,
    value: V,
    cost: u64,
    prev: Option<usize>,
    next: Option<usize>,
}

struct EmptySlot {
    next_empty: Option<usize>,
}

enum Slot<K, V> {
    Empty(EmptySlot),
    Occupied(OccupiedSlot<K, V>),
}

impl<K, V> Slot<K, V> {
    fn as_occupied(&self) -> &OccupiedSlot<K, V> {
        match self {
            Slot::Occupied(x) => x,
            Slot::Empty(_) => panic!("slot should be occupied"),
        }
    }

    fn as_occupied_mut(&mut self) -> &mut OccupiedSlot<K, V> {
        match self {
            Slot::Occupied(x) => x,
            Slot::Empty(_) => panic!("slot should be occupied"),
        }
    }

    fn as_empty_mut(&mut self) -> &mut EmptySlot {
        match self {
            Slot::Empty(x) => x,
            Slot::Occupied(_) => panic!("slot should be empty"),
        }
    }
}

pub struct CostBasedLru<K: Hash + Eq, V> {
    slots: Vec<Slot<K, V>>,
    index: HashMap<Arc<K>, usize, RandomState>,
    max_cost: u64,
    current_cost: u64,
    head: Option<usize>,
    tail: Option<usize>,
    empty_head: Option<usize>,
}

impl<K: Hash + Eq, V: Clone> CostBasedLru<K, V> {
    pub fn new(max_cost: u64) -> CostBasedLru<K, V> {
        CostBasedLru {
            slots: Default::default(),
            index: Default::default(),
            max_cost,
            current_cost: 0,
            head: None,
            tail: None,
            empty_head: None,
        }
    }

    pub fn max_cost(&self) -> u64 {
        self.max_cost
    }

    pub fn current_cost(&self) -> u64 {
        self.current_cost
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Detach an occupied slot from the recency list.
    fn unlink(&mut self, slot: usize) {
        let (prev, next) = {
            let occ = self.slots[slot].as_occupied();
            (occ.prev, occ.next)
        };
        match prev {
            Some(p) => self.slots[p].as_occupied_mut().next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slots[n].as_occupied_mut().prev = prev,
            None => self.tail = prev,
        }
    }

    /// Put an occupied slot at the head of the recency list.
    fn link_front(&mut self, slot: usize) {
        {
            let occ = self.slots[slot].as_occupied_mut();
            occ.prev = None;
            occ.next = self.head;
        }
        if let Some(h) = self.head {
            self.slots[h].as_occupied_mut().prev = Some(slot);
        }
        self.head = Some(slot);
        if self.tail.is_none() {
            self.tail = Some(slot);
        }
    }

    /// Empty out a slot, unlinking it and pushing it on the freelist.
    fn vacate(&mut self, slot: usize) -> V {
        self.unlink(slot);
        let mut taken = Slot::Empty(EmptySlot {
            next_empty: self.empty_head,
        });
        std::mem::swap(&mut taken, &mut self.slots[slot]);
        self.empty_head = Some(slot);
        match taken {
            Slot::Occupied(OccupiedSlot {
                key, value, cost, ..
            }) => {
                self.index.remove(&key);
                self.current_cost -= cost;
                value
            }
            Slot::Empty(_) => panic!("slot should be occupied"),
        }
    }

    fn acquire_slot(&mut self) -> usize {
        if let Some(e) = self.empty_head {
            self.empty_head = self.slots[e].as_empty_mut().next_empty;
            return e;
        }
        self.slots.push(Slot::Empty(EmptySlot { next_empty: None }));
        self.slots.len() - 1
    }

    /// Look a key up and make it the most recently used entry.
    pub fn get(&mut self, key: &K) -> Option<V> {
        let slot = *self.index.get(key)?;
        self.unlink(slot);
        self.link_front(slot);
        Some(self.slots[slot].as_occupied().value.clone())
    }

    /// Look a key up without updating recency.
    pub fn peek(&self, key: &K) -> Option<V> {
        let slot = *self.index.get(key)?;
        Some(self.slots[slot].as_occupied().value.clone())
    }

    /// Existence check without a recency update.
    pub fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    /// Insert an entry as most recently used, evicting from the cold end as
    /// needed.  Returns the previous value stored under this key, if any.
    /// An entry costing more than the whole budget is evicted again before
    /// this returns; callers who want to keep such items must hold their own
    /// reference.
    pub fn insert(&mut self, key: K, value: V, cost: u64) -> Option<V> {
        let key = Arc::new(key);
        let previous = self.remove(&key);

        let slot = self.acquire_slot();
        self.slots[slot] = Slot::Occupied(OccupiedSlot {
            key: key.clone(),
            value,
            cost,
            prev: None,
            next: None,
        });
        self.link_front(slot);
        self.index.insert(key, slot);
        self.current_cost += cost;

        self.evict_to_fit();
        previous
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let slot = *self.index.get(key)?;
        Some(self.vacate(slot))
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.index.clear();
        self.current_cost = 0;
        self.head = None;
        self.tail = None;
        self.empty_head = None;
    }

    /// Change the cost bound, evicting immediately if the cache no longer
    /// fits.
    pub fn set_max_cost(&mut self, max_cost: u64) {
        self.max_cost = max_cost;
        self.evict_to_fit();
    }

    fn evict_to_fit(&mut self) {
        while self.current_cost > self.max_cost {
            let tail = self.tail.expect("cost accounted with no entries");
            self.vacate(tail);
        }
    }

    /// Iterator visiting entries in most-recently-used order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        let mut slot = self.head;
        std::iter::from_fn(move || {
            let current = slot?;
            let occ = self.slots[current].as_occupied();
            slot = occ.next;
            Some((&*occ.key, &occ.value))
        })
    }
}
