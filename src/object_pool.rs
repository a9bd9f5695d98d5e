//! The [ObjectPool] is a process-wide, memory-bounded, content-addressed
//! cache of objects.
//!
//! Storing an object whose hash is already present returns the existing
//! instance, so identical content is held once no matter how many producers
//! computed it.  Entries are evicted least-recently-used when the byte budget
//! is exceeded; under concurrent access the recency order is approximate,
//! which is an accepted trade-off for a short critical section.
use std::sync::{Arc, Mutex, OnceLock};

use tracing::{debug, trace, warn};

use crate::content_hash::ContentHash;
use crate::cost_based_lru::CostBasedLru;
use crate::object::{deep_copy, memory_usage, ObjectRef};

/// How [ObjectPool::store] takes ownership of the object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    /// Deep-copy before retaining, leaving the caller's instance entirely
    /// disconnected from the pool.
    Copy,
    /// Retain the passed reference.  Safe because an [ObjectRef] is
    /// shared-immutable; prefer this unless the copy is wanted for some
    /// other reason.
    Reference,
}

pub struct ObjectPool {
    cache: Mutex<CostBasedLru<ContentHash, ObjectRef>>,
}

impl ObjectPool {
    pub fn new(max_memory_usage: u64) -> ObjectPool {
        ObjectPool {
            cache: Mutex::new(CostBasedLru::new(max_memory_usage)),
        }
    }

    /// Store an object, deduplicating on content: if an equal-content object
    /// is already pooled, that instance is returned and the argument is
    /// dropped.  An object bigger than the whole byte budget is returned
    /// usable but not retained.
    pub fn store(&self, object: ObjectRef, mode: StoreMode) -> ObjectRef {
        let hash = object.hash();
        let cost = memory_usage(&object) as u64;

        let mut cache = self.cache.lock().unwrap();
        if let Some(existing) = cache.get(&hash) {
            trace!(hash = %hash, "store hit, returning pooled instance");
            return existing;
        }
        if cost > cache.max_cost() {
            warn!(
                hash = %hash,
                cost,
                max = cache.max_cost(),
                "object exceeds the pool budget and will not be cached"
            );
            return object;
        }

        let stored = match mode {
            StoreMode::Copy => deep_copy(&object),
            StoreMode::Reference => object,
        };
        cache.insert(hash, stored.clone(), cost);
        debug!(hash = %hash, cost, "stored object");
        stored
    }

    /// Fetch by content hash, marking the entry recently used.
    pub fn retrieve(&self, hash: &ContentHash) -> Option<ObjectRef> {
        self.cache.lock().unwrap().get(hash)
    }

    /// Existence check; does not affect recency.
    pub fn contains(&self, hash: &ContentHash) -> bool {
        self.cache.lock().unwrap().contains(hash)
    }

    /// Drop one entry.  Returns whether anything was removed.
    pub fn erase(&self, hash: &ContentHash) -> bool {
        self.cache.lock().unwrap().remove(hash).is_some()
    }

    pub fn clear(&self) {
        self.cache.lock().unwrap().clear();
    }

    /// Bytes currently accounted against the budget.
    pub fn memory_usage(&self) -> u64 {
        self.cache.lock().unwrap().current_cost()
    }

    pub fn max_memory_usage(&self) -> u64 {
        self.cache.lock().unwrap().max_cost()
    }

    /// Change the byte budget, evicting immediately if the pool no longer
    /// fits.
    pub fn set_max_memory_usage(&self, max_memory_usage: u64) {
        debug!(max_memory_usage, "resizing object pool");
        self.cache.lock().unwrap().set_max_cost(max_memory_usage);
    }

    /// Number of pooled objects.
    pub fn len(&self) -> usize {
        self.cache.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.lock().unwrap().is_empty()
    }
}

const DEFAULT_MAX_BYTES: u64 = 500 * 1024 * 1024;

/// The process-wide default pool, shared by every component that is not
/// handed an explicit pool.  Sized in megabytes from `OBJECTPOOL_MEMORY`,
/// read once on first use; 500MB when unset or unparsable.
pub fn default_object_pool() -> Arc<ObjectPool> {
    static DEFAULT: OnceLock<Arc<ObjectPool>> = OnceLock::new();
    DEFAULT
        .get_or_init(|| {
            let max_bytes = std::env::var("OBJECTPOOL_MEMORY")
                .ok()
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(|megabytes| megabytes * 1024 * 1024)
                .unwrap_or(DEFAULT_MAX_BYTES);
            debug!(max_bytes, "initializing default object pool");
            Arc::new(ObjectPool::new(max_bytes))
        })
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use crate::types::{IntVectorData, StringData};

    fn vector_object(values: Vec<i64>) -> ObjectRef {
        Arc::new(IntVectorData::new(values))
    }

    #[test]
    fn store_then_retrieve() {
        let pool = ObjectPool::new(1 << 20);
        let object = vector_object(vec![1, 2, 3]);
        let hash = object.hash();
        let stored = pool.store(object, StoreMode::Reference);
        let retrieved = pool.retrieve(&hash).expect("stored object is present");
        assert!(Arc::ptr_eq(&stored, &retrieved));
        assert!(pool.contains(&hash));
        assert!(pool.retrieve(&ContentHash::new()).is_none());
    }

    #[test]
    fn dedup_on_write_accounts_memory_once() {
        let pool = ObjectPool::new(1 << 20);
        let a = vector_object(vec![7; 100]);
        let b = vector_object(vec![7; 100]);
        assert!(!Arc::ptr_eq(&a, &b));

        let stored_a = pool.store(a, StoreMode::Reference);
        let usage_after_first = pool.memory_usage();
        let stored_b = pool.store(b, StoreMode::Reference);

        assert!(Arc::ptr_eq(&stored_a, &stored_b));
        assert_eq!(pool.memory_usage(), usage_after_first);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn copy_mode_stores_an_independent_instance() {
        let pool = ObjectPool::new(1 << 20);
        let object = vector_object(vec![1, 2]);
        let stored = pool.store(object.clone(), StoreMode::Copy);
        assert!(!Arc::ptr_eq(&object, &stored));
        assert!(object.is_equal_to(stored.as_ref()));
    }

    #[test]
    fn reference_mode_stores_the_same_instance() {
        let pool = ObjectPool::new(1 << 20);
        let object = vector_object(vec![1, 2]);
        let stored = pool.store(object.clone(), StoreMode::Reference);
        assert!(Arc::ptr_eq(&object, &stored));
    }

    #[test]
    fn pool_stays_within_bound() {
        let unit = memory_usage(&vector_object(vec![0; 64])) as u64;
        let pool = ObjectPool::new(unit * 3);
        for seed in 0..10 {
            pool.store(vector_object(vec![seed; 64]), StoreMode::Reference);
            assert!(pool.memory_usage() <= pool.max_memory_usage());
        }
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn retrieve_protects_from_eviction() {
        let a = vector_object(vec![1; 64]);
        let b = vector_object(vec![2; 64]);
        let c = vector_object(vec![3; 64]);
        let unit = memory_usage(&a) as u64;
        let (ha, hb) = (a.hash(), b.hash());

        // bound=2 units, insert a and b, touch a, insert c: b is evicted.
        let pool = ObjectPool::new(unit * 2);
        pool.store(a, StoreMode::Reference);
        pool.store(b, StoreMode::Reference);
        assert!(pool.retrieve(&ha).is_some());
        pool.store(c, StoreMode::Reference);

        assert!(pool.contains(&ha));
        assert!(!pool.contains(&hb));
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn oversized_object_is_returned_but_not_cached() {
        let pool = ObjectPool::new(16);
        let big = vector_object(vec![0; 1000]);
        let hash = big.hash();
        let returned = pool.store(big, StoreMode::Reference);
        assert!(returned.is_equal_to(vector_object(vec![0; 1000]).as_ref()));
        assert!(!pool.contains(&hash));
        assert_eq!(pool.memory_usage(), 0);
    }

    #[test]
    fn erase_and_clear() {
        let pool = ObjectPool::new(1 << 20);
        let object = Arc::new(StringData::new("gone soon")) as ObjectRef;
        let hash = object.hash();
        pool.store(object, StoreMode::Reference);

        assert!(pool.erase(&hash));
        assert!(!pool.erase(&hash));
        assert!(!pool.contains(&hash));

        pool.store(Arc::new(StringData::new("x")) as ObjectRef, StoreMode::Reference);
        pool.clear();
        assert!(pool.is_empty());
        assert_eq!(pool.memory_usage(), 0);
    }

    #[test]
    fn set_max_memory_usage_shrinks_immediately() {
        let unit = memory_usage(&vector_object(vec![0; 64])) as u64;
        let pool = ObjectPool::new(unit * 4);
        for seed in 0..4 {
            pool.store(vector_object(vec![seed; 64]), StoreMode::Reference);
        }
        assert_eq!(pool.len(), 4);
        pool.set_max_memory_usage(unit * 2);
        assert_eq!(pool.len(), 2);
        assert!(pool.memory_usage() <= pool.max_memory_usage());
    }

    #[test]
    fn default_pool_is_a_singleton() {
        let a = default_object_pool();
        let b = default_object_pool();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
