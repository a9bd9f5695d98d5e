//! A [ComputationCache] memoizes an expensive computation, keyed by a hash of
//! its arguments, with the results held in an [ObjectPool].
//!
//! The cache itself only keeps a thin `computation hash -> content hash`
//! index, so two different computations producing identical results share one
//! pooled object.  The index entry is a hint, not a guarantee: if the pool
//! has since evicted the object, [ComputationCache::get] transparently
//! recomputes.
//!
//! Misses are gated behind a per-key mutex so that concurrent callers of the
//! same computation wait for one compute instead of piling on.  This is best
//! effort; a duplicate computation on a true race is tolerated because
//! results are idempotent and deduplicated on write.
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use ahash::RandomState;
use tracing::trace;

use crate::content_hash::ContentHash;
use crate::cost_based_lru::CostBasedLru;
use crate::error::Result;
use crate::object::ObjectRef;
use crate::object_pool::{ObjectPool, StoreMode};

pub type ComputeFn<A> = Box<dyn Fn(&A) -> Result<ObjectRef> + Send + Sync>;
pub type HashFn<A> = Box<dyn Fn(&A, &mut ContentHash) + Send + Sync>;

pub struct ComputationCache<A> {
    hash_fn: HashFn<A>,
    compute_fn: ComputeFn<A>,
    pool: Arc<ObjectPool>,
    /// computation hash -> content hash of the pooled result; every entry
    /// costs 1 against `max_computations`.
    index: Mutex<CostBasedLru<ContentHash, ContentHash>>,
    /// Mutexes that stop multiple threads computing the same key at once.
    compute_guards: Mutex<HashMap<ContentHash, Arc<Mutex<()>>, RandomState>>,
}

impl<A> ComputationCache<A> {
    pub fn new(
        hash_fn: HashFn<A>,
        compute_fn: ComputeFn<A>,
        pool: Arc<ObjectPool>,
        max_computations: usize,
    ) -> ComputationCache<A> {
        ComputationCache {
            hash_fn,
            compute_fn,
            pool,
            index: Mutex::new(CostBasedLru::new(max_computations as u64)),
            compute_guards: Default::default(),
        }
    }

    fn computation_hash(&self, args: &A) -> ContentHash {
        let mut hash = ContentHash::new();
        (self.hash_fn)(args, &mut hash);
        hash
    }

    /// Non-blocking lookup against index and pool; touches recency on a hit.
    fn lookup(&self, computation_hash: &ContentHash) -> Option<ObjectRef> {
        let content_hash = self.index.lock().unwrap().get(computation_hash)?;
        self.pool.retrieve(&content_hash)
    }

    /// Compute, publish through the pool and record the index entry.
    fn compute_and_record(&self, args: &A, computation_hash: ContentHash) -> Result<ObjectRef> {
        let object = (self.compute_fn)(args)?;
        let stored = self.pool.store(object, StoreMode::Reference);
        self.index
            .lock()
            .unwrap()
            .insert(computation_hash, stored.hash(), 1);
        Ok(stored)
    }

    /// Return the cached result for `args`, computing it on a miss or when
    /// the pool has evicted the previous result.
    pub fn get(&self, args: &A) -> Result<ObjectRef> {
        let computation_hash = self.computation_hash(args);
        if let Some(object) = self.lookup(&computation_hash) {
            trace!(hash = %computation_hash, "computation cache hit");
            return Ok(object);
        }

        // Make racing callers of the same computation wait on this thread.
        let guard = {
            let mut guards = self.compute_guards.lock().unwrap();
            guards
                .entry(computation_hash)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _held = guard.lock().unwrap();

        // Whoever held the guard before us may have filled the entry.
        if let Some(object) = self.lookup(&computation_hash) {
            self.compute_guards
                .lock()
                .unwrap()
                .remove(&computation_hash);
            return Ok(object);
        }

        trace!(hash = %computation_hash, "computation cache miss");
        let result = self.compute_and_record(args, computation_hash);
        self.compute_guards
            .lock()
            .unwrap()
            .remove(&computation_hash);
        result
    }

    /// Like [ComputationCache::get] but never computes.
    pub fn retrieve(&self, args: &A) -> Option<ObjectRef> {
        self.lookup(&self.computation_hash(args))
    }

    /// True if a result for `args` is currently retrievable.  Touches no
    /// recency state.
    pub fn contains(&self, args: &A) -> bool {
        let computation_hash = self.computation_hash(args);
        match self.index.lock().unwrap().peek(&computation_hash) {
            Some(content_hash) => self.pool.contains(&content_hash),
            None => false,
        }
    }

    /// Force-publish a precomputed result for `args`.  Content already in
    /// the pool is deduplicated exactly as in [ObjectPool::store].
    pub fn set(&self, args: &A, object: ObjectRef) -> ObjectRef {
        let computation_hash = self.computation_hash(args);
        let stored = self.pool.store(object, StoreMode::Reference);
        self.index
            .lock()
            .unwrap()
            .insert(computation_hash, stored.hash(), 1);
        stored
    }

    /// Forget the index entry for `args`.  The pooled object survives if
    /// anything else references the same content hash.
    pub fn erase(&self, args: &A) -> bool {
        let computation_hash = self.computation_hash(args);
        self.compute_guards
            .lock()
            .unwrap()
            .remove(&computation_hash);
        self.index.lock().unwrap().remove(&computation_hash).is_some()
    }

    pub fn clear(&self) {
        self.index.lock().unwrap().clear();
        self.compute_guards.lock().unwrap().clear();
    }

    /// Number of computations currently tracked by the index.
    pub fn cached_computations(&self) -> usize {
        self.index.lock().unwrap().len()
    }

    pub fn max_computations(&self) -> usize {
        self.index.lock().unwrap().max_cost() as usize
    }

    /// Bound the index size, evicting the least recently used entries
    /// immediately if needed.
    pub fn set_max_computations(&self, max_computations: usize) {
        self.index
            .lock()
            .unwrap()
            .set_max_cost(max_computations as u64);
    }

    /// The pool results are published through.
    pub fn object_pool(&self) -> Arc<ObjectPool> {
        self.pool.clone()
    }

    #[cfg(test)]
    fn guard_count(&self) -> usize {
        self.compute_guards.lock().unwrap().len()
    }
}
