//! Content-addressed caching for typed, hashable, serializable objects.
//!
//! The central idea is that an object's identity is the [ContentHash] of its
//! value, not where it came from.  Decoding a file twice, or computing the
//! same expensive result on two threads, should cost one object's worth of
//! memory, and evicting it should be a question of byte budgets rather than
//! entry counts.  This crate provides the pieces of that scheme, from low
//! level to high:
//!
//! [CostBasedLru] is an LRU map which evicts by accumulated item cost rather
//! than entry count.  It is the building block under everything else and is
//! exposed because it is useful on its own.
//!
//! [Object] is the polymorphic value type: hashable, deep-copyable with
//! aliasing preserved, and serializable through per-type versioned
//! containers.  A handful of built-in implementations live in [types], and
//! external types join through [register_type].
//!
//! [ObjectPool] is a process-wide byte-budgeted cache keyed by content hash,
//! deduplicating on write.  [ComputationCache] memoizes an arbitrary
//! computation through the pool, and [CachedReader] layers path resolution,
//! pluggable decoders, optional post-processing and negative caching on top
//! to give cheap repeated reads of files.
//!
//! To use the high-level piece, implement [ReaderFactory] and [ObjectReader]
//! for your file formats, then construct a [CachedReader] (or use
//! [default_cached_reader], which is shared process-wide and configured from
//! the environment).

mod cached_reader;
mod computation_cache;
mod container;
mod content_hash;
mod cost_based_lru;
mod error;
mod object;
mod object_pool;
mod post_process;
mod serialize;
pub mod types;

pub use cached_reader::*;
pub use computation_cache::*;
pub use container::*;
pub use content_hash::*;
pub use cost_based_lru::*;
pub use error::*;
pub use object::*;
pub use object_pool::*;
pub use post_process::*;
pub use serialize::*;
