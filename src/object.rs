//! The [Object] trait: a polymorphic, deep-copyable, content-hashable,
//! versioned-serializable value.
//!
//! Object graphs are trees with possible aliasing of shared sub-objects, and
//! never cycles.  An [ObjectRef] is shared-immutable: concrete values are
//! built mutably, then moved behind `Arc` to enter a graph, a pool or a
//! cache, which makes the "don't mutate after storing" contract a property of
//! the type system rather than documentation.
//!
//! Every concrete type registers a creator under its [TypeId] and type name,
//! so [create] and [create_by_name] can rebuild instances from serialized
//! data.  The built-in types in [crate::types] register themselves the first
//! time the registry is touched.
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, OnceLock, RwLock};

use ahash::RandomState;

use crate::container::Container;
use crate::content_hash::ContentHash;
use crate::error::{Error, Result};
use crate::serialize::{LoadContext, SaveContext};

/// Registered identity of a concrete object type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeId(pub u32);

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A shared, immutable handle to an object.
pub type ObjectRef = Arc<dyn Object>;

/// Creates a blank instance of a concrete type, ready to be loaded into.
pub type CreatorFn = fn() -> Box<dyn Object>;

pub trait Object: Send + Sync + 'static {
    fn type_id(&self) -> TypeId;

    fn type_name(&self) -> &'static str;

    /// Structural equality.  Implementations downcast through [Object::as_any],
    /// so a type mismatch is always unequal.
    fn is_equal_to(&self, other: &dyn Object) -> bool;

    /// Append this object's content to `hash`.  Child objects contribute
    /// their own full hash via [ContentHash::append_hash]; nothing
    /// position-dependent such as an address may be appended.
    fn hash_into(&self, hash: &mut ContentHash);

    /// Deep-copy through `ctx`, which preserves aliasing of shared children.
    fn copy_within(&self, ctx: &mut CopyContext) -> ObjectRef;

    /// Write this object's fields through a per-type versioned container
    /// obtained from [SaveContext::type_container].
    fn save(&self, ctx: &mut SaveContext, container: &mut dyn Container) -> Result<()>;

    /// The inverse of [Object::save]; `self` starts as a blank instance from
    /// the registered creator.
    fn load(&mut self, ctx: &mut LoadContext, container: &dyn Container) -> Result<()>;

    /// Account this object's memory, children included, into `acc`.
    fn accumulate_memory(&self, acc: &mut MemoryAccumulator);

    fn as_any(&self) -> &dyn Any;
}

impl fmt::Debug for dyn Object {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

impl dyn Object {
    /// The content hash: type id first, then the per-type contribution.
    pub fn hash(&self) -> ContentHash {
        let mut h = ContentHash::new();
        h.append_u32(self.type_id().0);
        self.hash_into(&mut h);
        h
    }
}

/// Deep-copy an object graph.  Shared children stay shared in the copy: one
/// physical copy, as many references as the source had.
pub fn deep_copy(object: &ObjectRef) -> ObjectRef {
    CopyContext::new().copy(object)
}

/// Total memory of an object graph in bytes, counting shared children once.
pub fn memory_usage(object: &ObjectRef) -> usize {
    let mut acc = MemoryAccumulator::new();
    acc.accumulate_object(object);
    acc.total()
}

/// Maps already-copied source objects, by identity, to their single copy.
pub struct CopyContext {
    copies: HashMap<usize, ObjectRef, RandomState>,
}

impl CopyContext {
    pub fn new() -> CopyContext {
        CopyContext {
            copies: Default::default(),
        }
    }

    /// Copy `object`, or return the copy already made for this identity.
    pub fn copy(&mut self, object: &ObjectRef) -> ObjectRef {
        let identity = Arc::as_ptr(object) as *const () as usize;
        if let Some(existing) = self.copies.get(&identity) {
            return existing.clone();
        }
        let copied = object.copy_within(self);
        self.copies.insert(identity, copied.clone());
        copied
    }
}

impl Default for CopyContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Sums memory contributions, visiting each shared object once.
pub struct MemoryAccumulator {
    total: usize,
    visited: HashSet<usize, RandomState>,
}

impl MemoryAccumulator {
    pub fn new() -> MemoryAccumulator {
        MemoryAccumulator {
            total: 0,
            visited: Default::default(),
        }
    }

    pub fn accumulate(&mut self, bytes: usize) {
        self.total += bytes;
    }

    pub fn accumulate_object(&mut self, object: &ObjectRef) {
        let identity = Arc::as_ptr(object) as *const () as usize;
        if self.visited.insert(identity) {
            object.accumulate_memory(self);
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }
}

impl Default for MemoryAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

struct Registration {
    name: &'static str,
    creator: CreatorFn,
}

struct Registry {
    by_id: HashMap<TypeId, Registration, RandomState>,
    by_name: HashMap<&'static str, TypeId, RandomState>,
}

impl Registry {
    fn with_builtins() -> Registry {
        let mut r = Registry {
            by_id: Default::default(),
            by_name: Default::default(),
        };
        for (id, name, creator) in crate::types::BUILTIN_TYPES {
            r.insert(*id, name, *creator);
        }
        r
    }

    fn insert(&mut self, id: TypeId, name: &'static str, creator: CreatorFn) {
        self.by_id.insert(id, Registration { name, creator });
        self.by_name.insert(name, id);
    }
}

static REGISTRY: OnceLock<RwLock<Registry>> = OnceLock::new();

fn registry() -> &'static RwLock<Registry> {
    REGISTRY.get_or_init(|| RwLock::new(Registry::with_builtins()))
}

/// Register a concrete type's creator.  Idempotent; re-registering an id or
/// name replaces the previous entry, which is only useful diagnostically.
pub fn register_type(id: TypeId, name: &'static str, creator: CreatorFn) {
    registry().write().unwrap().insert(id, name, creator);
}

/// True if `id` names a registered type.
pub fn is_registered(id: TypeId) -> bool {
    registry().read().unwrap().by_id.contains_key(&id)
}

/// Create a blank instance of the type registered under `id`.
pub fn create(id: TypeId) -> Result<Box<dyn Object>> {
    let registry = registry().read().unwrap();
    match registry.by_id.get(&id) {
        Some(registration) => Ok((registration.creator)()),
        None => Err(Error::type_id_not_registered(id)),
    }
}

/// Create a blank instance of the type registered under `name`.
pub fn create_by_name(name: &str) -> Result<Box<dyn Object>> {
    let registry = registry().read().unwrap();
    let id = registry
        .by_name
        .get(name)
        .ok_or_else(|| Error::TypeNotRegistered(name.to_string()))?;
    let registration = registry
        .by_id
        .get(id)
        .ok_or_else(|| Error::TypeNotRegistered(name.to_string()))?;
    Ok((registration.creator)())
}

/// The registered name for `id`, if any.
pub fn type_name(id: TypeId) -> Option<&'static str> {
    registry().read().unwrap().by_id.get(&id).map(|r| r.name)
}
