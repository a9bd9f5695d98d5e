//! Built-in [Object] implementations.
//!
//! These are the leaf payload types plus [CompoundObject], the carrier of
//! nested and possibly aliased object graphs.  They register themselves the
//! first time the type registry is used; external crates add their own types
//! through [crate::register_type].
use std::collections::BTreeMap;
use std::mem;
use std::sync::Arc;

use crate::container::{Container, ContainerValue};
use crate::content_hash::ContentHash;
use crate::error::{Error, Result};
use crate::object::{CopyContext, CreatorFn, MemoryAccumulator, Object, ObjectRef, TypeId};
use crate::serialize::{LoadContext, SaveContext};

pub(crate) const BUILTIN_TYPES: &[(TypeId, &str, CreatorFn)] = &[
    (BoolData::TYPE_ID, BoolData::TYPE_NAME, || {
        Box::new(BoolData::default())
    }),
    (IntData::TYPE_ID, IntData::TYPE_NAME, || {
        Box::new(IntData::default())
    }),
    (FloatData::TYPE_ID, FloatData::TYPE_NAME, || {
        Box::new(FloatData::default())
    }),
    (StringData::TYPE_ID, StringData::TYPE_NAME, || {
        Box::new(StringData::default())
    }),
    (IntVectorData::TYPE_ID, IntVectorData::TYPE_NAME, || {
        Box::new(IntVectorData::default())
    }),
    (CompoundObject::TYPE_ID, CompoundObject::TYPE_NAME, || {
        Box::new(CompoundObject::default())
    }),
];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoolData {
    pub value: bool,
}

impl BoolData {
    pub const TYPE_ID: TypeId = TypeId(1);
    pub const TYPE_NAME: &'static str = "BoolData";
    pub const IO_VERSION: u32 = 1;

    pub fn new(value: bool) -> BoolData {
        BoolData { value }
    }
}

impl Object for BoolData {
    fn type_id(&self) -> TypeId {
        Self::TYPE_ID
    }

    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn is_equal_to(&self, other: &dyn Object) -> bool {
        other
            .as_any()
            .downcast_ref::<Self>()
            .map_or(false, |o| o.value == self.value)
    }

    fn hash_into(&self, hash: &mut ContentHash) {
        hash.append_bool(self.value);
    }

    fn copy_within(&self, _ctx: &mut CopyContext) -> ObjectRef {
        Arc::new(self.clone())
    }

    fn save(&self, ctx: &mut SaveContext, container: &mut dyn Container) -> Result<()> {
        let data = ctx.type_container(container, Self::TYPE_NAME, Self::IO_VERSION)?;
        data.write("value", ContainerValue::Bool(self.value))
    }

    fn load(&mut self, ctx: &mut LoadContext, container: &dyn Container) -> Result<()> {
        let (data, _) = ctx.type_container(container, Self::TYPE_NAME, Self::IO_VERSION)?;
        self.value = data.read_bool("value")?;
        Ok(())
    }

    fn accumulate_memory(&self, acc: &mut MemoryAccumulator) {
        acc.accumulate(mem::size_of::<Self>());
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntData {
    pub value: i64,
}

impl IntData {
    pub const TYPE_ID: TypeId = TypeId(2);
    pub const TYPE_NAME: &'static str = "IntData";
    pub const IO_VERSION: u32 = 1;

    pub fn new(value: i64) -> IntData {
        IntData { value }
    }
}

impl Object for IntData {
    fn type_id(&self) -> TypeId {
        Self::TYPE_ID
    }

    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn is_equal_to(&self, other: &dyn Object) -> bool {
        other
            .as_any()
            .downcast_ref::<Self>()
            .map_or(false, |o| o.value == self.value)
    }

    fn hash_into(&self, hash: &mut ContentHash) {
        hash.append_i64(self.value);
    }

    fn copy_within(&self, _ctx: &mut CopyContext) -> ObjectRef {
        Arc::new(self.clone())
    }

    fn save(&self, ctx: &mut SaveContext, container: &mut dyn Container) -> Result<()> {
        let data = ctx.type_container(container, Self::TYPE_NAME, Self::IO_VERSION)?;
        data.write("value", ContainerValue::I64(self.value))
    }

    fn load(&mut self, ctx: &mut LoadContext, container: &dyn Container) -> Result<()> {
        let (data, _) = ctx.type_container(container, Self::TYPE_NAME, Self::IO_VERSION)?;
        self.value = data.read_i64("value")?;
        Ok(())
    }

    fn accumulate_memory(&self, acc: &mut MemoryAccumulator) {
        acc.accumulate(mem::size_of::<Self>());
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// Floating point payload.  Equality and hashing go by bit pattern, so NaNs
/// compare equal to themselves and `0.0`/`-0.0` are distinct.
#[derive(Debug, Clone, Default)]
pub struct FloatData {
    pub value: f64,
}

impl FloatData {
    pub const TYPE_ID: TypeId = TypeId(3);
    pub const TYPE_NAME: &'static str = "FloatData";
    pub const IO_VERSION: u32 = 1;

    pub fn new(value: f64) -> FloatData {
        FloatData { value }
    }
}

impl Object for FloatData {
    fn type_id(&self) -> TypeId {
        Self::TYPE_ID
    }

    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn is_equal_to(&self, other: &dyn Object) -> bool {
        other
            .as_any()
            .downcast_ref::<Self>()
            .map_or(false, |o| o.value.to_bits() == self.value.to_bits())
    }

    fn hash_into(&self, hash: &mut ContentHash) {
        hash.append_f64(self.value);
    }

    fn copy_within(&self, _ctx: &mut CopyContext) -> ObjectRef {
        Arc::new(self.clone())
    }

    fn save(&self, ctx: &mut SaveContext, container: &mut dyn Container) -> Result<()> {
        let data = ctx.type_container(container, Self::TYPE_NAME, Self::IO_VERSION)?;
        data.write("value", ContainerValue::F64(self.value))
    }

    fn load(&mut self, ctx: &mut LoadContext, container: &dyn Container) -> Result<()> {
        let (data, _) = ctx.type_container(container, Self::TYPE_NAME, Self::IO_VERSION)?;
        self.value = data.read_f64("value")?;
        Ok(())
    }

    fn accumulate_memory(&self, acc: &mut MemoryAccumulator) {
        acc.accumulate(mem::size_of::<Self>());
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StringData {
    pub value: String,
}

impl StringData {
    pub const TYPE_ID: TypeId = TypeId(4);
    pub const TYPE_NAME: &'static str = "StringData";
    pub const IO_VERSION: u32 = 1;

    pub fn new(value: impl Into<String>) -> StringData {
        StringData {
            value: value.into(),
        }
    }
}

impl Object for StringData {
    fn type_id(&self) -> TypeId {
        Self::TYPE_ID
    }

    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn is_equal_to(&self, other: &dyn Object) -> bool {
        other
            .as_any()
            .downcast_ref::<Self>()
            .map_or(false, |o| o.value == self.value)
    }

    fn hash_into(&self, hash: &mut ContentHash) {
        hash.append_str(&self.value);
    }

    fn copy_within(&self, _ctx: &mut CopyContext) -> ObjectRef {
        Arc::new(self.clone())
    }

    fn save(&self, ctx: &mut SaveContext, container: &mut dyn Container) -> Result<()> {
        let data = ctx.type_container(container, Self::TYPE_NAME, Self::IO_VERSION)?;
        data.write("value", ContainerValue::Str(self.value.clone()))
    }

    fn load(&mut self, ctx: &mut LoadContext, container: &dyn Container) -> Result<()> {
        let (data, _) = ctx.type_container(container, Self::TYPE_NAME, Self::IO_VERSION)?;
        self.value = data.read_str("value")?.to_string();
        Ok(())
    }

    fn accumulate_memory(&self, acc: &mut MemoryAccumulator) {
        acc.accumulate(mem::size_of::<Self>() + self.value.capacity());
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntVectorData {
    pub value: Vec<i64>,
}

impl IntVectorData {
    pub const TYPE_ID: TypeId = TypeId(5);
    pub const TYPE_NAME: &'static str = "IntVectorData";
    pub const IO_VERSION: u32 = 1;

    pub fn new(value: Vec<i64>) -> IntVectorData {
        IntVectorData { value }
    }
}

impl Object for IntVectorData {
    fn type_id(&self) -> TypeId {
        Self::TYPE_ID
    }

    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn is_equal_to(&self, other: &dyn Object) -> bool {
        other
            .as_any()
            .downcast_ref::<Self>()
            .map_or(false, |o| o.value == self.value)
    }

    fn hash_into(&self, hash: &mut ContentHash) {
        hash.append_i64_slice(&self.value);
    }

    fn copy_within(&self, _ctx: &mut CopyContext) -> ObjectRef {
        Arc::new(self.clone())
    }

    fn save(&self, ctx: &mut SaveContext, container: &mut dyn Container) -> Result<()> {
        let data = ctx.type_container(container, Self::TYPE_NAME, Self::IO_VERSION)?;
        data.write("value", ContainerValue::I64Vec(self.value.clone()))
    }

    fn load(&mut self, ctx: &mut LoadContext, container: &dyn Container) -> Result<()> {
        let (data, _) = ctx.type_container(container, Self::TYPE_NAME, Self::IO_VERSION)?;
        self.value = data.read_i64_vec("value")?.to_vec();
        Ok(())
    }

    fn accumulate_memory(&self, acc: &mut MemoryAccumulator) {
        acc.accumulate(mem::size_of::<Self>() + self.value.capacity() * mem::size_of::<i64>());
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

/// A named collection of child objects.
///
/// Members are kept sorted by name so hashing and serialization are
/// deterministic.  The same child instance may appear under several names;
/// copy and save/load preserve that aliasing.
#[derive(Clone, Default)]
pub struct CompoundObject {
    members: BTreeMap<String, ObjectRef>,
}

impl CompoundObject {
    pub const TYPE_ID: TypeId = TypeId(6);
    pub const TYPE_NAME: &'static str = "CompoundObject";
    // Version 1 added the "size" entry; version 0 files lack it and are
    // still readable.
    pub const IO_VERSION: u32 = 1;

    pub fn new() -> CompoundObject {
        Default::default()
    }

    pub fn set(&mut self, name: impl Into<String>, member: ObjectRef) {
        self.members.insert(name.into(), member);
    }

    pub fn get(&self, name: &str) -> Option<&ObjectRef> {
        self.members.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<ObjectRef> {
        self.members.remove(name)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn members(&self) -> impl Iterator<Item = (&str, &ObjectRef)> {
        self.members.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl Object for CompoundObject {
    fn type_id(&self) -> TypeId {
        Self::TYPE_ID
    }

    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn is_equal_to(&self, other: &dyn Object) -> bool {
        let other = match other.as_any().downcast_ref::<Self>() {
            Some(o) => o,
            None => return false,
        };
        if other.members.len() != self.members.len() {
            return false;
        }
        self.members.iter().all(|(name, member)| {
            other
                .members
                .get(name)
                .map_or(false, |o| member.is_equal_to(o.as_ref()))
        })
    }

    fn hash_into(&self, hash: &mut ContentHash) {
        hash.append_u64(self.members.len() as u64);
        for (name, member) in &self.members {
            hash.append_str(name);
            hash.append_hash(&member.hash());
        }
    }

    fn copy_within(&self, ctx: &mut CopyContext) -> ObjectRef {
        let mut copy = CompoundObject::new();
        for (name, member) in &self.members {
            copy.members.insert(name.clone(), ctx.copy(member));
        }
        Arc::new(copy)
    }

    fn save(&self, ctx: &mut SaveContext, container: &mut dyn Container) -> Result<()> {
        let data = ctx.type_container(container, Self::TYPE_NAME, Self::IO_VERSION)?;
        data.write("size", ContainerValue::U64(self.members.len() as u64))?;
        let members = data.make_child("members");
        for (name, member) in &self.members {
            ctx.save_child(members, name, member)?;
        }
        Ok(())
    }

    fn load(&mut self, ctx: &mut LoadContext, container: &dyn Container) -> Result<()> {
        let (data, version) = ctx.type_container(container, Self::TYPE_NAME, Self::IO_VERSION)?;
        self.members.clear();
        let members = data.child("members")?;
        for name in members.entry_names() {
            let member = ctx.load_child(members, &name)?;
            self.members.insert(name, member);
        }
        if version >= 1 {
            let size = data.read_u64("size")? as usize;
            if size != self.members.len() {
                return Err(Error::Container(format!(
                    "compound size {} does not match {} loaded members",
                    size,
                    self.members.len()
                )));
            }
        }
        Ok(())
    }

    fn accumulate_memory(&self, acc: &mut MemoryAccumulator) {
        acc.accumulate(mem::size_of::<Self>());
        for (name, member) in &self.members {
            acc.accumulate(name.capacity());
            acc.accumulate_object(member);
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl std::fmt::Debug for CompoundObject {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("CompoundObject")
            .field("members", &self.members.keys().collect::<Vec<_>>())
            .finish()
    }
}
