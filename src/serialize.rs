//! Versioned object serialization with identity-deduplication.
//!
//! A [SaveContext] remembers every object it has written, by identity.  The
//! first occurrence of an object is written in full under a generated numeric
//! id; any later occurrence of the *same instance* writes only a reference
//! leaf carrying that id.  [LoadContext] resolves references back to the one
//! shared instance, so aliased graphs round-trip without duplication and
//! high-fan-in graphs don't blow up on disk.
//!
//! Each concrete type writes its fields inside a private sub-container named
//! after the type and tagged with an integer `ioVersion`.  Loading data whose
//! version is newer than the running code's is a hard [Error::FormatTooNew];
//! older versions are the type's own backward-compatibility problem.
//!
//! Types must load fields in the order they saved them; the first occurrence
//! of a shared child is the full one only when save and load traverse alike.
use std::collections::HashMap;
use std::convert::TryFrom;
use std::sync::Arc;

use ahash::RandomState;

use crate::container::{Container, ContainerValue};
use crate::error::{Error, Result};
use crate::object::{create_by_name, ObjectRef};

/// Write `object` into `container` under `name`.
pub fn save_object(object: &ObjectRef, container: &mut dyn Container, name: &str) -> Result<()> {
    SaveContext::new().save_child(container, name, object)
}

/// Read the object stored in `container` under `name`.
pub fn load_object(container: &dyn Container, name: &str) -> Result<ObjectRef> {
    LoadContext::new().load_child(container, name)
}

pub struct SaveContext {
    saved: HashMap<usize, u64, RandomState>,
    next_id: u64,
}

impl SaveContext {
    pub fn new() -> SaveContext {
        SaveContext {
            saved: Default::default(),
            next_id: 0,
        }
    }

    /// Open the per-type versioned sub-container a type saves its fields
    /// into.
    pub fn type_container<'a>(
        &mut self,
        container: &'a mut dyn Container,
        type_name: &str,
        io_version: u32,
    ) -> Result<&'a mut dyn Container> {
        let typed = container.make_child(type_name);
        typed.write("ioVersion", ContainerValue::U64(io_version as u64))?;
        Ok(typed.make_child("data"))
    }

    /// Write `object` under `name`, in full on first sight of this identity,
    /// as a reference leaf afterwards.
    pub fn save_child(
        &mut self,
        container: &mut dyn Container,
        name: &str,
        object: &ObjectRef,
    ) -> Result<()> {
        let identity = Arc::as_ptr(object) as *const () as usize;
        if let Some(id) = self.saved.get(&identity) {
            return container.write(name, ContainerValue::U64(*id));
        }

        let id = self.next_id;
        self.next_id += 1;
        self.saved.insert(identity, id);

        let entry = container.make_child(name);
        entry.write("id", ContainerValue::U64(id))?;
        entry.write("type", ContainerValue::Str(object.type_name().to_string()))?;
        object.save(self, entry.make_child("data"))
    }
}

impl Default for SaveContext {
    fn default() -> Self {
        Self::new()
    }
}

pub struct LoadContext {
    loaded: HashMap<u64, ObjectRef, RandomState>,
}

impl LoadContext {
    pub fn new() -> LoadContext {
        LoadContext {
            loaded: Default::default(),
        }
    }

    /// Open the per-type sub-container written by [SaveContext::type_container],
    /// returning it with the stored version.  Fails with
    /// [Error::FormatTooNew] when the data is from a newer type version.
    pub fn type_container<'a>(
        &mut self,
        container: &'a dyn Container,
        type_name: &str,
        supported_version: u32,
    ) -> Result<(&'a dyn Container, u32)> {
        let typed = container.child(type_name)?;
        let stored = typed.read_u64("ioVersion")?;
        let stored = u32::try_from(stored).map_err(|_| {
            Error::Container(format!(
                "{}: stored ioVersion {} is out of range",
                type_name, stored
            ))
        })?;
        if stored > supported_version {
            return Err(Error::FormatTooNew {
                type_name: type_name.to_string(),
                stored,
                supported: supported_version,
            });
        }
        Ok((typed.child("data")?, stored))
    }

    /// Load the object stored under `name`, resolving reference leaves to the
    /// instance already loaded for that id.
    pub fn load_child(&mut self, container: &dyn Container, name: &str) -> Result<ObjectRef> {
        if container.has(name) {
            let id = container.read_u64(name)?;
            return self.loaded.get(&id).cloned().ok_or_else(|| {
                Error::Container(format!(
                    "entry \"{}\" references object id {} before its definition",
                    name, id
                ))
            });
        }

        let entry = container.child(name)?;
        let id = entry.read_u64("id")?;
        let type_name = entry.read_str("type")?;
        let mut blank = create_by_name(type_name)?;
        blank.load(self, entry.child("data")?)?;
        let object: ObjectRef = Arc::from(blank);
        self.loaded.insert(id, object.clone());
        Ok(object)
    }
}

impl Default for LoadContext {
    fn default() -> Self {
        Self::new()
    }
}
