//! The [Container] trait is the hierarchical binary substrate that objects
//! serialize into: a tree of named leaf values and named sub-containers.
//!
//! This crate only writes into and reads from containers; it deliberately
//! does not define an on-disk byte layout.  File-format front ends supply
//! their own implementations.  [MemoryContainer] is an in-memory
//! implementation for tests and embedding.
use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// A leaf value stored in a container.
#[derive(Debug, Clone, PartialEq)]
pub enum ContainerValue {
    Bool(bool),
    I64(i64),
    U64(u64),
    F64(f64),
    Str(String),
    Bytes(Vec<u8>),
    I64Vec(Vec<i64>),
}

impl ContainerValue {
    fn kind(&self) -> &'static str {
        match self {
            ContainerValue::Bool(_) => "bool",
            ContainerValue::I64(_) => "i64",
            ContainerValue::U64(_) => "u64",
            ContainerValue::F64(_) => "f64",
            ContainerValue::Str(_) => "string",
            ContainerValue::Bytes(_) => "bytes",
            ContainerValue::I64Vec(_) => "i64 vector",
        }
    }
}

/// A hierarchical container of named values and named sub-containers.
///
/// Names are unique across values and children within one container; writing
/// a value and creating a child under the same name is a caller bug and the
/// later operation wins.
pub trait Container {
    /// Write a leaf value under `name`, replacing any previous value.
    fn write(&mut self, name: &str, value: ContainerValue) -> Result<()>;

    /// Read the leaf value stored under `name`.
    fn read(&self, name: &str) -> Result<&ContainerValue>;

    /// True if a leaf value is stored under `name`.
    fn has(&self, name: &str) -> bool;

    /// Get-or-create the sub-container called `name`.
    fn make_child(&mut self, name: &str) -> &mut dyn Container;

    /// The existing sub-container called `name`.
    fn child(&self, name: &str) -> Result<&dyn Container>;

    /// True if a sub-container called `name` exists.
    fn has_child(&self, name: &str) -> bool;

    /// All entry names, leaf values and sub-containers alike, sorted.
    fn entry_names(&self) -> Vec<String>;

    fn read_bool(&self, name: &str) -> Result<bool> {
        match self.read(name)? {
            ContainerValue::Bool(v) => Ok(*v),
            other => Err(Error::wrong_entry_kind(name, "bool", other.kind())),
        }
    }

    fn read_i64(&self, name: &str) -> Result<i64> {
        match self.read(name)? {
            ContainerValue::I64(v) => Ok(*v),
            other => Err(Error::wrong_entry_kind(name, "i64", other.kind())),
        }
    }

    fn read_u64(&self, name: &str) -> Result<u64> {
        match self.read(name)? {
            ContainerValue::U64(v) => Ok(*v),
            other => Err(Error::wrong_entry_kind(name, "u64", other.kind())),
        }
    }

    fn read_f64(&self, name: &str) -> Result<f64> {
        match self.read(name)? {
            ContainerValue::F64(v) => Ok(*v),
            other => Err(Error::wrong_entry_kind(name, "f64", other.kind())),
        }
    }

    fn read_str(&self, name: &str) -> Result<&str> {
        match self.read(name)? {
            ContainerValue::Str(v) => Ok(v),
            other => Err(Error::wrong_entry_kind(name, "string", other.kind())),
        }
    }

    fn read_bytes(&self, name: &str) -> Result<&[u8]> {
        match self.read(name)? {
            ContainerValue::Bytes(v) => Ok(v),
            other => Err(Error::wrong_entry_kind(name, "bytes", other.kind())),
        }
    }

    fn read_i64_vec(&self, name: &str) -> Result<&[i64]> {
        match self.read(name)? {
            ContainerValue::I64Vec(v) => Ok(v),
            other => Err(Error::wrong_entry_kind(name, "i64 vector", other.kind())),
        }
    }
}

/// A [Container] backed by in-memory maps.
///
/// Intended for tests and for embedders that flush serialized trees to disk
/// through their own format writers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryContainer {
    values: BTreeMap<String, ContainerValue>,
    children: BTreeMap<String, MemoryContainer>,
}

impl MemoryContainer {
    pub fn new() -> MemoryContainer {
        Default::default()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.children.is_empty()
    }
}

impl Container for MemoryContainer {
    fn write(&mut self, name: &str, value: ContainerValue) -> Result<()> {
        self.values.insert(name.to_string(), value);
        Ok(())
    }

    fn read(&self, name: &str) -> Result<&ContainerValue> {
        self.values
            .get(name)
            .ok_or_else(|| Error::missing_entry(name))
    }

    fn has(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    fn make_child(&mut self, name: &str) -> &mut dyn Container {
        self.children.entry(name.to_string()).or_default()
    }

    fn child(&self, name: &str) -> Result<&dyn Container> {
        match self.children.get(name) {
            Some(c) => Ok(c),
            None => Err(Error::missing_entry(name)),
        }
    }

    fn has_child(&self, name: &str) -> bool {
        self.children.contains_key(name)
    }

    fn entry_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.values.keys().cloned().collect();
        names.extend(self.children.keys().cloned());
        names.sort();
        names
    }
}
