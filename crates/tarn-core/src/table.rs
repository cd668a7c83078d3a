//! Mutable tables - the mutable counterpart of structs.

use std::hash::BuildHasherDefault;

use ahash::AHasher;
use indexmap::IndexMap;

use crate::value::Value;

type TableMap = IndexMap<Value, Value, BuildHasherDefault<AHasher>>;

/// A mutable key-to-value container with insertion-ordered iteration.
///
/// `nil` keys are rejected and putting a `nil` value removes the key, so a
/// `get` miss and a stored `nil` are indistinguishable, mirroring struct
/// semantics.
#[derive(Debug, Default)]
pub struct Table {
    map: TableMap,
}

impl Table {
    pub fn new() -> Self {
        Self { map: TableMap::default() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            map: TableMap::with_capacity_and_hasher(capacity, Default::default()),
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn get(&self, key: &Value) -> Option<&Value> {
        if matches!(key, Value::Nil) {
            return None;
        }
        self.map.get(key)
    }

    /// Insert or update a key. Putting `nil` removes; `nil` keys are ignored.
    pub fn put(&mut self, key: Value, value: Value) {
        if matches!(key, Value::Nil) {
            return;
        }
        if matches!(value, Value::Nil) {
            self.map.shift_remove(&key);
        } else {
            self.map.insert(key, value);
        }
    }

    pub fn contains_key(&self, key: &Value) -> bool {
        self.get(key).is_some()
    }

    /// Iterate entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.map.iter()
    }
}
