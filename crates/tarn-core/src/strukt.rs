//! Immutable structs - fixed-capacity hash containers.

use std::cell::Cell;
use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use ahash::AHasher;

use crate::value::Value;

/// An immutable key-to-value hash container.
///
/// The bucket array has power-of-two capacity fixed at construction, at
/// least twice the entry count, probed linearly. `nil` keys and `nil`
/// values are skipped at construction, so lookups of absent keys and
/// lookups of `nil` are indistinguishable, which is what indexing code
/// expects.
///
/// Like tuples, structs carry the source position of their opening
/// delimiter and a lazily computed cached hash.
#[derive(Debug)]
pub struct Struct {
    buckets: Box<[Option<(Value, Value)>]>,
    count: usize,
    hash: Cell<u64>,
    line: i32,
    column: i32,
}

fn value_hash(v: &Value) -> u64 {
    let mut hasher = AHasher::default();
    v.hash(&mut hasher);
    hasher.finish()
}

impl Struct {
    /// Build a struct from key/value pairs with no source position.
    pub fn from_pairs(pairs: Vec<(Value, Value)>) -> Self {
        Self::with_location(pairs, -1, -1)
    }

    /// Build a struct from key/value pairs stamped with a source position.
    ///
    /// Later duplicates of a key replace earlier ones.
    pub fn with_location(pairs: Vec<(Value, Value)>, line: i32, column: i32) -> Self {
        let kept: Vec<(Value, Value)> = pairs
            .into_iter()
            .filter(|(k, v)| !matches!(k, Value::Nil) && !matches!(v, Value::Nil))
            .collect();
        let capacity = (kept.len().max(1) * 2).next_power_of_two();
        let mut buckets: Vec<Option<(Value, Value)>> = vec![None; capacity];
        let mask = capacity - 1;
        let mut count = 0;
        for (key, value) in kept {
            let mut index = (value_hash(&key) as usize) & mask;
            loop {
                match &buckets[index] {
                    None => {
                        buckets[index] = Some((key, value));
                        count += 1;
                        break;
                    }
                    Some((existing, _)) if *existing == key => {
                        buckets[index] = Some((key, value));
                        break;
                    }
                    Some(_) => index = (index + 1) & mask,
                }
            }
        }
        Self {
            buckets: buckets.into_boxed_slice(),
            count,
            hash: Cell::new(0),
            line,
            column,
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Bucket capacity (power of two).
    pub fn capacity(&self) -> usize {
        self.buckets.len()
    }

    /// Look up a key.
    pub fn get(&self, key: &Value) -> Option<&Value> {
        if matches!(key, Value::Nil) {
            return None;
        }
        let mask = self.buckets.len() - 1;
        let mut index = (value_hash(key) as usize) & mask;
        loop {
            match &self.buckets[index] {
                None => return None,
                Some((k, v)) if k == key => return Some(v),
                Some(_) => index = (index + 1) & mask,
            }
        }
    }

    /// Iterate entries in bucket order.
    pub fn entries(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.buckets.iter().filter_map(|slot| slot.as_ref().map(|(k, v)| (k, v)))
    }

    /// Entries sorted by key, the order used for printing and comparison.
    pub fn sorted_entries(&self) -> Vec<(&Value, &Value)> {
        let mut entries: Vec<_> = self.entries().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
    }

    /// Source line of the opening delimiter, `-1` if unknown.
    pub fn line(&self) -> i32 {
        self.line
    }

    /// Source column of the opening delimiter, `-1` if unknown.
    pub fn column(&self) -> i32 {
        self.column
    }

    /// The cached structural hash, computing it on first use.
    ///
    /// Per-entry hashes combine commutatively so bucket order does not
    /// matter.
    pub fn hash_code(&self) -> u64 {
        let cached = self.hash.get();
        if cached != 0 {
            return cached;
        }
        let mut combined: u64 = 0x9e37_79b9_7f4a_7c15;
        for (k, v) in self.entries() {
            let mut hasher = AHasher::default();
            k.hash(&mut hasher);
            v.hash(&mut hasher);
            combined = combined.wrapping_add(hasher.finish());
        }
        let computed = combined | 1;
        self.hash.set(computed);
        computed
    }
}

impl PartialEq for Struct {
    fn eq(&self, other: &Self) -> bool {
        if self.count != other.count {
            return false;
        }
        self.entries().all(|(k, v)| other.get(k) == Some(v))
    }
}

impl Eq for Struct {}

impl PartialOrd for Struct {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Struct {
    /// Ordering lifted lexicographically over key-sorted entries.
    fn cmp(&self, other: &Self) -> Ordering {
        let left = self.sorted_entries();
        let right = other.sorted_entries();
        for (a, b) in left.iter().zip(right.iter()) {
            let key = a.0.cmp(b.0);
            if key != Ordering::Equal {
                return key;
            }
            let val = a.1.cmp(b.1);
            if val != Ordering::Equal {
                return val;
            }
        }
        left.len().cmp(&right.len())
    }
}
