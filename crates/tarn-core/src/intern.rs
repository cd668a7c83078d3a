//! Symbol interning - hash-consed identifier storage.
//!
//! Every syntactically equal symbol or keyword in a context is backed by the
//! same heap allocation, so identifier equality is a pointer comparison. The
//! table is an open-addressed hash set with tombstone deletion: entries hold
//! weak references to their text, and a dead entry discovered while probing
//! collapses into a tombstone that later insertions may reuse.
//!
//! # Performance Characteristics
//!
//! - **Interning (hit)**: O(1) - hash + linear probe
//! - **Interning (miss)**: O(1) amortized - probe + allocation
//! - **Symbol comparison**: O(1) - pointer comparison
//!
//! The table belongs to exactly one context and is never shared across
//! threads; callers that need the same identifiers in the reader and the
//! compiler share one table handle within the context.

use ahash::AHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::{Rc, Weak};

/// An interned identifier.
///
/// `Symbol` is a cheap handle (one `Rc<str>`) to text owned by an
/// [`Interner`]. Two symbols produced by the same interner are equal iff
/// their text is equal, and that check is a pointer comparison.
///
/// Symbols order lexicographically by their text so they can participate in
/// the total value order.
#[derive(Clone)]
pub struct Symbol(Rc<str>);

impl Symbol {
    /// The symbol text.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Byte length of the symbol text.
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True for the empty symbol.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Stable address of the backing allocation, used for identity hashing.
    #[inline]
    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const u8 as usize
    }
}

impl PartialEq for Symbol {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        // Intern invariant: same text implies same allocation.
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Symbol {}

impl PartialOrd for Symbol {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Symbol {
    #[inline]
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.as_bytes().cmp(other.0.as_bytes())
    }
}

impl Hash for Symbol {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({})", self.as_str())
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One slot of the open-addressed table.
enum Entry {
    /// Never used.
    Empty,
    /// Previously occupied; probing continues past it, insertion may reuse it.
    Tombstone,
    /// Live or recently-dead interned text.
    Occupied { hash: u64, text: Weak<str> },
}

/// Open-addressed intern table with tombstone deletion.
///
/// Capacity is always a power of two; probing is linear from the truncated
/// hash. The table grows at 3/4 load (counting tombstones, which are
/// reclaimed during the rehash).
pub struct Interner {
    entries: Vec<Entry>,
    /// Live entries.
    count: usize,
    /// Live entries plus tombstones; drives the growth decision.
    occupied: usize,
}

const INITIAL_CAPACITY: usize = 16;

impl Interner {
    /// Create an empty intern table.
    pub fn new() -> Self {
        Self {
            entries: std::iter::repeat_with(|| Entry::Empty)
                .take(INITIAL_CAPACITY)
                .collect(),
            count: 0,
            occupied: 0,
        }
    }

    /// Intern `text`, returning the canonical symbol for it.
    ///
    /// If an equal string is already interned its symbol is returned;
    /// otherwise the text is copied into a fresh allocation. Dead entries
    /// found on the probe path become tombstones.
    pub fn intern(&mut self, text: &str) -> Symbol {
        if self.occupied * 4 >= self.entries.len() * 3 {
            self.grow();
        }

        let hash = hash_text(text);
        let mask = self.entries.len() - 1;
        let mut index = (hash as usize) & mask;
        let mut insert_at: Option<usize> = None;

        loop {
            match &self.entries[index] {
                Entry::Empty => {
                    let slot = insert_at.unwrap_or(index);
                    return self.insert(slot, hash, text);
                }
                Entry::Tombstone => {
                    if insert_at.is_none() {
                        insert_at = Some(index);
                    }
                }
                Entry::Occupied { hash: h, text: w } => {
                    if *h == hash {
                        match w.upgrade() {
                            Some(rc) if &*rc == text => return Symbol(rc),
                            Some(_) => {}
                            None => {
                                // The last symbol with this text was dropped.
                                self.entries[index] = Entry::Tombstone;
                                self.count -= 1;
                                if insert_at.is_none() {
                                    insert_at = Some(index);
                                }
                            }
                        }
                    }
                }
            }
            index = (index + 1) & mask;
        }
    }

    /// True if an equal string is currently interned and alive.
    pub fn contains(&self, text: &str) -> bool {
        let hash = hash_text(text);
        let mask = self.entries.len() - 1;
        let mut index = (hash as usize) & mask;
        loop {
            match &self.entries[index] {
                Entry::Empty => return false,
                Entry::Tombstone => {}
                Entry::Occupied { hash: h, text: w } => {
                    if *h == hash {
                        if let Some(rc) = w.upgrade() {
                            if &*rc == text {
                                return true;
                            }
                        }
                    }
                }
            }
            index = (index + 1) & mask;
        }
    }

    /// Number of live interned strings.
    ///
    /// Entries whose last symbol has been dropped but which have not yet
    /// been probed over are still counted; call [`Interner::sweep`] first
    /// for an exact figure.
    pub fn len(&self) -> usize {
        self.count
    }

    /// True when nothing is interned.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Current bucket capacity.
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Evict every entry whose text is no longer referenced.
    ///
    /// This is the explicit end-of-collection hook: the owning context runs
    /// it after reclaiming values so the table does not accumulate dead
    /// identifiers.
    pub fn sweep(&mut self) {
        for entry in &mut self.entries {
            if let Entry::Occupied { text, .. } = entry {
                if text.strong_count() == 0 {
                    *entry = Entry::Tombstone;
                    self.count -= 1;
                }
            }
        }
    }

    fn insert(&mut self, index: usize, hash: u64, text: &str) -> Symbol {
        let rc: Rc<str> = Rc::from(text);
        let was_empty = matches!(self.entries[index], Entry::Empty);
        self.entries[index] = Entry::Occupied {
            hash,
            text: Rc::downgrade(&rc),
        };
        self.count += 1;
        if was_empty {
            self.occupied += 1;
        }
        Symbol(rc)
    }

    fn grow(&mut self) {
        let new_cap = (self.entries.len() * 2).max(INITIAL_CAPACITY);
        let old = std::mem::replace(
            &mut self.entries,
            std::iter::repeat_with(|| Entry::Empty).take(new_cap).collect(),
        );
        self.count = 0;
        self.occupied = 0;
        let mask = new_cap - 1;
        for entry in old {
            if let Entry::Occupied { hash, text } = entry {
                // Dead and tombstoned entries are dropped by the rehash.
                if text.strong_count() == 0 {
                    continue;
                }
                let mut index = (hash as usize) & mask;
                while !matches!(self.entries[index], Entry::Empty) {
                    index = (index + 1) & mask;
                }
                self.entries[index] = Entry::Occupied { hash, text };
                self.count += 1;
                self.occupied += 1;
            }
        }
    }
}

impl Default for Interner {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Interner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interner")
            .field("count", &self.count)
            .field("capacity", &self.entries.len())
            .finish()
    }
}

#[inline]
fn hash_text(text: &str) -> u64 {
    let mut hasher = AHasher::default();
    text.hash(&mut hasher);
    hasher.finish()
}
