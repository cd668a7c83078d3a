//! Per-thread execution contexts.
//!
//! A context owns everything a logical execution context needs from the
//! core: today that is the intern table. Contexts are deliberately not
//! `Send`; parallelism is achieved by giving each thread its own context,
//! never by sharing one. Every core entry point takes an explicit handle
//! rather than reaching for ambient thread-local state.

use std::cell::RefCell;
use std::rc::Rc;

use crate::intern::{Interner, Symbol};
use crate::value::Value;

/// Shared handle to a context's intern table.
///
/// The reader and the compiler must hold handles to the *same* table so
/// that identifiers they create compare pointer-equal.
pub type InternRef = Rc<RefCell<Interner>>;

/// An isolated execution context.
#[derive(Debug)]
pub struct Context {
    interner: InternRef,
}

impl Context {
    pub fn new() -> Self {
        Self {
            interner: Rc::new(RefCell::new(Interner::new())),
        }
    }

    /// A handle to the context's intern table.
    pub fn interner(&self) -> InternRef {
        Rc::clone(&self.interner)
    }

    /// Intern a symbol.
    pub fn symbol(&self, text: &str) -> Symbol {
        self.interner.borrow_mut().intern(text)
    }

    /// Intern a keyword; the leading `:` is not stored.
    pub fn keyword(&self, text: &str) -> Value {
        Value::Keyword(self.interner.borrow_mut().intern(text))
    }

    /// Evict identifiers whose last reference is gone. Called after a
    /// collection pass over the context's heap.
    pub fn sweep_symbols(&self) {
        self.interner.borrow_mut().sweep();
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
