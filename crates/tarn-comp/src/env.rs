//! Compilation environments.
//!
//! An environment maps symbols to binding descriptors. The compiler consults
//! it when a symbol misses every lexical scope: a `def` becomes a constant,
//! a `var` becomes a reference through its one-element backing cell, and a
//! `macro` is expanded at call position (or treated like a `def` when merely
//! referenced).

use std::cell::RefCell;
use std::hash::BuildHasherDefault;
use std::rc::Rc;

use indexmap::IndexMap;
use rustc_hash::FxHasher;

use tarn_core::{Array, Opcode, Symbol, Value};

/// How a symbol is bound at the environment level.
#[derive(Debug, Clone)]
pub enum Binding {
    /// An immutable value.
    Def(Value),
    /// A mutable reference cell; reads and writes go through index 0.
    Var(Array),
    /// A callable invoked by the compiler during expansion.
    Macro(Value),
}

/// A two-operand specialization for a known callee.
///
/// When a call's callee resolves to a constant registered here and the call
/// has exactly two arguments, the compiler emits the opcode directly instead
/// of a function call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Intrinsic {
    pub opcode: Opcode,
}

type Map<V> = IndexMap<Symbol, V, BuildHasherDefault<FxHasher>>;

/// A symbol-to-binding mapping with an optional parent.
#[derive(Debug, Default)]
pub struct Environment {
    bindings: Map<Binding>,
    intrinsics: IndexMap<Value, Intrinsic, BuildHasherDefault<FxHasher>>,
    parent: Option<Rc<Environment>>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parent(parent: Rc<Environment>) -> Self {
        Self {
            parent: Some(parent),
            ..Self::default()
        }
    }

    /// Bind an immutable value.
    pub fn def(&mut self, name: Symbol, value: Value) {
        self.bindings.insert(name, Binding::Def(value));
    }

    /// Bind a mutable var, returning its backing cell.
    pub fn var(&mut self, name: Symbol, initial: Value) -> Array {
        let cell: Array = Rc::new(RefCell::new(vec![initial]));
        self.bindings.insert(name, Binding::Var(Rc::clone(&cell)));
        cell
    }

    /// Bind a macro.
    pub fn defmacro(&mut self, name: Symbol, function: Value) {
        self.bindings.insert(name, Binding::Macro(function));
    }

    /// Bind an immutable value and register an opcode specialization for
    /// calls through it.
    pub fn def_intrinsic(&mut self, name: Symbol, value: Value, opcode: Opcode) {
        self.intrinsics.insert(value.clone(), Intrinsic { opcode });
        self.def(name, value);
    }

    /// Look a symbol up, walking parent environments.
    pub fn resolve(&self, name: &Symbol) -> Option<&Binding> {
        match self.bindings.get(name) {
            Some(binding) => Some(binding),
            None => self.parent.as_deref().and_then(|p| p.resolve(name)),
        }
    }

    /// The specialization for a resolved constant callee, if any.
    pub fn intrinsic_for(&self, callee: &Value) -> Option<Intrinsic> {
        match self.intrinsics.get(callee) {
            Some(intr) => Some(*intr),
            None => self.parent.as_deref().and_then(|p| p.intrinsic_for(callee)),
        }
    }
}
