//! Scopes, the register allocator, and symbol resolution.

use std::hash::BuildHasherDefault;

use indexmap::IndexMap;
use log::trace;
use rustc_hash::FxHasher;

use tarn_core::{FuncDef, Symbol, Value};

use crate::slot::{Slot, SLOT_CONSTANT};
use crate::Compilation;

/// Bit-set register allocator.
///
/// Registers 0..255 are near; anything past that is far and must be lowered
/// through moves when used as an instruction operand. Allocation returns the
/// lowest clear bit; the high-water mark becomes the funcdef's slot count.
#[derive(Debug, Clone, Default)]
pub(crate) struct RegAlloc {
    bits: Vec<u64>,
    /// Highest index ever allocated, -1 when untouched.
    max: i32,
}

impl RegAlloc {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the lowest free register.
    pub fn alloc(&mut self) -> u32 {
        for (word_index, word) in self.bits.iter_mut().enumerate() {
            if *word != u64::MAX {
                let bit = word.trailing_ones();
                *word |= 1u64 << bit;
                let index = word_index as u32 * 64 + bit;
                self.max = self.max.max(index as i32);
                return index;
            }
        }
        self.bits.push(1);
        let index = (self.bits.len() as u32 - 1) * 64;
        self.max = self.max.max(index as i32);
        index
    }

    /// Release a register.
    pub fn free(&mut self, index: u32) {
        let word = (index / 64) as usize;
        if let Some(w) = self.bits.get_mut(word) {
            *w &= !(1u64 << (index % 64));
        }
    }

    /// Force a register to be considered in use (kept bindings from popped
    /// child scopes).
    pub fn set(&mut self, index: u32) {
        let word = (index / 64) as usize;
        if word >= self.bits.len() {
            self.bits.resize(word + 1, 0);
        }
        self.bits[word] |= 1u64 << (index % 64);
        self.max = self.max.max(index as i32);
    }

    pub fn is_set(&self, index: u32) -> bool {
        let word = (index / 64) as usize;
        self.bits
            .get(word)
            .map(|w| w & (1u64 << (index % 64)) != 0)
            .unwrap_or(false)
    }

    /// One past the highest register ever allocated.
    pub fn high_water(&self) -> u32 {
        (self.max + 1) as u32
    }

    /// Fold a popped child's high-water mark into this allocator.
    pub fn merge_high_water(&mut self, child: &RegAlloc) {
        self.max = self.max.max(child.max);
    }
}

/// This scope is the root of a function body.
pub(crate) const SCOPE_FUNCTION: u8 = 0x01;
/// Some nested function closed over this function's frame.
pub(crate) const SCOPE_ENV_CAPTURED: u8 = 0x02;
/// Code in this scope will never run; references through it are dead.
pub(crate) const SCOPE_UNUSED: u8 = 0x04;
/// The outermost scope of a compilation.
pub(crate) const SCOPE_TOP: u8 = 0x08;

/// Where a captured environment comes from, seen from this function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EnvRef {
    /// The enclosing function's own stack frame.
    Own,
    /// An entry of the enclosing function's environment table.
    Parent(usize),
}

/// One lexical binding.
#[derive(Debug, Clone)]
pub(crate) struct ScopeBinding {
    pub name: Symbol,
    pub slot: Slot,
    /// Preserve the register past this scope's pop (captured by a closure).
    pub keep: bool,
}

pub(crate) type ConstantPool = IndexMap<Value, u16, BuildHasherDefault<FxHasher>>;

/// One entry of the compile-time scope stack.
///
/// The stack is an owned vector; a scope's parent is simply the entry below
/// it. Constant pools, nested funcdefs, and environment tables are only
/// populated on function scopes; lexical scopes inherit a copy of the parent
/// allocator and merge the high-water mark back on pop.
#[derive(Debug, Default)]
pub(crate) struct Scope {
    pub flags: u8,
    pub bindings: Vec<ScopeBinding>,
    pub alloc: RegAlloc,
    /// Registers from popped child scopes that must stay live.
    pub kept: Vec<u32>,
    // Function-scope state.
    pub constants: ConstantPool,
    pub defs: Vec<std::rc::Rc<FuncDef>>,
    pub envs: Vec<EnvRef>,
    pub bytecode_start: usize,
    pub name: Option<Symbol>,
}

impl Scope {
    pub fn is_function(&self) -> bool {
        self.flags & SCOPE_FUNCTION != 0
    }
}

impl Compilation<'_> {
    /// Open a lexical scope that shares the enclosing register space.
    pub(crate) fn push_scope(&mut self) {
        let alloc = self.scopes.last().map(|s| s.alloc.clone()).unwrap_or_default();
        trace!("push scope (depth {})", self.scopes.len() + 1);
        self.scopes.push(Scope {
            alloc,
            ..Scope::default()
        });
    }

    /// Open a function-root scope with a fresh register space.
    pub(crate) fn push_function_scope(&mut self, extra_flags: u8, name: Option<Symbol>) {
        trace!(
            "push function scope {:?} (depth {})",
            name.as_ref().map(|s| s.as_str()),
            self.scopes.len() + 1
        );
        self.scopes.push(Scope {
            flags: SCOPE_FUNCTION | extra_flags,
            bytecode_start: self.bytecode.len(),
            name,
            ..Scope::default()
        });
    }

    /// Close a lexical scope: the parent inherits the high-water mark and
    /// any registers that closures still reference.
    pub(crate) fn pop_scope(&mut self) {
        let child = self.scopes.pop().expect("scope stack underflow");
        debug_assert!(!child.is_function(), "function scopes pop through finish_function_scope");
        trace!("pop scope (depth {})", self.scopes.len());
        let parent = self.scopes.last_mut().expect("scope stack underflow");
        parent.alloc.merge_high_water(&child.alloc);
        for index in child.kept {
            parent.alloc.set(index);
            parent.kept.push(index);
        }
        for binding in &child.bindings {
            if binding.keep && binding.slot.index >= 0 {
                let index = binding.slot.index as u32;
                parent.alloc.set(index);
                parent.kept.push(index);
            }
        }
    }

    /// Index of the innermost function scope.
    pub(crate) fn function_scope_index(&self) -> usize {
        self.scopes
            .iter()
            .rposition(|s| s.is_function())
            .expect("no function scope open")
    }

    /// True if the symbol is bound in any open scope; used to let local
    /// bindings shadow environment macros.
    pub(crate) fn scope_has(&self, sym: &Symbol) -> bool {
        self.scopes
            .iter()
            .any(|s| s.bindings.iter().any(|b| b.name == *sym))
    }

    /// Bind a symbol in the innermost scope.
    pub(crate) fn bind(&mut self, name: Symbol, slot: Slot) {
        self.scopes
            .last_mut()
            .expect("scope stack underflow")
            .bindings
            .push(ScopeBinding { name, slot, keep: false });
    }

    /// Search the scope stack for a symbol.
    ///
    /// Constants and environment refs come back as-is. A hit inside the
    /// current function is a local slot. A hit beyond a function boundary
    /// marks the binding kept, flags the owning function as captured, and
    /// threads an environment entry through every intervening function,
    /// returning an upvalue slot. Crossing an unused scope yields a dead
    /// nil slot with no capture recorded.
    pub(crate) fn resolve_local(&mut self, sym: &Symbol) -> Option<Slot> {
        let mut hit: Option<(usize, usize)> = None;
        for i in (0..self.scopes.len()).rev() {
            if let Some(j) = self.scopes[i]
                .bindings
                .iter()
                .rposition(|b| b.name == *sym)
            {
                hit = Some((i, j));
                break;
            }
        }
        let (scope_index, binding_index) = hit?;
        let slot = self.scopes[scope_index].bindings[binding_index].slot.clone();
        if slot.flags & SLOT_CONSTANT != 0 {
            return Some(slot);
        }
        let current_fn = self.function_scope_index();
        if scope_index >= current_fn {
            return Some(slot);
        }
        if self.scopes[scope_index + 1..]
            .iter()
            .any(|s| s.flags & SCOPE_UNUSED != 0)
        {
            // The reference can never run; do not record a capture.
            return Some(Slot::nil());
        }

        self.scopes[scope_index].bindings[binding_index].keep = true;
        let defining_fn = self.scopes[..=scope_index]
            .iter()
            .rposition(|s| s.is_function())
            .expect("binding outside any function scope");
        self.scopes[defining_fn].flags |= SCOPE_ENV_CAPTURED;
        trace!(
            "capture {} from function scope {} into {}",
            sym,
            defining_fn,
            current_fn
        );

        // Thread an environment entry through every function scope between
        // the defining function (exclusive) and the current one (inclusive).
        let mut parent_entry: Option<usize> = None;
        for f in defining_fn + 1..self.scopes.len() {
            if !self.scopes[f].is_function() {
                continue;
            }
            let env_ref = match parent_entry {
                None => EnvRef::Own,
                Some(index) => EnvRef::Parent(index),
            };
            let index = match self.scopes[f].envs.iter().position(|e| *e == env_ref) {
                Some(index) => index,
                None => {
                    self.scopes[f].envs.push(env_ref);
                    self.scopes[f].envs.len() - 1
                }
            };
            parent_entry = Some(index);
        }

        let envindex = parent_entry.expect("capture must cross a function scope") as i32;
        Some(Slot {
            flags: slot.flags,
            index: slot.index,
            envindex,
            constant: None,
        })
    }
}
