//! tarn-core - Value model and VM artifacts for the Tarn language.
//!
//! This crate is the foundation of the Tarn pipeline. It defines:
//!
//! - the tagged [`Value`] sum type with its total cross-kind ordering,
//! - hash-consed identifiers ([`Symbol`]) and the per-context [`Interner`],
//! - the immutable containers ([`Tuple`], [`Struct`]) and their mutable
//!   counterparts ([`Array`], [`Table`], [`Buffer`]),
//! - the instruction encoding ([`Instr`], [`Opcode`]) and the sealed
//!   function-definition artifact ([`FuncDef`]) the compiler produces and
//!   the interpreter executes,
//! - the [`Context`] that owns per-thread state.
//!
//! The reader (`tarn-read`) and the compiler (`tarn-comp`) both build on
//! this crate and on nothing else; the interpreter, collector, and standard
//! library live elsewhere and consume these types through their public
//! surface.
//!
//! # Concurrency model
//!
//! Everything here is single-threaded by construction (`Rc`, `RefCell`).
//! A [`Context`] and all values created within it belong to one thread;
//! run several contexts in parallel for parallelism. Nothing in this crate
//! locks.

pub mod bytecode;
pub mod context;
pub mod funcdef;
pub mod intern;
pub mod strukt;
pub mod table;
pub mod tuple;
pub mod value;

pub use bytecode::{Instr, Opcode, SourceMapping};
pub use context::{Context, InternRef};
pub use funcdef::{FuncDef, FuncDefBuilder, FuncDefError, FLAG_NEEDS_ENV, FLAG_VARARG};
pub use intern::{Interner, Symbol};
pub use strukt::Struct;
pub use table::Table;
pub use tuple::Tuple;
pub use value::{
    AbstractValue, Array, Buffer, CFunction, Fiber, FiberStatus, Function, Value, ValueKind,
};

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[quickcheck]
    fn intern_uniqueness(a: String, b: String) -> bool {
        let mut interner = Interner::new();
        let sa = interner.intern(&a);
        let sb = interner.intern(&b);
        (sa == sb) == (a == b)
    }

    #[quickcheck]
    fn value_order_is_total_and_antisymmetric(a: i32, b: i32) -> bool {
        use std::cmp::Ordering;
        let va = Value::Integer(a);
        let vb = Value::Integer(b);
        match va.cmp(&vb) {
            Ordering::Less => vb.cmp(&va) == Ordering::Greater,
            Ordering::Greater => vb.cmp(&va) == Ordering::Less,
            Ordering::Equal => va == vb,
        }
    }

    #[quickcheck]
    fn number_order_matches_ieee_except_nan(a: f64, b: f64) -> bool {
        let va = Value::Real(a);
        let vb = Value::Real(b);
        if a.is_nan() || b.is_nan() {
            // NaN sorts below every real and equals itself.
            if a.is_nan() && b.is_nan() {
                va == vb
            } else if a.is_nan() {
                va < vb
            } else {
                vb < va
            }
        } else {
            (va < vb) == (a < b)
        }
    }
}
