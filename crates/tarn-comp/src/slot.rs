//! Compile-time value locations.
//!
//! A slot describes where a value lives while code is being generated: a
//! register (near or far), an upvalue in a captured environment, a constant,
//! or a reference cell reached through indexed get/put. Slots are value-like
//! and cheap to copy.

use tarn_core::Value;

/// The slot holds a compile-time constant rather than a register.
pub const SLOT_CONSTANT: u16 = 0x01;
/// Reads and writes go through index 0 of a one-element backing array.
pub const SLOT_REF: u16 = 0x02;
/// The slot is a named binding; its register outlives expression temps.
pub const SLOT_NAMED: u16 = 0x04;
/// The binding may be written with `set`.
pub const SLOT_MUTABLE: u16 = 0x08;
/// The value has already been returned; no register holds it.
pub const SLOT_RETURNED: u16 = 0x10;

/// A compile-time location descriptor.
#[derive(Debug, Clone, Default)]
pub struct Slot {
    pub flags: u16,
    /// Register index: 0..255 near, 256..65535 far, -1 none.
    pub index: i32,
    /// Captured environment index, -1 for local.
    pub envindex: i32,
    /// The literal for constant slots; the backing array for ref slots.
    pub constant: Option<Value>,
}

impl Slot {
    /// A constant slot.
    pub fn constant(value: Value) -> Self {
        Self {
            flags: SLOT_CONSTANT,
            index: -1,
            envindex: -1,
            constant: Some(value),
        }
    }

    /// The nil constant.
    pub fn nil() -> Self {
        Self::constant(Value::Nil)
    }

    /// A reference slot over an environment-level backing cell.
    pub fn reference(cell: Value) -> Self {
        Self {
            flags: SLOT_CONSTANT | SLOT_REF | SLOT_MUTABLE,
            index: -1,
            envindex: -1,
            constant: Some(cell),
        }
    }

    /// A plain register slot.
    pub fn register(index: u32) -> Self {
        Self {
            flags: 0,
            index: index as i32,
            envindex: -1,
            constant: None,
        }
    }

    /// The "already returned" sentinel produced by tail emission.
    pub fn returned() -> Self {
        Self {
            flags: SLOT_RETURNED,
            index: -1,
            envindex: -1,
            constant: None,
        }
    }

    pub fn with_flags(mut self, flags: u16) -> Self {
        self.flags |= flags;
        self
    }

    #[inline]
    pub fn has(&self, flag: u16) -> bool {
        self.flags & flag != 0
    }

    #[inline]
    pub fn is_constant(&self) -> bool {
        self.has(SLOT_CONSTANT)
    }

    #[inline]
    pub fn is_ref(&self) -> bool {
        self.has(SLOT_REF)
    }

    #[inline]
    pub fn is_named(&self) -> bool {
        self.has(SLOT_NAMED)
    }

    #[inline]
    pub fn is_returned(&self) -> bool {
        self.has(SLOT_RETURNED)
    }

    #[inline]
    pub fn is_upvalue(&self) -> bool {
        self.envindex >= 0
    }

    /// True for the plain-constant case (not a ref cell).
    pub fn as_literal(&self) -> Option<&Value> {
        if self.is_constant() && !self.is_ref() {
            self.constant.as_ref()
        } else {
            None
        }
    }
}
