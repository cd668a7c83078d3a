//! Instruction emission, constant pooling, jump patching, and funcdef
//! finalization.
//!
//! One bytecode buffer (with a parallel source-map buffer) is shared by
//! every function scope of a compilation; each function remembers where its
//! code starts and slices it off at finalization.

use std::rc::Rc;

use log::trace;

use tarn_core::{FuncDef, FuncDefBuilder, Instr, Opcode, Value, FLAG_NEEDS_ENV, FLAG_VARARG};

use crate::error::CompileError;
use crate::scope::{EnvRef, SCOPE_ENV_CAPTURED};
use crate::slot::Slot;
use crate::{Compilation, FormOptions};

impl Compilation<'_> {
    /// Append one instruction carrying the current source mapping.
    pub(crate) fn emit(&mut self, instr: Instr) -> usize {
        let index = self.bytecode.len();
        self.bytecode.push(instr);
        self.mapbuffer.push(self.mapping);
        index
    }

    /// Index the next emitted instruction will occupy.
    pub(crate) fn here(&self) -> usize {
        self.bytecode.len()
    }

    // ------------------------------------------------------------------
    // Registers
    // ------------------------------------------------------------------

    /// Claim the lowest free register of the current scope; may be far.
    pub(crate) fn alloc_register(&mut self) -> u32 {
        self.scopes
            .last_mut()
            .expect("scope stack underflow")
            .alloc
            .alloc()
    }

    /// Claim a near register for use as an instruction operand.
    pub(crate) fn alloc_near(&mut self) -> Result<u8, CompileError> {
        let index = self.alloc_register();
        if index > u8::MAX as u32 {
            self.free_register(index);
            return Err(self.error("expression too complex: no near registers available"));
        }
        Ok(index as u8)
    }

    pub(crate) fn free_register(&mut self, index: u32) {
        self.scopes
            .last_mut()
            .expect("scope stack underflow")
            .alloc
            .free(index);
    }

    /// Release a slot's register if it is an unnamed local temporary.
    pub(crate) fn free_slot(&mut self, slot: &Slot) {
        if !slot.is_named() && !slot.is_constant() && slot.envindex < 0 && slot.index >= 0 {
            self.free_register(slot.index as u32);
        }
    }

    // ------------------------------------------------------------------
    // Constants and nested definitions
    // ------------------------------------------------------------------

    /// Intern a constant into the current function's pool, deduplicated by
    /// structural equality, preserving insertion order.
    pub(crate) fn add_constant(&mut self, value: Value) -> Result<u16, CompileError> {
        let function = self.function_scope_index();
        if let Some(&index) = self.scopes[function].constants.get(&value) {
            return Ok(index);
        }
        let index = self.scopes[function].constants.len();
        if index >= u16::MAX as usize {
            return Err(self.error("too many constants"));
        }
        self.scopes[function].constants.insert(value, index as u16);
        Ok(index as u16)
    }

    /// Register a nested funcdef with the current function.
    pub(crate) fn add_def(&mut self, def: Rc<FuncDef>) -> Result<u16, CompileError> {
        let function = self.function_scope_index();
        let index = self.scopes[function].defs.len();
        if index >= u16::MAX as usize {
            return Err(self.error("too many nested function definitions"));
        }
        self.scopes[function].defs.push(def);
        Ok(index as u16)
    }

    // ------------------------------------------------------------------
    // Slot materialization
    // ------------------------------------------------------------------

    /// Load a literal into a register, specializing the small cases.
    pub(crate) fn emit_load_literal(&mut self, value: &Value, dest: u8) -> Result<(), CompileError> {
        match value {
            Value::Nil => {
                self.emit(Instr::a(Opcode::LoadNil, dest));
            }
            Value::Boolean(true) => {
                self.emit(Instr::a(Opcode::LoadTrue, dest));
            }
            Value::Boolean(false) => {
                self.emit(Instr::a(Opcode::LoadFalse, dest));
            }
            Value::Integer(i) if i16::try_from(*i).is_ok() => {
                self.emit(Instr::asx(Opcode::LoadInteger, dest, *i as i16));
            }
            _ => {
                let index = self.add_constant(value.clone())?;
                self.emit(Instr::aux(Opcode::LoadConstant, dest, index));
            }
        }
        Ok(())
    }

    fn upvalue_operands(&self, slot: &Slot) -> Result<(u8, u8), CompileError> {
        let env = u8::try_from(slot.envindex)
            .map_err(|_| self.error("too many captured environments"))?;
        let index = u8::try_from(slot.index)
            .map_err(|_| self.error("captured binding lives in a far register"))?;
        Ok((env, index))
    }

    /// Make a slot readable from a near register. Returns the register and
    /// whether it is a temporary the caller must free.
    pub(crate) fn read_slot(&mut self, slot: &Slot) -> Result<(u8, bool), CompileError> {
        if slot.is_ref() {
            let dest = self.alloc_near()?;
            let cell = if slot.is_constant() {
                let backing = slot.constant.clone().expect("ref slot without backing cell");
                self.emit_load_literal(&backing, dest)?;
                dest
            } else if slot.envindex >= 0 {
                let (env, index) = self.upvalue_operands(slot)?;
                self.emit(Instr::abc(Opcode::LoadUpvalue, dest, env, index));
                dest
            } else if slot.index > u8::MAX as i32 {
                self.emit(Instr::aux(Opcode::MoveNear, dest, slot.index as u16));
                dest
            } else {
                slot.index as u8
            };
            self.emit(Instr::abc(Opcode::GetIndex, dest, cell, 0));
            return Ok((dest, true));
        }
        if let Some(value) = slot.as_literal() {
            let value = value.clone();
            let dest = self.alloc_near()?;
            self.emit_load_literal(&value, dest)?;
            return Ok((dest, true));
        }
        if slot.envindex >= 0 {
            let dest = self.alloc_near()?;
            let (env, index) = self.upvalue_operands(slot)?;
            self.emit(Instr::abc(Opcode::LoadUpvalue, dest, env, index));
            return Ok((dest, true));
        }
        if slot.index > u8::MAX as i32 {
            let dest = self.alloc_near()?;
            self.emit(Instr::aux(Opcode::MoveNear, dest, slot.index as u16));
            return Ok((dest, true));
        }
        debug_assert!(slot.index >= 0, "reading an empty slot");
        Ok((slot.index as u8, false))
    }

    /// Materialize a slot's value into a specific near register.
    pub(crate) fn move_to_register(&mut self, slot: &Slot, dest: u8) -> Result<(), CompileError> {
        if slot.is_ref() {
            let cell = if slot.is_constant() {
                let backing = slot.constant.clone().expect("ref slot without backing cell");
                self.emit_load_literal(&backing, dest)?;
                dest
            } else if slot.envindex >= 0 {
                let (env, index) = self.upvalue_operands(slot)?;
                self.emit(Instr::abc(Opcode::LoadUpvalue, dest, env, index));
                dest
            } else if slot.index > u8::MAX as i32 {
                self.emit(Instr::aux(Opcode::MoveNear, dest, slot.index as u16));
                dest
            } else {
                slot.index as u8
            };
            self.emit(Instr::abc(Opcode::GetIndex, dest, cell, 0));
            return Ok(());
        }
        if let Some(value) = slot.as_literal() {
            let value = value.clone();
            return self.emit_load_literal(&value, dest);
        }
        if slot.envindex >= 0 {
            let (env, index) = self.upvalue_operands(slot)?;
            self.emit(Instr::abc(Opcode::LoadUpvalue, dest, env, index));
            return Ok(());
        }
        if slot.index > u8::MAX as i32 {
            self.emit(Instr::aux(Opcode::MoveNear, dest, slot.index as u16));
            return Ok(());
        }
        if slot.index >= 0 && slot.index != dest as i32 {
            self.emit(Instr::aux(Opcode::MoveNear, dest, slot.index as u16));
        }
        Ok(())
    }

    /// Store a near register into a writable slot.
    pub(crate) fn write_slot(&mut self, slot: &Slot, src: u8) -> Result<(), CompileError> {
        if slot.is_ref() {
            let (cell, temp) = if slot.is_constant() {
                let backing = slot.constant.clone().expect("ref slot without backing cell");
                let t = self.alloc_near()?;
                self.emit_load_literal(&backing, t)?;
                (t, true)
            } else if slot.envindex >= 0 {
                let (env, index) = self.upvalue_operands(slot)?;
                let t = self.alloc_near()?;
                self.emit(Instr::abc(Opcode::LoadUpvalue, t, env, index));
                (t, true)
            } else if slot.index > u8::MAX as i32 {
                let t = self.alloc_near()?;
                self.emit(Instr::aux(Opcode::MoveNear, t, slot.index as u16));
                (t, true)
            } else {
                (slot.index as u8, false)
            };
            self.emit(Instr::abc(Opcode::PutIndex, cell, src, 0));
            if temp {
                self.free_register(cell as u32);
            }
            return Ok(());
        }
        if slot.envindex >= 0 {
            let (env, index) = self.upvalue_operands(slot)?;
            self.emit(Instr::abc(Opcode::SetUpvalue, src, env, index));
            return Ok(());
        }
        if slot.index > u8::MAX as i32 {
            self.emit(Instr::aux(Opcode::MoveFar, src, slot.index as u16));
            return Ok(());
        }
        if slot.index >= 0 {
            if slot.index != src as i32 {
                self.emit(Instr::aux(Opcode::MoveNear, slot.index as u8, src as u16));
            }
            return Ok(());
        }
        Err(self.error("cannot write to this slot"))
    }

    /// Emit a return of the slot's value.
    pub(crate) fn emit_return(&mut self, slot: &Slot) -> Result<(), CompileError> {
        if slot.is_returned() {
            return Ok(());
        }
        if let Some(Value::Nil) = slot.as_literal() {
            self.emit(Instr::op(Opcode::ReturnNil));
            return Ok(());
        }
        let (reg, temp) = self.read_slot(slot)?;
        self.emit(Instr::a(Opcode::Return, reg));
        if temp {
            self.free_register(reg as u32);
        }
        Ok(())
    }

    /// Apply the tail/hint contract to a computed slot.
    ///
    /// Tail position turns the slot into a return and yields the returned
    /// sentinel. A near-register hint moves the value there; slots already
    /// in the hinted register pass through untouched.
    pub(crate) fn finish_slot(
        &mut self,
        slot: Slot,
        fopts: FormOptions,
    ) -> Result<Slot, CompileError> {
        if fopts.tail {
            if slot.is_returned() {
                return Ok(slot);
            }
            self.emit_return(&slot)?;
            self.free_slot(&slot);
            return Ok(Slot::returned());
        }
        if let Some(hint) = fopts.hint {
            let already_there = !slot.is_constant()
                && !slot.is_ref()
                && slot.envindex < 0
                && slot.index == hint as i32;
            if already_there {
                return Ok(slot);
            }
            self.move_to_register(&slot, hint)?;
            self.free_slot(&slot);
            return Ok(Slot::register(hint as u32));
        }
        Ok(slot)
    }

    // ------------------------------------------------------------------
    // Jumps
    // ------------------------------------------------------------------

    /// Emit an unconditional jump to be patched later.
    pub(crate) fn emit_jump_placeholder(&mut self) -> usize {
        self.emit(Instr::jump(Opcode::Jump, 0))
    }

    /// Emit a conditional branch to be patched later.
    pub(crate) fn emit_branch_placeholder(&mut self, op: Opcode, reg: u8) -> usize {
        self.emit(Instr::asx(op, reg, 0))
    }

    /// Point a previously emitted jump at the next instruction.
    pub(crate) fn patch_to_here(&mut self, at: usize) -> Result<(), CompileError> {
        let offset = self.here() as i64 - at as i64;
        let instr = self.bytecode[at];
        let patched = match instr.opcode() {
            Some(Opcode::Jump) => {
                if !(-(1i64 << 23)..(1i64 << 23)).contains(&offset) {
                    return Err(self.error("jump distance too large"));
                }
                instr.with_jump(offset as i32)
            }
            Some(Opcode::JumpIf) | Some(Opcode::JumpIfNot) => {
                if i16::try_from(offset).is_err() {
                    return Err(self.error("jump distance too large"));
                }
                instr.with_s(offset as i16)
            }
            _ => return Err(self.error("internal: patching a non-jump instruction")),
        };
        self.bytecode[at] = patched;
        Ok(())
    }

    /// Emit a backwards jump to an already-known target.
    pub(crate) fn emit_jump_back(&mut self, target: usize) -> Result<(), CompileError> {
        let offset = target as i64 - self.here() as i64;
        if !(-(1i64 << 23)..(1i64 << 23)).contains(&offset) {
            return Err(self.error("jump distance too large"));
        }
        self.emit(Instr::jump(Opcode::Jump, offset as i32));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Function finalization
    // ------------------------------------------------------------------

    /// Pop the innermost function scope and seal it into a funcdef.
    ///
    /// Bytecode and source mappings are compacted out of the shared buffers,
    /// unset mappings inherit their predecessor, growable pools flatten to
    /// fixed arrays, and the slot count comes from the allocator's
    /// high-water mark.
    pub(crate) fn finish_function_scope(
        &mut self,
        arity: u32,
        vararg: bool,
    ) -> Result<Rc<FuncDef>, CompileError> {
        let scope = self.scopes.pop().expect("scope stack underflow");
        debug_assert!(scope.is_function(), "finalizing a non-function scope");

        let bytecode = self.bytecode.split_off(scope.bytecode_start);
        let mut sourcemap = self.mapbuffer.split_off(scope.bytecode_start);
        for i in 1..sourcemap.len() {
            if !sourcemap[i].is_set() {
                sourcemap[i] = sourcemap[i - 1];
            }
        }

        let mut flags = 0u32;
        if vararg {
            flags |= FLAG_VARARG;
        }
        if scope.flags & SCOPE_ENV_CAPTURED != 0 {
            flags |= FLAG_NEEDS_ENV;
        }
        let environments: Vec<i32> = scope
            .envs
            .iter()
            .map(|e| match e {
                EnvRef::Own => -1,
                EnvRef::Parent(index) => *index as i32,
            })
            .collect();
        let constants: Vec<Value> = scope.constants.into_keys().collect();
        let slot_count = scope
            .alloc
            .high_water()
            .max(arity + u32::from(vararg))
            .max(1);

        trace!(
            "finish function {:?}: {} words, {} constants, {} defs, {} envs, {} slots",
            scope.name.as_ref().map(|s| s.as_str()),
            bytecode.len(),
            constants.len(),
            scope.defs.len(),
            environments.len(),
            slot_count
        );

        let builder = FuncDefBuilder {
            bytecode,
            constants,
            defs: scope.defs,
            environments,
            flags,
            arity,
            slot_count,
            name: scope.name,
            source: self.source_name.clone(),
            sourcemap,
        };
        builder.finish().map_err(|e| self.error(e.to_string()))
    }
}
