//! Form dispatch: special forms, macro expansion, and compilation by kind.

use std::rc::Rc;

use log::trace;

use tarn_core::{Instr, Opcode, SourceMapping, Symbol, Tuple, Value};

use crate::env::Binding;
use crate::error::CompileError;
use crate::slot::Slot;
use crate::specials::special_for;
use crate::{Compilation, FormOptions};

impl Compilation<'_> {
    /// Compile one form, bounded by the recursion limit.
    pub(crate) fn compile_form(
        &mut self,
        form: &Value,
        fopts: FormOptions,
    ) -> Result<Slot, CompileError> {
        self.depth += 1;
        if self.depth > self.options.max_recursion_depth {
            self.depth -= 1;
            return Err(self.error("recursed too deeply"));
        }
        let result = self.dispatch_form(form, fopts);
        self.depth -= 1;
        result
    }

    /// Record the source position of positioned forms; everything emitted
    /// afterwards inherits it.
    fn observe_position(&mut self, form: &Value) {
        match form {
            Value::Tuple(t) if t.line() >= 0 => {
                self.mapping = SourceMapping::new(t.line(), t.column());
            }
            Value::Struct(s) if s.line() >= 0 => {
                self.mapping = SourceMapping::new(s.line(), s.column());
            }
            _ => {}
        }
    }

    /// Specials first, then the macro expansion loop, then kind dispatch.
    fn dispatch_form(&mut self, form: &Value, fopts: FormOptions) -> Result<Slot, CompileError> {
        self.observe_position(form);
        let mut current = form.clone();
        let mut expansions = 0u32;
        loop {
            let head = match current.as_tuple().and_then(|t| t.head()) {
                Some(Value::Symbol(sym)) => sym.clone(),
                _ => break,
            };
            // Lexical bindings shadow macros; specials are not shadowable.
            if let Some(handler) = special_for(head.as_str()) {
                let args: Vec<Value> =
                    current.as_tuple().expect("tuple head").tail().to_vec();
                return handler(self, &args, fopts);
            }
            if self.scope_has(&head) {
                break;
            }
            let mac = match self.env.resolve(&head) {
                Some(Binding::Macro(m)) => m.clone(),
                _ => break,
            };
            if expansions >= self.options.max_macro_expansions {
                return Err(self.error("recursed too deeply in macro expansion"));
            }
            let args: Vec<Value> = current.as_tuple().expect("tuple head").tail().to_vec();
            trace!("expand macro {} (round {})", head, expansions + 1);
            match self.host.call(&mac, &args) {
                Ok(replacement) => {
                    current = replacement;
                    self.observe_position(&current);
                    expansions += 1;
                }
                Err(err) => {
                    return Err(CompileError::new(
                        err.message,
                        self.mapping.line,
                        self.mapping.column,
                    )
                    .with_fiber(err.fiber));
                }
            }
        }
        self.compile_by_kind(&current, fopts)
    }

    fn compile_by_kind(&mut self, form: &Value, fopts: FormOptions) -> Result<Slot, CompileError> {
        match form {
            Value::Tuple(t) if t.is_empty() => {
                self.finish_slot(Slot::constant(form.clone()), fopts)
            }
            Value::Tuple(t) => self.compile_call(t, fopts),
            Value::Symbol(sym) => {
                // Colon-prefixed symbols are self-evaluating keyword
                // constants even when they arrive as the symbol kind.
                if sym.as_str().starts_with(':') {
                    return self.finish_slot(Slot::constant(form.clone()), fopts);
                }
                let slot = self.compile_symbol(sym)?;
                self.finish_slot(slot, fopts)
            }
            Value::Keyword(_) => self.finish_slot(Slot::constant(form.clone()), fopts),
            Value::Array(items) => {
                let elements = items.borrow().clone();
                self.compile_constructor(&elements, Opcode::MakeArray, fopts)
            }
            Value::Table(table) => {
                let elements: Vec<Value> = table
                    .borrow()
                    .iter()
                    .flat_map(|(k, v)| [k.clone(), v.clone()])
                    .collect();
                self.compile_constructor(&elements, Opcode::MakeTable, fopts)
            }
            Value::Struct(s) => {
                let elements: Vec<Value> = s
                    .entries()
                    .flat_map(|(k, v)| [k.clone(), v.clone()])
                    .collect();
                self.compile_constructor(&elements, Opcode::MakeStruct, fopts)
            }
            Value::Buffer(buffer) => {
                let contents = Value::string(buffer.borrow().clone());
                self.compile_constructor(&[contents], Opcode::MakeBuffer, fopts)
            }
            _ => self.finish_slot(Slot::constant(form.clone()), fopts),
        }
    }

    /// Resolve a symbol through the scope stack, then the environment.
    pub(crate) fn compile_symbol(&mut self, sym: &Symbol) -> Result<Slot, CompileError> {
        if let Some(slot) = self.resolve_local(sym) {
            return Ok(slot);
        }
        match self.env.resolve(sym) {
            Some(Binding::Def(value)) => Ok(Slot::constant(value.clone())),
            Some(Binding::Var(cell)) => Ok(Slot::reference(Value::Array(Rc::clone(cell)))),
            // A macro referenced outside call position behaves like a def.
            Some(Binding::Macro(function)) => Ok(Slot::constant(function.clone())),
            None => Err(self.error(format!("unknown symbol {}", sym))),
        }
    }

    /// Compile `(callee args...)`: intrinsic specialization when the callee
    /// resolves to a registered constant, otherwise a call or tail call.
    fn compile_call(&mut self, t: &Rc<Tuple>, fopts: FormOptions) -> Result<Slot, CompileError> {
        let callee = self.compile_form(&t.as_slice()[0], FormOptions::value())?;
        let args = t.tail();

        if let Some(constant) = callee.as_literal() {
            if let Some(intrinsic) = self.env.intrinsic_for(constant) {
                if args.len() == 2 {
                    return self.compile_intrinsic(intrinsic.opcode, args, fopts);
                }
            }
        }

        let (creg, ctemp) = self.read_slot(&callee)?;
        self.push_args(args)?;
        if fopts.tail {
            self.emit(Instr::a(Opcode::TailCall, creg));
            if ctemp {
                self.free_register(creg as u32);
            }
            self.free_slot(&callee);
            return Ok(Slot::returned());
        }
        let dest = match fopts.hint {
            Some(h) => h,
            None => self.alloc_near()?,
        };
        self.emit(Instr::ab(Opcode::Call, dest, creg));
        if ctemp {
            self.free_register(creg as u32);
        }
        self.free_slot(&callee);
        Ok(Slot::register(dest as u32))
    }

    fn compile_intrinsic(
        &mut self,
        opcode: Opcode,
        args: &[Value],
        fopts: FormOptions,
    ) -> Result<Slot, CompileError> {
        let left = self.compile_form(&args[0], FormOptions::value())?;
        let right = self.compile_form(&args[1], FormOptions::value())?;
        let (lreg, ltemp) = self.read_slot(&left)?;
        let (rreg, rtemp) = self.read_slot(&right)?;
        let dest = match fopts.hint {
            Some(h) => h,
            None => self.alloc_near()?,
        };
        self.emit(Instr::abc(opcode, dest, lreg, rreg));
        if ltemp {
            self.free_register(lreg as u32);
        }
        if rtemp {
            self.free_register(rreg as u32);
        }
        self.free_slot(&left);
        self.free_slot(&right);
        self.finish_slot(Slot::register(dest as u32), FormOptions { tail: fopts.tail, hint: None })
    }

    /// Compile every argument, then push them in groups of three.
    pub(crate) fn push_args(&mut self, args: &[Value]) -> Result<(), CompileError> {
        let mut slots = Vec::with_capacity(args.len());
        for arg in args {
            slots.push(self.compile_form(arg, FormOptions::value())?);
        }
        let mut regs = Vec::with_capacity(slots.len());
        for slot in &slots {
            regs.push(self.read_slot(slot)?);
        }
        self.push_registers(&regs);
        for ((reg, temp), slot) in regs.iter().zip(&slots) {
            if *temp {
                self.free_register(*reg as u32);
            }
            self.free_slot(slot);
        }
        Ok(())
    }

    /// Emit push/push-2/push-3 for a run of argument registers.
    pub(crate) fn push_registers(&mut self, regs: &[(u8, bool)]) {
        let mut i = 0;
        while i < regs.len() {
            match regs.len() - i {
                1 => {
                    self.emit(Instr::a(Opcode::Push, regs[i].0));
                    i += 1;
                }
                2 => {
                    self.emit(Instr::ab(Opcode::Push2, regs[i].0, regs[i + 1].0));
                    i += 2;
                }
                _ => {
                    self.emit(Instr::abc(
                        Opcode::Push3,
                        regs[i].0,
                        regs[i + 1].0,
                        regs[i + 2].0,
                    ));
                    i += 3;
                }
            }
        }
    }

    /// Evaluate elements in order, push them, and build a container.
    fn compile_constructor(
        &mut self,
        elements: &[Value],
        opcode: Opcode,
        fopts: FormOptions,
    ) -> Result<Slot, CompileError> {
        self.push_args(elements)?;
        let dest = match fopts.hint {
            Some(h) => h,
            None => self.alloc_near()?,
        };
        self.emit(Instr::a(opcode, dest));
        self.finish_slot(Slot::register(dest as u32), FormOptions { tail: fopts.tail, hint: None })
    }
}
