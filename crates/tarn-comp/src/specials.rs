//! Special-form handlers.
//!
//! Specials are the closed set of constructs with compiler-built-in
//! semantics. They bypass macro expansion, manage their own scopes, and are
//! the only code that emits branch and upvalue instructions directly.

use tarn_core::{Instr, Opcode, Symbol, Value};

use crate::error::CompileError;
use crate::scope::{SCOPE_ENV_CAPTURED, SCOPE_UNUSED};
use crate::slot::{Slot, SLOT_MUTABLE, SLOT_NAMED, SLOT_REF};
use crate::{Compilation, FormOptions, LoopFrame};

pub(crate) type SpecialFn =
    fn(&mut Compilation, &[Value], FormOptions) -> Result<Slot, CompileError>;

/// Look up a special form by name. The set is closed and not shadowable.
pub(crate) fn special_for(name: &str) -> Option<SpecialFn> {
    Some(match name {
        "def" => special_def,
        "var" => special_var,
        "set" => special_set,
        "if" => special_if,
        "do" => special_do,
        "while" => special_while,
        "fn" => special_fn,
        "quote" => special_quote,
        "quasiquote" => special_quasiquote,
        "unquote" => special_unquote,
        "splice" => special_splice,
        "break" => special_break,
        _ => return None,
    })
}

fn expect_symbol<'v>(
    cc: &Compilation,
    value: &'v Value,
    what: &str,
) -> Result<&'v Symbol, CompileError> {
    value
        .as_symbol()
        .ok_or_else(|| cc.error(format!("expected symbol in {}", what)))
}

fn check_arity(
    cc: &Compilation,
    name: &str,
    args: &[Value],
    min: usize,
    max: usize,
) -> Result<(), CompileError> {
    if args.len() < min || args.len() > max {
        return Err(cc.error(format!(
            "{} expects {} to {} arguments, got {}",
            name,
            min,
            max,
            args.len()
        )));
    }
    Ok(())
}

/// `(def name value)` - bind immutably in the current scope.
///
/// Constant values bind as constant slots with no code emitted; everything
/// else lands in a dedicated named register.
fn special_def(
    cc: &mut Compilation,
    args: &[Value],
    fopts: FormOptions,
) -> Result<Slot, CompileError> {
    check_arity(cc, "def", args, 2, 2)?;
    let name = expect_symbol(cc, &args[0], "def")?.clone();
    let value = cc.compile_form(&args[1], FormOptions::value())?;
    let bound = if value.as_literal().is_some() {
        value.with_flags(SLOT_NAMED)
    } else if value.envindex < 0 && value.index >= 0 && !value.is_named() && !value.is_ref() {
        // Take ownership of the freshly computed temporary.
        value.with_flags(SLOT_NAMED)
    } else {
        // Aliases of other bindings, upvalues, and refs copy into their own
        // register so the binding has a stable home.
        let dest = cc.alloc_near()?;
        cc.move_to_register(&value, dest)?;
        cc.free_slot(&value);
        Slot::register(dest as u32).with_flags(SLOT_NAMED)
    };
    cc.bind(name, bound.clone());
    cc.finish_slot(bound, fopts)
}

/// `(var name value)` - bind mutably through a one-element backing array.
fn special_var(
    cc: &mut Compilation,
    args: &[Value],
    fopts: FormOptions,
) -> Result<Slot, CompileError> {
    check_arity(cc, "var", args, 2, 2)?;
    let name = expect_symbol(cc, &args[0], "var")?.clone();
    let value = cc.compile_form(&args[1], FormOptions::value())?;
    let (vreg, vtemp) = cc.read_slot(&value)?;
    cc.emit(Instr::a(Opcode::Push, vreg));
    if vtemp {
        cc.free_register(vreg as u32);
    }
    cc.free_slot(&value);

    let cell = cc.alloc_register();
    if cell > u8::MAX as u32 {
        let near = cc.alloc_near()?;
        cc.emit(Instr::a(Opcode::MakeArray, near));
        cc.emit(Instr::aux(Opcode::MoveFar, near, cell as u16));
        cc.free_register(near as u32);
    } else {
        cc.emit(Instr::a(Opcode::MakeArray, cell as u8));
    }
    let slot = Slot {
        flags: SLOT_REF | SLOT_MUTABLE | SLOT_NAMED,
        index: cell as i32,
        envindex: -1,
        constant: None,
    };
    cc.bind(name, slot.clone());
    cc.finish_slot(slot, fopts)
}

/// `(set target value)` - assign to a var or an indexed place.
fn special_set(
    cc: &mut Compilation,
    args: &[Value],
    fopts: FormOptions,
) -> Result<Slot, CompileError> {
    check_arity(cc, "set", args, 2, 2)?;
    match &args[0] {
        Value::Symbol(sym) => {
            let target = cc.compile_symbol(sym)?;
            if !target.is_ref() {
                let message = if target.is_constant() {
                    format!("cannot set constant {}", sym)
                } else {
                    format!("cannot set immutable binding {}", sym)
                };
                return Err(cc.error(message));
            }
            let value = cc.compile_form(&args[1], FormOptions::value())?;
            let (vreg, vtemp) = cc.read_slot(&value)?;
            cc.write_slot(&target, vreg)?;
            if vtemp {
                cc.free_register(vreg as u32);
            }
            cc.finish_slot(value, fopts)
        }
        Value::Tuple(place) if place.len() == 2 => {
            let container = cc.compile_form(&place.as_slice()[0], FormOptions::value())?;
            let key = cc.compile_form(&place.as_slice()[1], FormOptions::value())?;
            let value = cc.compile_form(&args[1], FormOptions::value())?;
            let (creg, ctemp) = cc.read_slot(&container)?;
            let (kreg, ktemp) = cc.read_slot(&key)?;
            let (vreg, vtemp) = cc.read_slot(&value)?;
            cc.emit(Instr::abc(Opcode::Put, creg, kreg, vreg));
            if ctemp {
                cc.free_register(creg as u32);
            }
            if ktemp {
                cc.free_register(kreg as u32);
            }
            if vtemp {
                cc.free_register(vreg as u32);
            }
            cc.free_slot(&container);
            cc.free_slot(&key);
            cc.finish_slot(value, fopts)
        }
        _ => Err(cc.error("invalid set target")),
    }
}

/// `(if cond then else?)` - short-circuit branch, nil when else is omitted.
///
/// A condition that compiles to a constant selects its branch at compile
/// time; the dead branch is still compiled for errors, inside an unused
/// scope, and its code is discarded.
fn special_if(
    cc: &mut Compilation,
    args: &[Value],
    fopts: FormOptions,
) -> Result<Slot, CompileError> {
    check_arity(cc, "if", args, 2, 3)?;
    let cond = cc.compile_form(&args[0], FormOptions::value())?;

    if let Some(literal) = cond.as_literal() {
        let truthy = literal.is_truthy();
        return compile_known_branch(cc, args, fopts, truthy);
    }

    let (creg, ctemp) = cc.read_slot(&cond)?;
    let to_else = cc.emit_branch_placeholder(Opcode::JumpIfNot, creg);
    if ctemp {
        cc.free_register(creg as u32);
    }
    cc.free_slot(&cond);

    if fopts.tail {
        cc.push_scope();
        cc.compile_form(&args[1], FormOptions::tail())?;
        cc.pop_scope();
        cc.patch_to_here(to_else)?;
        cc.push_scope();
        match args.get(2) {
            Some(alt) => {
                cc.compile_form(alt, FormOptions::tail())?;
            }
            None => {
                cc.emit(Instr::op(Opcode::ReturnNil));
            }
        }
        cc.pop_scope();
        return Ok(Slot::returned());
    }

    let dest = match fopts.hint {
        Some(h) => h,
        None => cc.alloc_near()?,
    };
    cc.push_scope();
    cc.compile_form(&args[1], FormOptions::hinted(dest))?;
    cc.pop_scope();
    let to_end = cc.emit_jump_placeholder();
    cc.patch_to_here(to_else)?;
    cc.push_scope();
    match args.get(2) {
        Some(alt) => {
            cc.compile_form(alt, FormOptions::hinted(dest))?;
        }
        None => {
            cc.emit(Instr::a(Opcode::LoadNil, dest));
        }
    }
    cc.pop_scope();
    cc.patch_to_here(to_end)?;
    Ok(Slot::register(dest as u32))
}

/// `if` with a compile-time-known condition: only the taken branch emits
/// code. The dead branch compiles inside an unused scope so its errors
/// still surface, and references out of it never record captures.
fn compile_known_branch(
    cc: &mut Compilation,
    args: &[Value],
    fopts: FormOptions,
    truthy: bool,
) -> Result<Slot, CompileError> {
    let dead = if truthy { args.get(2) } else { Some(&args[1]) };
    if let Some(form) = dead {
        let mark = cc.here();
        cc.push_scope();
        cc.scopes.last_mut().expect("scope stack underflow").flags |= SCOPE_UNUSED;
        let slot = cc.compile_form(form, FormOptions::value())?;
        cc.free_slot(&slot);
        cc.pop_scope();
        cc.bytecode.truncate(mark);
        cc.mapbuffer.truncate(mark);
    }

    let live = if truthy { Some(&args[1]) } else { args.get(2) };
    if fopts.tail {
        cc.push_scope();
        match live {
            Some(form) => {
                cc.compile_form(form, FormOptions::tail())?;
            }
            None => {
                cc.emit(Instr::op(Opcode::ReturnNil));
            }
        }
        cc.pop_scope();
        return Ok(Slot::returned());
    }
    let dest = match fopts.hint {
        Some(h) => h,
        None => cc.alloc_near()?,
    };
    cc.push_scope();
    match live {
        Some(form) => {
            cc.compile_form(form, FormOptions::hinted(dest))?;
        }
        None => {
            cc.emit(Instr::a(Opcode::LoadNil, dest));
        }
    }
    cc.pop_scope();
    Ok(Slot::register(dest as u32))
}

/// `(do expr...)` - sequence; the value is the last expression's.
fn special_do(
    cc: &mut Compilation,
    args: &[Value],
    fopts: FormOptions,
) -> Result<Slot, CompileError> {
    if args.is_empty() {
        return cc.finish_slot(Slot::nil(), fopts);
    }
    if fopts.tail {
        cc.push_scope();
        for form in &args[..args.len() - 1] {
            let slot = cc.compile_form(form, FormOptions::value())?;
            cc.free_slot(&slot);
        }
        cc.compile_form(&args[args.len() - 1], FormOptions::tail())?;
        cc.pop_scope();
        return Ok(Slot::returned());
    }
    let dest = match fopts.hint {
        Some(h) => h,
        None => cc.alloc_near()?,
    };
    cc.push_scope();
    for form in &args[..args.len() - 1] {
        let slot = cc.compile_form(form, FormOptions::value())?;
        cc.free_slot(&slot);
    }
    cc.compile_form(&args[args.len() - 1], FormOptions::hinted(dest))?;
    cc.pop_scope();
    Ok(Slot::register(dest as u32))
}

/// `(while cond body...)` - loop evaluating to nil.
///
/// A body that closes over loop state cannot run on raw back-jumps (the
/// captured frame must be fresh per iteration), so the loop is rolled back
/// and re-emitted as a self-recursive nested function called once.
fn special_while(
    cc: &mut Compilation,
    args: &[Value],
    fopts: FormOptions,
) -> Result<Slot, CompileError> {
    if args.is_empty() {
        return Err(cc.error("while expects a condition"));
    }
    let start = cc.here();
    let function = cc.function_scope_index();
    let captured_before = cc.scopes[function].flags & SCOPE_ENV_CAPTURED != 0;

    let cond = cc.compile_form(&args[0], FormOptions::value())?;
    let (creg, ctemp) = cc.read_slot(&cond)?;
    let to_exit = cc.emit_branch_placeholder(Opcode::JumpIfNot, creg);
    if ctemp {
        cc.free_register(creg as u32);
    }
    cc.free_slot(&cond);

    cc.loops.push(LoopFrame::default());
    cc.push_scope();
    let mut body_error = None;
    for form in &args[1..] {
        match cc.compile_form(form, FormOptions::value()) {
            Ok(slot) => cc.free_slot(&slot),
            Err(err) => {
                body_error = Some(err);
                break;
            }
        }
    }
    cc.pop_scope();
    if let Some(err) = body_error {
        cc.loops.pop();
        return Err(err);
    }

    let captured_now = cc.scopes[function].flags & SCOPE_ENV_CAPTURED != 0;
    if captured_now && !captured_before {
        cc.loops.pop();
        cc.bytecode.truncate(start);
        cc.mapbuffer.truncate(start);
        return compile_while_closure(cc, args, fopts);
    }

    cc.emit_jump_back(start)?;
    cc.patch_to_here(to_exit)?;
    let frame = cc.loops.pop().expect("loop frame");
    for jump in frame.breaks {
        cc.patch_to_here(jump)?;
    }
    cc.finish_slot(Slot::nil(), fopts)
}

/// The capture-safe rendition of `while`: a nested function whose body ends
/// in a self tail call, closed over once and invoked immediately.
fn compile_while_closure(
    cc: &mut Compilation,
    args: &[Value],
    fopts: FormOptions,
) -> Result<Slot, CompileError> {
    cc.push_function_scope(0, None);
    cc.loops.push(LoopFrame::default());

    let cond = cc.compile_form(&args[0], FormOptions::value())?;
    let (creg, ctemp) = cc.read_slot(&cond)?;
    let to_exit = cc.emit_branch_placeholder(Opcode::JumpIfNot, creg);
    if ctemp {
        cc.free_register(creg as u32);
    }
    cc.free_slot(&cond);

    cc.push_scope();
    for form in &args[1..] {
        let slot = cc.compile_form(form, FormOptions::value())?;
        cc.free_slot(&slot);
    }
    cc.pop_scope();

    let selfreg = cc.alloc_near()?;
    cc.emit(Instr::a(Opcode::LoadSelf, selfreg));
    cc.emit(Instr::a(Opcode::TailCall, selfreg));
    cc.free_register(selfreg as u32);

    cc.patch_to_here(to_exit)?;
    let frame = cc.loops.pop().expect("loop frame");
    for jump in frame.breaks {
        cc.patch_to_here(jump)?;
    }
    cc.emit(Instr::op(Opcode::ReturnNil));

    let def = cc.finish_function_scope(0, false)?;
    let def_index = cc.add_def(def)?;
    let dest = match fopts.hint {
        Some(h) => h,
        None => cc.alloc_near()?,
    };
    cc.emit(Instr::aux(Opcode::Closure, dest, def_index));
    cc.emit(Instr::ab(Opcode::Call, dest, dest));
    cc.finish_slot(Slot::register(dest as u32), FormOptions { tail: fopts.tail, hint: None })
}

/// `(break value?)` - jump out of the innermost loop.
fn special_break(
    cc: &mut Compilation,
    args: &[Value],
    fopts: FormOptions,
) -> Result<Slot, CompileError> {
    check_arity(cc, "break", args, 0, 1)?;
    if let Some(form) = args.first() {
        let slot = cc.compile_form(form, FormOptions::value())?;
        cc.free_slot(&slot);
    }
    if cc.loops.is_empty() {
        return Err(cc.error("break outside loop"));
    }
    let jump = cc.emit_jump_placeholder();
    cc.loops.last_mut().expect("loop frame").breaks.push(jump);
    cc.finish_slot(Slot::nil(), fopts)
}

/// `(quote x)` - the literal value.
fn special_quote(
    cc: &mut Compilation,
    args: &[Value],
    fopts: FormOptions,
) -> Result<Slot, CompileError> {
    check_arity(cc, "quote", args, 1, 1)?;
    cc.finish_slot(Slot::constant(args[0].clone()), fopts)
}

/// `(quasiquote x)` - template construction with unquote/splice holes.
fn special_quasiquote(
    cc: &mut Compilation,
    args: &[Value],
    fopts: FormOptions,
) -> Result<Slot, CompileError> {
    check_arity(cc, "quasiquote", args, 1, 1)?;
    let slot = quasiquote(cc, &args[0], 0)?;
    cc.finish_slot(slot, fopts)
}

fn special_unquote(
    cc: &mut Compilation,
    _args: &[Value],
    _fopts: FormOptions,
) -> Result<Slot, CompileError> {
    Err(cc.error("unquote outside quasiquote"))
}

fn special_splice(
    cc: &mut Compilation,
    _args: &[Value],
    _fopts: FormOptions,
) -> Result<Slot, CompileError> {
    Err(cc.error("splice outside quasiquote"))
}

/// Is `form` a 2-tuple `(tag x)` for the given tag symbol?
fn tagged<'v>(form: &'v Value, tag: &str) -> Option<&'v Value> {
    let t = form.as_tuple()?;
    if t.len() != 2 {
        return None;
    }
    match t.head() {
        Some(Value::Symbol(sym)) if sym.as_str() == tag => Some(&t.as_slice()[1]),
        _ => None,
    }
}

/// Does the template need runtime construction at this depth?
fn needs_construction(form: &Value, depth: u32) -> bool {
    if let Some(inner) = tagged(form, "unquote") {
        return depth == 0 || needs_construction(inner, depth - 1);
    }
    if let Some(inner) = tagged(form, "quasiquote") {
        return needs_construction(inner, depth + 1);
    }
    if tagged(form, "splice").is_some() && depth == 0 {
        return true;
    }
    match form {
        Value::Tuple(t) => t.iter().any(|e| needs_construction(e, depth)),
        Value::Array(a) => a.borrow().iter().any(|e| needs_construction(e, depth)),
        Value::Struct(s) => s
            .entries()
            .any(|(k, v)| needs_construction(k, depth) || needs_construction(v, depth)),
        Value::Table(t) => t
            .borrow()
            .iter()
            .any(|(k, v)| needs_construction(k, depth) || needs_construction(v, depth)),
        _ => false,
    }
}

fn quasiquote(cc: &mut Compilation, form: &Value, depth: u32) -> Result<Slot, CompileError> {
    if !needs_construction(form, depth) {
        return Ok(Slot::constant(form.clone()));
    }
    if let Some(inner) = tagged(form, "unquote") {
        if depth == 0 {
            return cc.compile_form(inner, FormOptions::value());
        }
        let head = form.as_tuple().expect("tagged tuple").as_slice()[0].clone();
        return quasiquote_pair(cc, head, inner, depth - 1);
    }
    if let Some(inner) = tagged(form, "quasiquote") {
        let head = form.as_tuple().expect("tagged tuple").as_slice()[0].clone();
        return quasiquote_pair(cc, head, inner, depth + 1);
    }
    if tagged(form, "splice").is_some() && depth == 0 {
        return Err(cc.error("splice can only occur inside a collection"));
    }
    match form {
        Value::Tuple(t) => quasiquote_sequence(cc, t.as_slice(), Opcode::MakeTuple, depth),
        Value::Array(a) => {
            let elements = a.borrow().clone();
            quasiquote_sequence(cc, &elements, Opcode::MakeArray, depth)
        }
        Value::Struct(s) => {
            let elements: Vec<Value> = s
                .entries()
                .flat_map(|(k, v)| [k.clone(), v.clone()])
                .collect();
            quasiquote_pairs(cc, &elements, Opcode::MakeStruct, depth)
        }
        Value::Table(t) => {
            let elements: Vec<Value> = t
                .borrow()
                .iter()
                .flat_map(|(k, v)| [k.clone(), v.clone()])
                .collect();
            quasiquote_pairs(cc, &elements, Opcode::MakeTable, depth)
        }
        _ => Ok(Slot::constant(form.clone())),
    }
}

/// Rebuild `(tag inner)` with the template compiled at an adjusted depth.
fn quasiquote_pair(
    cc: &mut Compilation,
    head: Value,
    inner: &Value,
    depth: u32,
) -> Result<Slot, CompileError> {
    let inner_slot = quasiquote(cc, inner, depth)?;
    let (hreg, htemp) = {
        let head_slot = Slot::constant(head);
        cc.read_slot(&head_slot)?
    };
    let (ireg, itemp) = cc.read_slot(&inner_slot)?;
    cc.emit(Instr::ab(Opcode::Push2, hreg, ireg));
    if htemp {
        cc.free_register(hreg as u32);
    }
    if itemp {
        cc.free_register(ireg as u32);
    }
    cc.free_slot(&inner_slot);
    let dest = cc.alloc_near()?;
    cc.emit(Instr::a(Opcode::MakeTuple, dest));
    Ok(Slot::register(dest as u32))
}

/// Build a tuple or array template, honoring `(splice x)` elements.
fn quasiquote_sequence(
    cc: &mut Compilation,
    elements: &[Value],
    opcode: Opcode,
    depth: u32,
) -> Result<Slot, CompileError> {
    let mut pending: Vec<(u8, bool)> = Vec::new();
    for element in elements {
        if depth == 0 {
            if let Some(spliced) = tagged(element, "splice") {
                // Flush grouped pushes, then push the spliced sequence.
                flush_pushes(cc, &mut pending);
                let slot = cc.compile_form(spliced, FormOptions::value())?;
                let (reg, temp) = cc.read_slot(&slot)?;
                cc.emit(Instr::a(Opcode::PushArray, reg));
                if temp {
                    cc.free_register(reg as u32);
                }
                cc.free_slot(&slot);
                continue;
            }
        }
        let slot = quasiquote(cc, element, depth)?;
        let (reg, temp) = cc.read_slot(&slot)?;
        // Unnamed slot registers behave like temps here; they are all
        // released right after the grouped push.
        pending.push((reg, temp || (!slot.is_named() && slot.index >= 0 && slot.envindex < 0)));
    }
    flush_pushes(cc, &mut pending);
    let dest = cc.alloc_near()?;
    cc.emit(Instr::a(opcode, dest));
    Ok(Slot::register(dest as u32))
}

/// Build a struct or table template from alternating key/value slots.
fn quasiquote_pairs(
    cc: &mut Compilation,
    elements: &[Value],
    opcode: Opcode,
    depth: u32,
) -> Result<Slot, CompileError> {
    let mut pending: Vec<(u8, bool)> = Vec::new();
    for element in elements {
        let slot = quasiquote(cc, element, depth)?;
        let (reg, temp) = cc.read_slot(&slot)?;
        pending.push((reg, temp || (!slot.is_named() && slot.index >= 0 && slot.envindex < 0)));
    }
    flush_pushes(cc, &mut pending);
    let dest = cc.alloc_near()?;
    cc.emit(Instr::a(opcode, dest));
    Ok(Slot::register(dest as u32))
}

fn flush_pushes(cc: &mut Compilation, pending: &mut Vec<(u8, bool)>) {
    if pending.is_empty() {
        return;
    }
    cc.push_registers(pending);
    for (reg, free) in pending.drain(..) {
        if free {
            cc.free_register(reg as u32);
        }
    }
}

/// `(fn name? [params...] body...)` - a function literal.
///
/// `&` introduces a variadic rest parameter. An optional leading symbol
/// names the function and binds it inside its own body for self-recursion.
fn special_fn(
    cc: &mut Compilation,
    args: &[Value],
    fopts: FormOptions,
) -> Result<Slot, CompileError> {
    let mut index = 0;
    let name = match args.first() {
        Some(Value::Symbol(sym)) => {
            index = 1;
            Some(sym.clone())
        }
        _ => None,
    };
    let params = match args.get(index) {
        Some(Value::Tuple(t)) => t.as_slice().to_vec(),
        _ => return Err(cc.error("fn expects a parameter list")),
    };
    let body = &args[index + 1..];

    cc.push_function_scope(0, name.clone());
    // Loops do not cross function boundaries; a break in the body may only
    // target loops opened inside it.
    let saved_loops = std::mem::take(&mut cc.loops);
    let mut arity = 0u32;
    let mut vararg = false;
    let mut p = 0;
    while p < params.len() {
        let param = expect_symbol(cc, &params[p], "fn parameter list")?.clone();
        if param.as_str() == "&" {
            if p + 2 != params.len() {
                return Err(cc.error("expected one parameter after &"));
            }
            let rest = expect_symbol(cc, &params[p + 1], "fn parameter list")?.clone();
            let reg = cc.alloc_register();
            cc.bind(rest, Slot::register(reg).with_flags(SLOT_NAMED));
            vararg = true;
            break;
        }
        // Parameters take registers 0..arity in declaration order.
        let reg = cc.alloc_register();
        cc.bind(param, Slot::register(reg).with_flags(SLOT_NAMED));
        arity += 1;
        p += 1;
    }
    if let Some(self_name) = &name {
        let reg = cc.alloc_near()?;
        cc.emit(Instr::a(Opcode::LoadSelf, reg));
        cc.bind(
            self_name.clone(),
            Slot::register(reg as u32).with_flags(SLOT_NAMED),
        );
    }

    if body.is_empty() {
        cc.emit(Instr::op(Opcode::ReturnNil));
    } else {
        for form in &body[..body.len() - 1] {
            let slot = cc.compile_form(form, FormOptions::value())?;
            cc.free_slot(&slot);
        }
        cc.compile_form(&body[body.len() - 1], FormOptions::tail())?;
    }
    cc.loops = saved_loops;

    let def = cc.finish_function_scope(arity, vararg)?;
    let def_index = cc.add_def(def)?;
    let dest = match fopts.hint {
        Some(h) => h,
        None => cc.alloc_near()?,
    };
    cc.emit(Instr::aux(Opcode::Closure, dest, def_index));
    cc.finish_slot(Slot::register(dest as u32), FormOptions { tail: fopts.tail, hint: None })
}
