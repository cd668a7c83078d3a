//! End-to-end compilation scenarios.

use std::rc::Rc;

use tarn_comp::{compile, CompileError, Compiler, Environment, FnHost, MacroError, NullHost};
use tarn_core::{CFunction, Context, Fiber, FuncDef, Opcode, Value};
use tarn_read::read_all;

fn read_one(ctx: &Context, source: &str) -> Value {
    let mut values = read_all(ctx.interner(), source.as_bytes()).unwrap();
    assert_eq!(values.len(), 1, "expected one form in {:?}", source);
    values.remove(0)
}

fn cfun(name: &'static str) -> Value {
    fn stub(_args: &[Value]) -> Result<Value, String> {
        Err("compile-time stub".to_string())
    }
    Value::CFunction(Rc::new(CFunction { name, fun: stub }))
}

fn opcodes(def: &FuncDef) -> Vec<Opcode> {
    def.bytecode().iter().map(|i| i.opcode().unwrap()).collect()
}

#[test]
fn call_with_env_def_compiles_to_push_and_tailcall() {
    let ctx = Context::new();
    let mut env = Environment::new();
    let plus = cfun("+");
    env.def(ctx.symbol("+"), plus.clone());

    let form = read_one(&ctx, "(+ 1 2)");
    let def = compile(&form, &env, Some("test"), &mut NullHost).unwrap();

    assert_eq!(def.constants(), &[plus]);
    assert_eq!(
        opcodes(&def),
        vec![
            Opcode::LoadConstant,
            Opcode::LoadInteger,
            Opcode::LoadInteger,
            Opcode::Push2,
            Opcode::TailCall,
        ]
    );
    let code = def.bytecode();
    assert_eq!(code[0].field_a(), 0); // callee in r0
    assert_eq!(code[1].field_s(), 1);
    assert_eq!(code[2].field_s(), 2);
    assert_eq!((code[3].field_a(), code[3].field_b()), (1, 2));
    assert_eq!(code[4].field_a(), 0);
    assert_eq!(def.source(), Some("test"));
}

#[test]
fn nested_fn_captures_one_upvalue_per_hop() {
    let ctx = Context::new();
    let mut env = Environment::new();
    env.def(ctx.symbol("+"), cfun("+"));

    let form = read_one(&ctx, "(fn [x] (fn [y] (+ x y)))");
    let top = compile(&form, &env, None, &mut NullHost).unwrap();

    let outer = &top.defs()[0];
    assert!(outer.needs_env(), "outer frame is captured");
    assert_eq!(outer.arity(), 1);

    let inner = &outer.defs()[0];
    assert_eq!(inner.environments(), &[-1]);
    assert_eq!(inner.arity(), 1);
    // x lives in the outer function's register 0.
    let load = inner
        .bytecode()
        .iter()
        .find(|i| i.opcode() == Some(Opcode::LoadUpvalue))
        .expect("inner loads an upvalue");
    assert_eq!((load.field_b(), load.field_c()), (0, 0));
}

#[test]
fn capture_across_two_function_boundaries_threads_environments() {
    let ctx = Context::new();
    let env = Environment::new();
    let form = read_one(&ctx, "(fn [a] (fn [] (fn [] a)))");
    let top = compile(&form, &env, None, &mut NullHost).unwrap();

    let outer = &top.defs()[0];
    let middle = &outer.defs()[0];
    let innermost = &middle.defs()[0];
    assert!(outer.needs_env());
    assert_eq!(middle.environments(), &[-1]);
    assert_eq!(innermost.environments(), &[0]);
}

#[test]
fn var_set_and_read_go_through_the_backing_cell() {
    let ctx = Context::new();
    let env = Environment::new();
    let form = read_one(&ctx, "(do (var x 1) (set x 2) x)");
    let def = compile(&form, &env, None, &mut NullHost).unwrap();

    let ops = opcodes(&def);
    let make = ops.iter().position(|o| *o == Opcode::MakeArray).unwrap();
    let put = ops.iter().position(|o| *o == Opcode::PutIndex).unwrap();
    let get = ops.iter().position(|o| *o == Opcode::GetIndex).unwrap();
    assert!(make < put && put < get, "cell built, written, then read: {:?}", ops);
}

#[test]
fn environment_vars_read_and_write_through_their_cell() {
    let ctx = Context::new();
    let mut env = Environment::new();
    let cell = env.var(ctx.symbol("counter"), Value::Integer(0));

    let form = read_one(&ctx, "(set counter 9)");
    let def = compile(&form, &env, None, &mut NullHost).unwrap();
    let ops = opcodes(&def);
    assert!(ops.contains(&Opcode::LoadConstant));
    assert!(ops.contains(&Opcode::PutIndex));
    // The backing cell itself is the constant.
    assert_eq!(def.constants(), &[Value::Array(cell)]);
}

#[test]
fn intrinsic_callees_specialize_two_argument_calls() {
    let ctx = Context::new();
    let mut env = Environment::new();
    env.def_intrinsic(ctx.symbol("+"), cfun("+"), Opcode::Add);

    let form = read_one(&ctx, "(+ 1 2)");
    let def = compile(&form, &env, None, &mut NullHost).unwrap();
    assert_eq!(
        opcodes(&def),
        vec![
            Opcode::LoadInteger,
            Opcode::LoadInteger,
            Opcode::Add,
            Opcode::Return,
        ]
    );

    // Other arities still compile as ordinary calls.
    let form = read_one(&ctx, "(+ 1 2 3)");
    let def = compile(&form, &env, None, &mut NullHost).unwrap();
    assert!(opcodes(&def).contains(&Opcode::TailCall));
}

#[test]
fn if_branches_unify_in_one_register() {
    let ctx = Context::new();
    let mut env = Environment::new();
    env.def(ctx.symbol("p"), cfun("p"));
    // Value position: both branches land in one register and jump past
    // each other.
    let form = read_one(&ctx, "(do (if (p) 1 2) nil)");
    let def = compile(&form, &env, None, &mut NullHost).unwrap();
    let ops = opcodes(&def);
    assert!(ops.contains(&Opcode::JumpIfNot));
    assert!(ops.contains(&Opcode::Jump));
}

#[test]
fn if_without_else_falls_through_to_nil() {
    let ctx = Context::new();
    let mut env = Environment::new();
    env.def(ctx.symbol("p"), cfun("p"));
    let form = read_one(&ctx, "(do (if (p) 1) nil)");
    let def = compile(&form, &env, None, &mut NullHost).unwrap();
    assert!(opcodes(&def).contains(&Opcode::LoadNil));
}

#[test]
fn while_loops_jump_backwards() {
    let ctx = Context::new();
    let mut env = Environment::new();
    env.def_intrinsic(ctx.symbol("<"), cfun("<"), Opcode::Less);
    env.def_intrinsic(ctx.symbol("+"), cfun("+"), Opcode::Add);

    let form = read_one(&ctx, "(do (var i 0) (while (< i 10) (set i (+ i 1))) i)");
    let def = compile(&form, &env, None, &mut NullHost).unwrap();
    let back_jump = def
        .bytecode()
        .iter()
        .find(|i| i.opcode() == Some(Opcode::Jump) && i.field_j() < 0)
        .expect("a backwards jump closes the loop");
    assert!(back_jump.field_j() < 0);
    assert!(opcodes(&def).contains(&Opcode::Less));
}

#[test]
fn while_bodies_that_capture_become_self_tail_calling_closures() {
    let ctx = Context::new();
    let mut env = Environment::new();
    env.def_intrinsic(ctx.symbol("<"), cfun("<"), Opcode::Less);
    env.def_intrinsic(ctx.symbol("+"), cfun("+"), Opcode::Add);

    let form = read_one(
        &ctx,
        "(do (var i 0) (while (< i 3) (def f (fn [] i)) (set i (+ i 1))))",
    );
    let def = compile(&form, &env, None, &mut NullHost).unwrap();

    // The loop itself became a nested function ending in a self tail call.
    let loop_def = def
        .defs()
        .iter()
        .find(|d| {
            d.bytecode()
                .iter()
                .any(|i| i.opcode() == Some(Opcode::LoadSelf))
        })
        .expect("loop compiled as a closure");
    let ops = opcodes(loop_def);
    assert!(ops.contains(&Opcode::TailCall));
    assert!(ops.contains(&Opcode::ReturnNil));
    // And the outer body invokes it.
    assert!(opcodes(&def).contains(&Opcode::Closure));
}

#[test]
fn constant_conditions_select_their_branch_at_compile_time() {
    let ctx = Context::new();
    let mut env = Environment::new();
    env.def(ctx.symbol("f"), cfun("f"));

    let form = read_one(&ctx, "(if true 1 (f))");
    let def = compile(&form, &env, None, &mut NullHost).unwrap();
    // No branching, no call: only the taken branch remains.
    let ops = opcodes(&def);
    assert!(!ops.contains(&Opcode::JumpIfNot));
    assert!(!ops.contains(&Opcode::Call));
    assert!(!ops.contains(&Opcode::TailCall));

    // The dead branch is still checked for errors.
    let form = read_one(&ctx, "(if true 1 (no-such-symbol))");
    let err = compile(&form, &env, None, &mut NullHost).unwrap_err();
    assert_eq!(err.message, "unknown symbol no-such-symbol");
}

#[test]
fn references_out_of_dead_branches_record_no_capture() {
    let ctx = Context::new();
    let env = Environment::new();
    let form = read_one(&ctx, "(fn [x] (if false (fn [] x) 1))");
    let top = compile(&form, &env, None, &mut NullHost).unwrap();
    let outer = &top.defs()[0];
    assert!(!outer.needs_env(), "dead reference must not capture");
}

#[test]
fn break_exits_the_innermost_loop() {
    let ctx = Context::new();
    let env = Environment::new();
    let form = read_one(&ctx, "(while true (break))");
    let def = compile(&form, &env, None, &mut NullHost).unwrap();
    assert!(opcodes(&def).contains(&Opcode::Jump));

    let form = read_one(&ctx, "(break)");
    let err = compile(&form, &env, None, &mut NullHost).unwrap_err();
    assert_eq!(err.message, "break outside loop");
}

#[test]
fn quote_yields_the_literal() {
    let ctx = Context::new();
    let env = Environment::new();
    let form = read_one(&ctx, "'(1 2 3)");
    let def = compile(&form, &env, None, &mut NullHost).unwrap();
    assert_eq!(
        opcodes(&def),
        vec![Opcode::LoadConstant, Opcode::Return]
    );
    assert_eq!(def.constants()[0].to_string(), "(1 2 3)");
}

#[test]
fn quasiquote_without_holes_is_a_constant() {
    let ctx = Context::new();
    let env = Environment::new();
    let form = read_one(&ctx, "~(1 2 3)");
    let def = compile(&form, &env, None, &mut NullHost).unwrap();
    assert_eq!(opcodes(&def), vec![Opcode::LoadConstant, Opcode::Return]);
}

#[test]
fn quasiquote_with_unquote_constructs_at_runtime() {
    let ctx = Context::new();
    let mut env = Environment::new();
    env.def(ctx.symbol("+"), cfun("+"));
    let form = read_one(&ctx, "~(1 ,(+ 1 2) 3)");
    let def = compile(&form, &env, None, &mut NullHost).unwrap();
    let ops = opcodes(&def);
    assert!(ops.contains(&Opcode::MakeTuple));
    assert!(ops.contains(&Opcode::Call));
}

#[test]
fn splice_pushes_a_whole_sequence() {
    let ctx = Context::new();
    let mut env = Environment::new();
    env.def(ctx.symbol("xs"), cfun("xs"));
    let form = read_one(&ctx, "~(1 ;xs 2)");
    let def = compile(&form, &env, None, &mut NullHost).unwrap();
    assert!(opcodes(&def).contains(&Opcode::PushArray));
}

#[test]
fn stray_unquote_and_splice_are_errors() {
    let ctx = Context::new();
    let env = Environment::new();
    let err = compile(&read_one(&ctx, ",x"), &env, None, &mut NullHost).unwrap_err();
    assert_eq!(err.message, "unquote outside quasiquote");
    let err = compile(&read_one(&ctx, ";x"), &env, None, &mut NullHost).unwrap_err();
    assert_eq!(err.message, "splice outside quasiquote");
}

#[test]
fn unknown_symbols_carry_their_source_position() {
    let ctx = Context::new();
    let env = Environment::new();
    let form = read_one(&ctx, "(do\n  (mystery))");
    let err = compile(&form, &env, None, &mut NullHost).unwrap_err();
    assert_eq!(err.message, "unknown symbol mystery");
    assert_eq!(err.line, 2);
    assert_eq!(err.column, 3);
}

#[test]
fn macros_expand_through_the_host() {
    let ctx = Context::new();
    let mut env = Environment::new();
    env.def(ctx.symbol("+"), cfun("+"));
    let marker = cfun("inc-macro");
    env.defmacro(ctx.symbol("inc"), marker.clone());

    let plus_sym = ctx.symbol("+");
    let mut host = FnHost(move |f: &Value, args: &[Value]| -> Result<Value, MacroError> {
        assert_eq!(*f, marker);
        Ok(Value::tuple(vec![
            Value::Symbol(plus_sym.clone()),
            args[0].clone(),
            Value::Integer(1),
        ]))
    });

    let form = read_one(&ctx, "(inc 41)");
    let def = compile(&form, &env, None, &mut host).unwrap();
    // Expanded to (+ 41 1): an ordinary call through the env def.
    assert!(opcodes(&def).contains(&Opcode::TailCall));
    assert_eq!(def.constants().len(), 1);
}

#[test]
fn macro_errors_carry_the_fiber() {
    let ctx = Context::new();
    let mut env = Environment::new();
    env.defmacro(ctx.symbol("boom"), cfun("boom"));

    let fiber = Value::Fiber(Rc::new(Fiber::new()));
    let fiber_clone = fiber.clone();
    let mut host = FnHost(move |_f: &Value, _args: &[Value]| -> Result<Value, MacroError> {
        Err(MacroError::new("macro exploded").with_fiber(fiber_clone.clone()))
    });

    let form = read_one(&ctx, "(boom)");
    let err = compile(&form, &env, None, &mut host).unwrap_err();
    assert_eq!(err.message, "macro exploded");
    assert_eq!(err.fiber, Some(fiber));
}

#[test]
fn macro_expansion_is_bounded() {
    let ctx = Context::new();
    let mut env = Environment::new();
    env.defmacro(ctx.symbol("forever"), cfun("forever"));

    let again = read_one(&ctx, "(forever)");
    let mut host = FnHost(move |_f: &Value, _args: &[Value]| -> Result<Value, MacroError> {
        Ok(again.clone())
    });

    let form = read_one(&ctx, "(forever)");
    let err = compile(&form, &env, None, &mut host).unwrap_err();
    assert_eq!(err.message, "recursed too deeply in macro expansion");
}

#[test]
fn local_bindings_shadow_macros() {
    let ctx = Context::new();
    let mut env = Environment::new();
    env.defmacro(ctx.symbol("m"), cfun("m"));
    // `m` is rebound locally; no macro expansion may happen.
    let form = read_one(&ctx, "(fn [m] (m 1))");
    let def = compile(&form, &env, None, &mut NullHost).unwrap();
    assert!(opcodes(&def.defs()[0]).contains(&Opcode::TailCall));
}

#[test]
fn value_recursion_is_bounded() {
    let ctx = Context::new();
    let env = Environment::new();
    // Built programmatically: the reader has its own depth guard.
    let mut form = Value::Integer(1);
    for _ in 0..2000 {
        form = Value::tuple(vec![Value::Symbol(ctx.symbol("do")), form]);
    }
    let err = compile(&form, &env, None, &mut NullHost).unwrap_err();
    assert_eq!(err.message, "recursed too deeply");
}

#[test]
fn named_fn_can_call_itself() {
    let ctx = Context::new();
    let mut env = Environment::new();
    env.def_intrinsic(ctx.symbol("-"), cfun("-"), Opcode::Subtract);
    env.def_intrinsic(ctx.symbol("<"), cfun("<"), Opcode::Less);

    let form = read_one(&ctx, "(fn loop [n] (if (< n 1) 0 (loop (- n 1))))");
    let top = compile(&form, &env, None, &mut NullHost).unwrap();
    let f = &top.defs()[0];
    let ops = opcodes(f);
    assert!(ops.contains(&Opcode::LoadSelf));
    assert!(ops.contains(&Opcode::TailCall));
}

#[test]
fn variadic_fn_sets_the_flag() {
    let ctx = Context::new();
    let env = Environment::new();
    let form = read_one(&ctx, "(fn [a b & rest] rest)");
    let top = compile(&form, &env, None, &mut NullHost).unwrap();
    let f = &top.defs()[0];
    assert!(f.is_vararg());
    assert_eq!(f.arity(), 2);
    assert!(f.slot_count() >= 3);
}

#[test]
fn container_literals_construct_at_runtime() {
    let ctx = Context::new();
    let mut env = Environment::new();
    env.def(ctx.symbol("f"), cfun("f"));

    let cases = [
        ("@[(f) 2]", Opcode::MakeArray),
        ("@{:k (f)}", Opcode::MakeTable),
        ("{:k (f)}", Opcode::MakeStruct),
        ("@\"bytes\"", Opcode::MakeBuffer),
    ];
    for (source, opcode) in cases {
        let form = read_one(&ctx, source);
        let def = compile(&form, &env, None, &mut NullHost).unwrap();
        assert!(
            opcodes(&def).contains(&opcode),
            "{} should emit {:?}",
            source,
            opcode
        );
    }
}

#[test]
fn source_mappings_cover_every_instruction_and_stay_monotonic() {
    let ctx = Context::new();
    let mut env = Environment::new();
    env.def(ctx.symbol("f"), cfun("f"));
    env.def(ctx.symbol("g"), cfun("g"));

    let form = read_one(&ctx, "(do\n  (f)\n  (g))");
    let def = compile(&form, &env, None, &mut NullHost).unwrap();
    assert_eq!(def.sourcemap().len(), def.bytecode().len());
    let mut last = (-1, -1);
    for map in def.sourcemap() {
        assert!(map.line >= 0, "every mapping inherits a position");
        assert!((map.line, map.column) >= last);
        last = (map.line, map.column);
    }
}

#[test]
fn error_latching_is_byte_identical() {
    let ctx = Context::new();
    let env = Environment::new();
    let mut compiler = Compiler::new();

    let bad = read_one(&ctx, "(nope)");
    let first: CompileError = compiler
        .compile(&bad, &env, None, &mut NullHost)
        .unwrap_err();

    // A later, perfectly valid compile short-circuits with the same error.
    let good = read_one(&ctx, "1");
    let second = compiler
        .compile(&good, &env, None, &mut NullHost)
        .unwrap_err();
    assert_eq!(first, second);
    assert_eq!(compiler.error(), Some(&first));

    compiler.reset();
    assert!(compiler.compile(&good, &env, None, &mut NullHost).is_ok());
}

#[test]
fn empty_tuple_is_a_constant() {
    let ctx = Context::new();
    let env = Environment::new();
    let form = read_one(&ctx, "()");
    let def = compile(&form, &env, None, &mut NullHost).unwrap();
    assert_eq!(opcodes(&def), vec![Opcode::LoadConstant, Opcode::Return]);
    assert_eq!(def.constants()[0], Value::tuple(vec![]));
}

#[test]
fn keywords_and_leaves_are_constants() {
    let ctx = Context::new();
    let env = Environment::new();
    for source in [":kw", "\"str\"", "1.5", "true", "nil"] {
        let form = read_one(&ctx, source);
        assert!(
            compile(&form, &env, None, &mut NullHost).is_ok(),
            "{} should compile",
            source
        );
    }
}

#[test]
fn constants_are_deduplicated() {
    let ctx = Context::new();
    let mut env = Environment::new();
    env.def(ctx.symbol("f"), cfun("f"));
    let form = read_one(&ctx, "(f \"same\" \"same\" \"same\")");
    let def = compile(&form, &env, None, &mut NullHost).unwrap();
    // One constant for f, one for the shared string.
    assert_eq!(def.constants().len(), 2);
}
