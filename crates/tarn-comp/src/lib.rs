//! tarn-comp - Macro-expanding bytecode compiler for the Tarn language.
//!
//! The compiler turns one source value (as produced by `tarn-read`) into a
//! sealed [`FuncDef`] for the register machine. The pipeline per form:
//!
//! 1. **Dispatch** - special forms compile through built-in handlers; tuples
//!    headed by a macro binding expand by calling the macro through the
//!    [`MacroHost`] seam, then re-dispatch.
//! 2. **Resolution** - symbols search the lexical scope stack inner to
//!    outer, capturing upvalues across function boundaries, falling back to
//!    the [`Environment`].
//! 3. **Emission** - a per-function register allocator and constant pool
//!    feed 32-bit instruction words with a parallel source map.
//!
//! Errors are plain values: the first failure aborts compilation and, on a
//! reused [`Compiler`], latches so later calls short-circuit with an
//! identical error.
//!
//! # Example
//!
//! ```
//! use tarn_core::{Context, Value};
//! use tarn_comp::{compile, Environment, NullHost};
//! use tarn_read::read_all;
//!
//! let ctx = Context::new();
//! let mut env = Environment::new();
//! env.def(ctx.symbol("print"), Value::string("stand-in"));
//! let form = read_all(ctx.interner(), b"(print :ok)").unwrap().remove(0);
//! let def = compile(&form, &env, Some("example"), &mut NullHost).unwrap();
//! assert!(!def.bytecode().is_empty());
//! ```

mod emit;
mod env;
mod error;
mod front;
mod host;
mod scope;
mod slot;
mod specials;

pub use env::{Binding, Environment, Intrinsic};
pub use error::CompileError;
pub use host::{FnHost, MacroError, MacroHost, NullHost};
pub use slot::{Slot, SLOT_CONSTANT, SLOT_MUTABLE, SLOT_NAMED, SLOT_REF, SLOT_RETURNED};

use std::rc::Rc;

use tarn_core::{FuncDef, Instr, SourceMapping, Value};

use scope::{Scope, SCOPE_TOP};

/// Compiler limits and knobs.
#[derive(Debug, Clone)]
pub struct CompilerOptions {
    /// Bound on recursive value compilation.
    pub max_recursion_depth: u32,
    /// Bound on successive macro expansions of one form.
    pub max_macro_expansions: u32,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            max_recursion_depth: 1024,
            max_macro_expansions: 200,
        }
    }
}

/// Per-call compile options threaded through every recursive step.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct FormOptions {
    /// Permit emitting a return or tail call.
    pub tail: bool,
    /// Preferred destination, honored when it is a near register.
    pub hint: Option<u8>,
}

impl FormOptions {
    /// Plain value position: no return, no preferred destination.
    pub fn value() -> Self {
        Self::default()
    }

    pub fn tail() -> Self {
        Self { tail: true, hint: None }
    }

    pub fn hinted(hint: u8) -> Self {
        Self { tail: false, hint: Some(hint) }
    }
}

/// An open loop that `break` can target.
#[derive(Debug, Default)]
pub(crate) struct LoopFrame {
    /// Jump instructions to patch to the loop's end.
    pub breaks: Vec<usize>,
}

/// All state of one compilation run.
///
/// Scopes are an owned stack; bytecode and source mappings share one buffer
/// across nested functions, sliced apart at function finalization by each
/// scope's start offset. Dropping the compilation mid-way (on error) releases
/// every scope and allocator without any explicit unwinding.
pub(crate) struct Compilation<'a> {
    pub options: &'a CompilerOptions,
    pub env: &'a Environment,
    pub host: &'a mut dyn MacroHost,
    pub scopes: Vec<Scope>,
    pub bytecode: Vec<Instr>,
    pub mapbuffer: Vec<SourceMapping>,
    /// Most recently observed source position; emitted instructions inherit
    /// it until a positioned form updates it.
    pub mapping: SourceMapping,
    pub depth: u32,
    pub source_name: Option<Rc<str>>,
    pub loops: Vec<LoopFrame>,
}

impl<'a> Compilation<'a> {
    fn new(
        options: &'a CompilerOptions,
        env: &'a Environment,
        host: &'a mut dyn MacroHost,
        source_name: Option<&str>,
    ) -> Self {
        Self {
            options,
            env,
            host,
            scopes: Vec::new(),
            bytecode: Vec::new(),
            mapbuffer: Vec::new(),
            mapping: SourceMapping::NONE,
            depth: 0,
            source_name: source_name.map(Rc::from),
            loops: Vec::new(),
        }
    }

    /// A compile error positioned at the current source mapping.
    pub(crate) fn error(&self, message: impl Into<String>) -> CompileError {
        CompileError::new(message, self.mapping.line, self.mapping.column)
    }
}

/// Compile one source value against an environment.
pub fn compile(
    source: &Value,
    env: &Environment,
    source_name: Option<&str>,
    host: &mut dyn MacroHost,
) -> Result<Rc<FuncDef>, CompileError> {
    compile_with_options(source, env, source_name, host, &CompilerOptions::default())
}

/// [`compile`] with explicit limits.
pub fn compile_with_options(
    source: &Value,
    env: &Environment,
    source_name: Option<&str>,
    host: &mut dyn MacroHost,
    options: &CompilerOptions,
) -> Result<Rc<FuncDef>, CompileError> {
    let mut cc = Compilation::new(options, env, host, source_name);
    cc.push_function_scope(SCOPE_TOP, None);
    cc.compile_form(source, FormOptions::tail())?;
    cc.finish_function_scope(0, false)
}

/// A reusable compiler front door with single-shot error latching.
///
/// The first failed compilation latches: every later call short-circuits
/// with an identical copy of the first error until [`Compiler::reset`].
#[derive(Default)]
pub struct Compiler {
    options: CompilerOptions,
    latched: Option<CompileError>,
}

impl Compiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: CompilerOptions) -> Self {
        Self { options, latched: None }
    }

    /// The latched error, if a previous compilation failed.
    pub fn error(&self) -> Option<&CompileError> {
        self.latched.as_ref()
    }

    /// Clear the latch.
    pub fn reset(&mut self) {
        self.latched = None;
    }

    pub fn compile(
        &mut self,
        source: &Value,
        env: &Environment,
        source_name: Option<&str>,
        host: &mut dyn MacroHost,
    ) -> Result<Rc<FuncDef>, CompileError> {
        if let Some(err) = &self.latched {
            return Err(err.clone());
        }
        match compile_with_options(source, env, source_name, host, &self.options) {
            Ok(def) => Ok(def),
            Err(err) => {
                self.latched = Some(err.clone());
                Err(err)
            }
        }
    }
}
