//! The seam between the compiler and the interpreter.
//!
//! Macro expansion is the only point where compilation hands control to
//! running code. The compiler does not own an interpreter; it calls through
//! this trait, and whoever embeds the compiler decides what "calling a
//! function" means.

use tarn_core::Value;

/// Failure signaled by a macro invocation.
#[derive(Debug, Clone)]
pub struct MacroError {
    pub message: String,
    /// The fiber the macro ran on, carrying its traceback.
    pub fiber: Option<Value>,
}

impl MacroError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fiber: None,
        }
    }

    pub fn with_fiber(mut self, fiber: Value) -> Self {
        self.fiber = Some(fiber);
        self
    }
}

/// Something that can invoke a callable value with arguments.
///
/// The interpreter implements this for real; tests and VM-less embeddings
/// can use [`NullHost`] or a closure.
pub trait MacroHost {
    fn call(&mut self, function: &Value, args: &[Value]) -> Result<Value, MacroError>;
}

/// Rejects every macro call. For embeddings that compile pure data and code
/// without user macros.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullHost;

impl MacroHost for NullHost {
    fn call(&mut self, _function: &Value, _args: &[Value]) -> Result<Value, MacroError> {
        Err(MacroError::new("no macro host installed"))
    }
}

/// Adapter turning a closure into a host; handy for tests and small
/// embeddings.
pub struct FnHost<F>(pub F);

impl<F> MacroHost for FnHost<F>
where
    F: FnMut(&Value, &[Value]) -> Result<Value, MacroError>,
{
    fn call(&mut self, function: &Value, args: &[Value]) -> Result<Value, MacroError> {
        (self.0)(function, args)
    }
}
