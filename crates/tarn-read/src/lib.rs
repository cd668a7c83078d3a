//! tarn-read - Streaming reader for the Tarn language.
//!
//! The reader turns a byte stream into structured [`Value`]s one byte at a
//! time. It is an explicit state machine: callers may feed partial input,
//! observe [`Parser::status`], dequeue finished top-level values with
//! [`Parser::produce`], and resume whenever more bytes arrive. A [`Parser`]
//! can be cloned mid-form for speculative parsing and introspected with
//! [`Parser::state`].
//!
//! # Example
//!
//! ```
//! use tarn_core::Context;
//! use tarn_read::Parser;
//!
//! let ctx = Context::new();
//! let mut parser = Parser::new(ctx.interner());
//! parser.consume(b"(print \"hello\") ");
//! let form = parser.produce().unwrap();
//! assert_eq!(form.to_string(), "(print \"hello\")");
//! ```
//!
//! # Error model
//!
//! The first error latches: the parser ignores further input and reports
//! [`ParserStatus::Error`] until [`Parser::flush`] clears it. End of input
//! is explicit ([`Parser::eof`]) and seals the parser.

mod consumers;
mod error;
mod parser;
mod strings;
mod token;
mod utf8;

pub use error::{ParseError, ParseErrorKind};
pub use parser::{Parser, ParserOptions, ParserStatus};

use tarn_core::{InternRef, Value};

/// Parse a complete in-memory source, returning every top-level value.
///
/// Convenience wrapper over the streaming interface for callers that have
/// the whole text at hand.
pub fn read_all(interner: InternRef, source: &[u8]) -> Result<Vec<Value>, ParseError> {
    let mut parser = Parser::new(interner);
    parser.consume(source);
    parser.eof();
    if let Some(err) = parser.error() {
        return Err(err.clone());
    }
    let mut values = Vec::new();
    while let Some(value) = parser.produce() {
        values.push(value);
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tarn_core::Context;

    #[test]
    fn read_all_returns_every_top_level_value() {
        let ctx = Context::new();
        let values = read_all(ctx.interner(), b"1 2 (3 4)").unwrap();
        assert_eq!(values.len(), 3);
        assert_eq!(values[0], Value::Integer(1));
        assert_eq!(values[2].to_string(), "(3 4)");
    }

    #[test]
    fn read_all_surfaces_errors() {
        let ctx = Context::new();
        let err = read_all(ctx.interner(), b"(oops").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnexpectedEof);
    }
}
