//! Reader error types.

use thiserror::Error;

/// What went wrong, without position information.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseErrorKind {
    #[error("unexpected character")]
    UnexpectedCharacter,

    #[error("mismatched delimiter")]
    MismatchedDelimiter,

    #[error("struct and table literals expect even number of arguments")]
    OddStructArity,

    #[error("symbol literal cannot start with a digit")]
    BadNumber,

    #[error("invalid utf-8 in symbol")]
    InvalidUtf8Symbol,

    #[error("invalid utf-8 in keyword")]
    InvalidUtf8Keyword,

    #[error("invalid string escape sequence")]
    BadEscape,

    #[error("invalid hex digit in string escape")]
    BadHexEscape,

    #[error("unexpected end of source")]
    UnexpectedEof,

    #[error("recursed too deeply")]
    TooDeep,

    #[error("cannot insert value into token")]
    InsertIntoToken,

    #[error("cannot consume when parser is sealed")]
    Sealed,
}

/// A latched parse error with the position of the offending byte.
///
/// The first error sticks: once latched, further `consume` calls are silent
/// no-ops until the parser is flushed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("parse error at {line}:{column}: {kind}")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    /// 1-based line of the offending byte.
    pub line: u32,
    /// Byte column of the offending byte.
    pub column: u32,
}

impl ParseError {
    pub fn new(kind: ParseErrorKind, line: u32, column: u32) -> Self {
        Self { kind, line, column }
    }

    /// The bare message, without position.
    pub fn message(&self) -> String {
        self.kind.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_matches_kind() {
        let err = ParseError::new(ParseErrorKind::MismatchedDelimiter, 2, 5);
        assert_eq!(err.message(), "mismatched delimiter");
        assert_eq!(err.to_string(), "parse error at 2:5: mismatched delimiter");
    }
}
