//! Byte dispatch for the root, container, at-sign, and comment consumers.

use std::cell::RefCell;
use std::rc::Rc;

use tarn_core::{Struct, Table, Tuple, Value};

use crate::error::ParseErrorKind;
use crate::parser::{Consumer, ContainerKind, LongPhase, MacroTag, Parser};

/// The symbol-character class: ASCII alphanumerics, the punctuation set
/// `!$&*+-./:<=>@\^_~|`, and every byte >= 0x80 (tentatively UTF-8).
pub(crate) fn is_symbol_char(b: u8) -> bool {
    b >= 0x80
        || b.is_ascii_alphanumeric()
        || matches!(
            b,
            b'!' | b'$'
                | b'&'
                | b'*'
                | b'+'
                | b'-'
                | b'.'
                | b'/'
                | b':'
                | b'<'
                | b'='
                | b'>'
                | b'@'
                | b'\\'
                | b'^'
                | b'_'
                | b'~'
                | b'|'
        )
}

pub(crate) fn is_whitespace(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r' | 0 | 0x0b | 0x0c)
}

impl Parser {
    /// Give the byte to the innermost frame. Returns true when consumed;
    /// false bounces the byte back up for the parent to reprocess.
    pub(crate) fn dispatch(&mut self, byte: u8) -> bool {
        let consumer = self.frames.last().expect("parse stack underflow").consumer.clone();
        match consumer {
            Consumer::Root | Consumer::Container { .. } | Consumer::ReaderMacro { .. } => {
                self.root_byte(byte)
            }
            Consumer::Token { .. } => self.token_byte(byte),
            Consumer::String { buffer } => self.string_byte(byte, buffer),
            Consumer::Escape { buffer } => self.escape_byte(byte, buffer),
            Consumer::EscapeHex { buffer, digits, accum } => {
                self.escape_hex_byte(byte, buffer, digits, accum)
            }
            Consumer::LongString { buffer, open, phase } => {
                self.long_string_byte(byte, buffer, open, phase)
            }
            Consumer::Comment => {
                if byte == b'\n' {
                    self.frames.pop();
                }
                true
            }
            Consumer::AtSign => self.at_sign_byte(byte),
        }
    }

    /// The root consumer: whitespace, openers, closers, reader macros, and
    /// token starts. Containers and reader macros read values through the
    /// same rules.
    fn root_byte(&mut self, byte: u8) -> bool {
        match byte {
            b if is_whitespace(b) => {}
            b'\'' => self.push_frame(Consumer::ReaderMacro { tag: MacroTag::Quote }),
            b',' => self.push_frame(Consumer::ReaderMacro { tag: MacroTag::Unquote }),
            b';' => self.push_frame(Consumer::ReaderMacro { tag: MacroTag::Splice }),
            b'~' => self.push_frame(Consumer::ReaderMacro { tag: MacroTag::QuasiQuote }),
            b'|' => self.push_frame(Consumer::ReaderMacro { tag: MacroTag::ShortFn }),
            b'"' => self.push_frame(Consumer::String { buffer: false }),
            b'`' => self.push_frame(Consumer::LongString {
                buffer: false,
                open: 1,
                phase: LongPhase::Opening,
            }),
            b'#' => self.push_frame(Consumer::Comment),
            b'@' => self.push_frame(Consumer::AtSign),
            b'(' => self.push_frame(Consumer::Container { kind: ContainerKind::Tuple }),
            b'[' => self.push_frame(Consumer::Container { kind: ContainerKind::BracketTuple }),
            b'{' => self.push_frame(Consumer::Container { kind: ContainerKind::Struct }),
            b')' | b']' | b'}' => self.close_container(byte),
            b if is_symbol_char(b) => {
                self.push_frame(Consumer::Token { seen_high: b >= 0x80 });
                if let Some(frame) = self.frames.last_mut() {
                    frame.buf.push(b);
                }
            }
            _ => self.latch(ParseErrorKind::UnexpectedCharacter),
        }
        true
    }

    /// The at-sign consumer decides what `@` introduces from the next byte.
    fn at_sign_byte(&mut self, byte: u8) -> bool {
        let replacement = match byte {
            b'{' => Some(Consumer::Container { kind: ContainerKind::Table }),
            b'(' => Some(Consumer::Container { kind: ContainerKind::Array }),
            b'[' => Some(Consumer::Container { kind: ContainerKind::BracketArray }),
            b'"' => Some(Consumer::String { buffer: true }),
            b'`' => Some(Consumer::LongString {
                buffer: true,
                open: 1,
                phase: LongPhase::Opening,
            }),
            _ => None,
        };
        if let Some(consumer) = replacement {
            if let Some(frame) = self.frames.last_mut() {
                frame.consumer = consumer;
            }
            return true;
        }
        if is_symbol_char(byte) {
            // A token beginning with `@`.
            if let Some(frame) = self.frames.last_mut() {
                frame.consumer = Consumer::Token { seen_high: byte >= 0x80 };
                frame.buf.push(b'@');
                frame.buf.push(byte);
            }
            return true;
        }
        // Bare `@`: classify as a one-character token and let the parent
        // reprocess the terminator.
        if let Some(frame) = self.frames.last_mut() {
            frame.consumer = Consumer::Token { seen_high: false };
            frame.buf.push(b'@');
        }
        false
    }

    /// Close the innermost container, or report a mismatch.
    fn close_container(&mut self, closer: u8) {
        let matches_kind = match self.frames.last().map(|f| &f.consumer) {
            Some(Consumer::Container { kind }) => kind.closer() == closer,
            _ => false,
        };
        if !matches_kind {
            self.latch(ParseErrorKind::MismatchedDelimiter);
            return;
        }
        let frame = self.frames.pop().expect("container frame");
        let kind = match frame.consumer {
            Consumer::Container { kind } => kind,
            _ => unreachable!(),
        };
        let (line, column) = (frame.line as i32, frame.column as i32);
        let value = match kind {
            ContainerKind::Tuple | ContainerKind::BracketTuple => {
                Value::Tuple(Rc::new(Tuple::with_location(frame.args, line, column)))
            }
            ContainerKind::Array | ContainerKind::BracketArray => Value::array(frame.args),
            ContainerKind::Struct => {
                if frame.args.len() % 2 != 0 {
                    self.latch(ParseErrorKind::OddStructArity);
                    return;
                }
                let pairs = pair_up(frame.args);
                Value::Struct(Rc::new(Struct::with_location(pairs, line, column)))
            }
            ContainerKind::Table => {
                if frame.args.len() % 2 != 0 {
                    self.latch(ParseErrorKind::OddStructArity);
                    return;
                }
                let mut table = Table::new();
                for (k, v) in pair_up(frame.args) {
                    table.put(k, v);
                }
                Value::Table(Rc::new(RefCell::new(table)))
            }
        };
        self.push_value(value);
    }
}

fn pair_up(args: Vec<Value>) -> Vec<(Value, Value)> {
    let mut pairs = Vec::with_capacity(args.len() / 2);
    let mut iter = args.into_iter();
    while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
        pairs.push((k, v));
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ParserStatus;
    use tarn_core::Context;

    fn read_one(source: &str) -> Value {
        let mut p = Parser::new(Context::new().interner());
        p.consume(source.as_bytes());
        p.eof();
        assert_eq!(p.error(), None, "source: {:?}", source);
        p.produce().expect("one value")
    }

    fn read_error(source: &str) -> ParseErrorKind {
        let mut p = Parser::new(Context::new().interner());
        p.consume(source.as_bytes());
        p.eof();
        p.error().expect("an error").kind.clone()
    }

    #[test]
    fn empty_tuple_and_nesting() {
        assert_eq!(read_one("()"), Value::tuple(vec![]));
        assert_eq!(
            read_one("(1 (2) 3)"),
            Value::tuple(vec![
                Value::Integer(1),
                Value::tuple(vec![Value::Integer(2)]),
                Value::Integer(3),
            ])
        );
    }

    #[test]
    fn brackets_read_as_tuples() {
        assert_eq!(read_one("[1 2]"), Value::tuple(vec![Value::Integer(1), Value::Integer(2)]));
    }

    #[test]
    fn at_forms_build_mutable_containers() {
        match read_one("@[1 2]") {
            Value::Array(a) => assert_eq!(*a.borrow(), vec![Value::Integer(1), Value::Integer(2)]),
            other => panic!("expected array, got {}", other),
        }
        match read_one("@(1)") {
            Value::Array(a) => assert_eq!(*a.borrow(), vec![Value::Integer(1)]),
            other => panic!("expected array, got {}", other),
        }
    }

    #[test]
    fn table_literal_has_two_entries() {
        // The mutable table scenario from the contract.
        match read_one("@{:a 1 :b 2}") {
            Value::Table(t) => {
                let t = t.borrow();
                assert_eq!(t.len(), 2);
                let mut rendered: Vec<String> =
                    t.iter().map(|(k, v)| format!("{} {}", k, v)).collect();
                rendered.sort();
                assert_eq!(rendered, vec![":a 1", ":b 2"]);
            }
            other => panic!("expected table, got {}", other),
        }
    }

    #[test]
    fn struct_literal() {
        match read_one("{:a 1}") {
            Value::Struct(s) => assert_eq!(s.len(), 1),
            other => panic!("expected struct, got {}", other),
        }
    }

    #[test]
    fn odd_curly_arity_is_an_error() {
        assert_eq!(read_error("{:a}"), ParseErrorKind::OddStructArity);
        assert_eq!(read_error("@{:a 1 :b}"), ParseErrorKind::OddStructArity);
    }

    #[test]
    fn mismatched_delimiter_reports_closer_position() {
        let mut p = Parser::new(Context::new().interner());
        p.consume(b"(foo]");
        assert_eq!(p.status(), ParserStatus::Error);
        let err = p.error().unwrap();
        assert_eq!(err.kind, ParseErrorKind::MismatchedDelimiter);
        assert_eq!((err.line, err.column), (1, 5));
    }

    #[test]
    fn reader_macros_wrap_the_next_value() {
        assert_eq!(read_one("'x").to_string(), "(quote x)");
        assert_eq!(read_one(",x").to_string(), "(unquote x)");
        assert_eq!(read_one(";x").to_string(), "(splice x)");
        assert_eq!(read_one("~x").to_string(), "(quasiquote x)");
        assert_eq!(read_one("|(+ 1)").to_string(), "(short-fn (+ 1))");
        assert_eq!(read_one("''x").to_string(), "(quote (quote x))");
    }

    #[test]
    fn comments_run_to_end_of_line() {
        assert_eq!(read_one("# comment\n42"), Value::Integer(42));
        let mut p = Parser::new(Context::new().interner());
        p.consume(b"# only a comment");
        p.eof();
        assert_eq!(p.error(), None);
        assert!(!p.has_more());
    }

    #[test]
    fn tuples_are_stamped_with_their_opening_position() {
        let mut p = Parser::new(Context::new().interner());
        p.consume(b"\n  (1)");
        p.eof();
        match p.produce().unwrap() {
            Value::Tuple(t) => {
                assert_eq!(t.line(), 2);
                assert_eq!(t.column(), 3);
            }
            other => panic!("expected tuple, got {}", other),
        }
    }

    #[test]
    fn bare_at_reads_as_symbol() {
        assert_eq!(read_one("@").to_string(), "@");
        assert_eq!(read_one("@foo").to_string(), "@foo");
    }

    #[test]
    fn unexpected_character_is_an_error() {
        assert_eq!(read_error("%"), ParseErrorKind::UnexpectedCharacter);
    }

    #[test]
    fn state_reports_open_frames() {
        let mut p = Parser::new(Context::new().interner());
        p.consume(b"(1 @{");
        let delims = p.state(Some("delimiters"));
        assert_eq!(delims, Value::string("({"));
        match p.state(Some("frames")) {
            Value::Array(frames) => assert_eq!(frames.borrow().len(), 3),
            other => panic!("expected array, got {}", other),
        }
    }
}
