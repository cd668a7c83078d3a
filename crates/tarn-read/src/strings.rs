//! String, escape, and long-string consumers.

use tarn_core::Value;

use crate::error::ParseErrorKind;
use crate::parser::{Consumer, LongPhase, Parser};

impl Parser {
    /// Plain string bodies. Source newlines are stripped, escapes spawn a
    /// sub-frame, and the closing quote finalizes into a string or buffer.
    pub(crate) fn string_byte(&mut self, byte: u8, buffer: bool) -> bool {
        match byte {
            b'"' => {
                let frame = self.frames.pop().expect("string frame");
                let value = if buffer {
                    Value::buffer(frame.buf)
                } else {
                    Value::string(frame.buf)
                };
                self.push_value(value);
            }
            b'\\' => self.push_frame(Consumer::Escape { buffer }),
            b'\n' | b'\r' => {}
            _ => {
                if let Some(frame) = self.frames.last_mut() {
                    frame.buf.push(byte);
                }
            }
        }
        true
    }

    /// The byte right after a backslash.
    pub(crate) fn escape_byte(&mut self, byte: u8, buffer: bool) -> bool {
        let decoded = match byte {
            b'n' => Some(b'\n'),
            b't' => Some(b'\t'),
            b'r' => Some(b'\r'),
            b'0' | b'z' => Some(0),
            b'f' => Some(0x0c),
            b'v' => Some(0x0b),
            b'e' => Some(0x1b),
            b'"' => Some(b'"'),
            b'\\' => Some(b'\\'),
            b'x' => None,
            _ => {
                self.latch(ParseErrorKind::BadEscape);
                return true;
            }
        };
        match decoded {
            Some(b) => {
                self.frames.pop();
                self.append_to_string(b);
            }
            None => {
                if let Some(frame) = self.frames.last_mut() {
                    frame.consumer = Consumer::EscapeHex { buffer, digits: 0, accum: 0 };
                }
            }
        }
        true
    }

    /// The two digits of a `\xHH` escape.
    pub(crate) fn escape_hex_byte(&mut self, byte: u8, buffer: bool, digits: u8, accum: u8) -> bool {
        let d = match byte {
            b'0'..=b'9' => byte - b'0',
            b'a'..=b'f' => byte - b'a' + 10,
            b'A'..=b'F' => byte - b'A' + 10,
            _ => {
                self.latch(ParseErrorKind::BadHexEscape);
                return true;
            }
        };
        let accum = (accum << 4) | d;
        if digits + 1 == 2 {
            self.frames.pop();
            self.append_to_string(accum);
        } else if let Some(frame) = self.frames.last_mut() {
            frame.consumer = Consumer::EscapeHex { buffer, digits: digits + 1, accum };
        }
        true
    }

    /// Long strings: `N` opening backticks delimit; the first run of exactly
    /// `N` backticks closes. Shorter runs are content. A newline immediately
    /// after the opener and one immediately before the closer are stripped.
    pub(crate) fn long_string_byte(
        &mut self,
        byte: u8,
        buffer: bool,
        open: u32,
        phase: LongPhase,
    ) -> bool {
        match phase {
            LongPhase::Opening => {
                if byte == b'`' {
                    self.set_long(buffer, open + 1, LongPhase::Opening);
                    true
                } else {
                    // First content byte; reprocess it in the content phase.
                    self.set_long(buffer, open, LongPhase::Content { lead: true, run: 0 });
                    false
                }
            }
            LongPhase::Content { lead, run } => {
                if byte == b'`' {
                    if run + 1 == open {
                        let mut frame = self.frames.pop().expect("long-string frame");
                        if frame.buf.last() == Some(&b'\n') {
                            frame.buf.pop();
                        }
                        let value = if buffer {
                            Value::buffer(frame.buf)
                        } else {
                            Value::string(frame.buf)
                        };
                        self.push_value(value);
                    } else {
                        self.set_long(buffer, open, LongPhase::Content { lead: false, run: run + 1 });
                    }
                    return true;
                }
                // A run shorter than the delimiter is literal content.
                if run > 0 {
                    if let Some(frame) = self.frames.last_mut() {
                        frame.buf.extend(std::iter::repeat(b'`').take(run as usize));
                    }
                }
                if lead && byte == b'\n' {
                    self.set_long(buffer, open, LongPhase::Content { lead: false, run: 0 });
                    return true;
                }
                if let Some(frame) = self.frames.last_mut() {
                    frame.buf.push(byte);
                    frame.consumer = Consumer::LongString {
                        buffer,
                        open,
                        phase: LongPhase::Content { lead: false, run: 0 },
                    };
                }
                true
            }
        }
    }

    fn set_long(&mut self, buffer: bool, open: u32, phase: LongPhase) {
        if let Some(frame) = self.frames.last_mut() {
            frame.consumer = Consumer::LongString { buffer, open, phase };
        }
    }

    /// Append a decoded escape byte to the enclosing string frame.
    fn append_to_string(&mut self, byte: u8) {
        if let Some(frame) = self.frames.last_mut() {
            frame.buf.push(byte);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;
    use tarn_core::Context;

    fn read_one(source: &str) -> Value {
        let mut p = Parser::new(Context::new().interner());
        p.consume(source.as_bytes());
        p.eof();
        assert_eq!(p.error(), None, "source: {:?}", source);
        p.produce().expect("one value")
    }

    fn read_error(source: &[u8]) -> ParseErrorKind {
        let mut p = Parser::new(Context::new().interner());
        p.consume(source);
        p.eof();
        p.error().expect("an error").kind.clone()
    }

    #[test]
    fn plain_strings() {
        assert_eq!(read_one("\"hello\""), Value::string("hello"));
        assert_eq!(read_one("\"\""), Value::string(""));
    }

    #[test]
    fn escapes() {
        assert_eq!(read_one(r#""a\nb""#), Value::string("a\nb"));
        assert_eq!(read_one(r#""\t\r\0\z\f\v\e""#), Value::string(b"\t\r\0\0\x0c\x0b\x1b"));
        assert_eq!(read_one(r#""\"\\""#), Value::string(b"\"\\"));
        assert_eq!(read_one(r#""\x41\x6a""#), Value::string("Aj"));
        assert_eq!(read_one(r#""\xFF""#), Value::string(b"\xff"));
    }

    #[test]
    fn stray_escape_is_an_error() {
        assert_eq!(read_error(br#""\q""#), ParseErrorKind::BadEscape);
        assert_eq!(read_error(br#""\xg0""#), ParseErrorKind::BadHexEscape);
    }

    #[test]
    fn source_newlines_are_stripped_in_plain_strings() {
        assert_eq!(read_one("\"ab\ncd\""), Value::string("abcd"));
        assert_eq!(read_one("\"ab\r\ncd\""), Value::string("abcd"));
    }

    #[test]
    fn buffers() {
        match read_one("@\"bytes\"") {
            Value::Buffer(b) => assert_eq!(*b.borrow(), b"bytes".to_vec()),
            other => panic!("expected buffer, got {}", other),
        }
    }

    #[test]
    fn long_strings_single_delimiter() {
        assert_eq!(read_one("`hello`"), Value::string("hello"));
        // Plain-string escapes are inert inside long strings.
        assert_eq!(read_one(r"`a\nb`"), Value::string(b"a\\nb"));
    }

    #[test]
    fn long_strings_preserve_shorter_runs() {
        // Only the triple run terminates; single backticks are content.
        assert_eq!(read_one("```abc`def```"), Value::string("abc`def"));
        assert_eq!(read_one("``a`b``"), Value::string("a`b"));
    }

    #[test]
    fn long_string_newline_stripping() {
        assert_eq!(read_one("`\nabc\n`"), Value::string("abc"));
        assert_eq!(read_one("`abc\ndef`"), Value::string("abc\ndef"));
        // Only one leading and one trailing newline are stripped.
        assert_eq!(read_one("`\n\nabc\n\n`"), Value::string("\nabc\n"));
    }

    #[test]
    fn long_buffers() {
        match read_one("@`raw`") {
            Value::Buffer(b) => assert_eq!(*b.borrow(), b"raw".to_vec()),
            other => panic!("expected buffer, got {}", other),
        }
    }

    #[test]
    fn unterminated_string_is_eof_error() {
        assert_eq!(read_error(b"\"abc"), ParseErrorKind::UnexpectedEof);
        assert_eq!(read_error(b"`abc"), ParseErrorKind::UnexpectedEof);
    }

    #[test]
    fn strings_may_contain_delimiters() {
        assert_eq!(read_one("\"())]{\""), Value::string("())]{"));
    }
}
