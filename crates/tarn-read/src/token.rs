//! The token consumer: classification and number scanning.
//!
//! A token is any maximal run of symbol-class bytes. The terminator is not
//! consumed here; it bounces back to the parent frame. Classification order:
//! keyword, number, `nil`/`true`/`false`, then symbol.

use tarn_core::Value;

use crate::consumers::is_symbol_char;
use crate::error::ParseErrorKind;
use crate::parser::{Consumer, Frame, Parser};
use crate::utf8::is_encoding_valid;

impl Parser {
    pub(crate) fn token_byte(&mut self, byte: u8) -> bool {
        if is_symbol_char(byte) {
            if let Some(frame) = self.frames.last_mut() {
                frame.buf.push(byte);
                if byte >= 0x80 {
                    frame.consumer = Consumer::Token { seen_high: true };
                }
            }
            return true;
        }
        let frame = self.frames.pop().expect("token frame");
        self.finish_token(frame);
        // The terminator belongs to the parent.
        false
    }

    fn finish_token(&mut self, frame: Frame) {
        let seen_high = matches!(frame.consumer, Consumer::Token { seen_high: true });
        let bytes = &frame.buf;
        debug_assert!(!bytes.is_empty());

        // Keywords: a leading colon, tail must be valid UTF-8.
        if bytes[0] == b':' {
            match valid_text(&bytes[1..]) {
                Some(tail) => {
                    let value = self.keyword(tail);
                    self.push_value(value);
                }
                None => self.latch(ParseErrorKind::InvalidUtf8Keyword),
            }
            return;
        }

        // Numbers: a digit, or a sign or dot followed by a digit.
        if looks_numeric(bytes) {
            match scan_number(bytes) {
                Some(value) => self.push_value(value),
                None => self.latch(ParseErrorKind::BadNumber),
            }
            return;
        }

        match bytes.as_slice() {
            b"nil" => self.push_value(Value::Nil),
            b"true" => self.push_value(Value::Boolean(true)),
            b"false" => self.push_value(Value::Boolean(false)),
            _ => {
                if seen_high && !is_encoding_valid(bytes) {
                    self.latch(ParseErrorKind::InvalidUtf8Symbol);
                    return;
                }
                match valid_text(bytes) {
                    Some(text) => {
                        let sym = self.intern(text);
                        self.push_value(Value::Symbol(sym));
                    }
                    None => self.latch(ParseErrorKind::InvalidUtf8Symbol),
                }
            }
        }
    }
}

/// Text that passed both the encoding-shape check and Rust's own UTF-8
/// rules; identifier text is stored as `str`, so both must hold.
fn valid_text(bytes: &[u8]) -> Option<&str> {
    if !is_encoding_valid(bytes) {
        return None;
    }
    std::str::from_utf8(bytes).ok()
}

/// Should this token be parsed as a number?
fn looks_numeric(bytes: &[u8]) -> bool {
    match bytes[0] {
        b'0'..=b'9' => true,
        b'+' | b'-' | b'.' => bytes.len() > 1 && bytes[1].is_ascii_digit(),
        _ => false,
    }
}

fn digit_value(b: u8) -> Option<u32> {
    match b {
        b'0'..=b'9' => Some((b - b'0') as u32),
        b'a'..=b'z' => Some((b - b'a') as u32 + 10),
        b'A'..=b'Z' => Some((b - b'A') as u32 + 10),
        _ => None,
    }
}

/// Parse a complete numeric token: decimal integers and reals, `0x` hex,
/// and `NrDIGITS` radix forms. Integers that overflow 32 bits come back as
/// reals. `None` means the token is not a well-formed number.
pub(crate) fn scan_number(bytes: &[u8]) -> Option<Value> {
    let (negative, rest) = match bytes.first()? {
        b'-' => (true, &bytes[1..]),
        b'+' => (false, &bytes[1..]),
        _ => (false, bytes),
    };
    if rest.is_empty() {
        return None;
    }

    if rest.len() > 2 && rest[0] == b'0' && (rest[1] == b'x' || rest[1] == b'X') {
        return radix_value(&rest[2..], 16, negative);
    }

    if let Some(rpos) = rest.iter().position(|&b| b == b'r' || b == b'R') {
        if rpos > 0 && rest[..rpos].iter().all(|b| b.is_ascii_digit()) {
            let radix: u32 = std::str::from_utf8(&rest[..rpos]).ok()?.parse().ok()?;
            if !(2..=36).contains(&radix) {
                return None;
            }
            return radix_value(&rest[rpos + 1..], radix, negative);
        }
    }

    decimal_value(bytes, rest)
}

fn radix_value(digits: &[u8], radix: u32, negative: bool) -> Option<Value> {
    if digits.is_empty() {
        return None;
    }
    let mut int: i64 = 0;
    let mut real: f64 = 0.0;
    let mut overflow = false;
    for &b in digits {
        let d = digit_value(b)?;
        if d >= radix {
            return None;
        }
        if !overflow {
            match int
                .checked_mul(radix as i64)
                .and_then(|v| v.checked_add(d as i64))
            {
                Some(v) => int = v,
                None => {
                    overflow = true;
                    real = int as f64;
                }
            }
        }
        if overflow {
            real = real * radix as f64 + d as f64;
        }
    }
    if negative {
        int = -int;
        real = -real;
    }
    if !overflow && int >= i32::MIN as i64 && int <= i32::MAX as i64 {
        Some(Value::Integer(int as i32))
    } else if overflow {
        Some(Value::Real(real))
    } else {
        Some(Value::Real(int as f64))
    }
}

/// `full` includes the sign, `rest` does not; the shape check runs over
/// `rest` and the standard library parses `full`.
fn decimal_value(full: &[u8], rest: &[u8]) -> Option<Value> {
    let mut i = 0;
    let mut int_digits = 0;
    let mut frac_digits = 0;
    let mut is_real = false;

    while i < rest.len() && rest[i].is_ascii_digit() {
        int_digits += 1;
        i += 1;
    }
    if i < rest.len() && rest[i] == b'.' {
        is_real = true;
        i += 1;
        while i < rest.len() && rest[i].is_ascii_digit() {
            frac_digits += 1;
            i += 1;
        }
    }
    if int_digits + frac_digits == 0 {
        return None;
    }
    if i < rest.len() && (rest[i] == b'e' || rest[i] == b'E') {
        is_real = true;
        i += 1;
        if i < rest.len() && (rest[i] == b'+' || rest[i] == b'-') {
            i += 1;
        }
        let exp_start = i;
        while i < rest.len() && rest[i].is_ascii_digit() {
            i += 1;
        }
        if i == exp_start {
            return None;
        }
    }
    if i != rest.len() {
        return None;
    }

    // Shape is valid ASCII by construction.
    let text = std::str::from_utf8(full).ok()?;
    if !is_real {
        match text.parse::<i64>() {
            Ok(v) if v >= i32::MIN as i64 && v <= i32::MAX as i64 => {
                return Some(Value::Integer(v as i32))
            }
            Ok(v) => return Some(Value::Real(v as f64)),
            // Past even the 64-bit range: report as a real.
            Err(_) => return text.parse::<f64>().ok().map(Value::Real),
        }
    }
    text.parse::<f64>().ok().map(Value::Real)
}
