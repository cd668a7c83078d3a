//! Encoding-only UTF-8 validation.
//!
//! The reader checks that symbol and keyword text is *structurally* valid
//! UTF-8: sequence lengths of 1-4 bytes, well-formed continuation bytes,
//! and no overlong encodings. Code-point validity (surrogates, the 0x10FFFF
//! ceiling) is deliberately not checked; that is the runtime's concern if it
//! ever cares.

/// Validate that `bytes` is structurally well-formed UTF-8.
pub fn is_encoding_valid(bytes: &[u8]) -> bool {
    let mut i = 0;
    while i < bytes.len() {
        let first = bytes[i];
        let len = match first {
            0x00..=0x7f => 1,
            // 0xC0 and 0xC1 could only begin overlong two-byte forms.
            0xc2..=0xdf => 2,
            0xe0..=0xef => 3,
            0xf0..=0xf7 => 4,
            _ => return false,
        };
        if i + len > bytes.len() {
            return false;
        }
        for &cont in &bytes[i + 1..i + len] {
            if !(0x80..=0xbf).contains(&cont) {
                return false;
            }
        }
        // Remaining overlong forms: a three-byte sequence starting 0xE0
        // must not encode below 0x800, a four-byte sequence starting 0xF0
        // must not encode below 0x10000.
        if len == 3 && first == 0xe0 && bytes[i + 1] < 0xa0 {
            return false;
        }
        if len == 4 && first == 0xf0 && bytes[i + 1] < 0x90 {
            return false;
        }
        i += len;
    }
    true
}
