//! Escape sequence decoding and printable rendering
//!
//! `(escaped)` expectations are written with escape sequences so that
//! non-printable output can be described in a text document. [`decode`]
//! resolves those sequences into raw bytes. [`escape_printable`] goes the
//! other way and is used for reporting.

use crate::error::{Error, Result};

/// Resolve escape sequences in an expression into raw bytes.
///
/// Supported sequences:
/// - `\xHH`: one byte, hexadecimal
/// - `\0OO`: one byte, two octal digits (`\000` to `\077`)
/// - `\t`, `\n`, `\r`, `\a`, `\b`, `\e`, `\f`, `\v`: control characters
/// - `\\`: a literal backslash
///
/// Unknown sequences are kept verbatim (backslash included). A trailing lone
/// backslash is an error.
pub fn decode(expression: &str) -> Result<Vec<u8>> {
    let mut bytes = Vec::with_capacity(expression.len());
    let mut chars = expression.chars();
    let mut buf = [0u8; 4];

    while let Some(ch) = chars.next() {
        if ch != '\\' {
            bytes.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        let next = chars
            .next()
            .ok_or_else(|| Error::expectation(format!("unterminated escape sequence in {:?}", expression)))?;
        match next {
            'x' => bytes.push(take_digits(&mut chars, 16, expression)?),
            '0' => bytes.push(take_digits(&mut chars, 8, expression)?),
            't' => bytes.push(b'\t'),
            'n' => bytes.push(b'\n'),
            'r' => bytes.push(b'\r'),
            'a' => bytes.push(0x07),
            'b' => bytes.push(0x08),
            'e' => bytes.push(0x1b),
            'f' => bytes.push(0x0c),
            'v' => bytes.push(0x0b),
            '\\' => bytes.push(b'\\'),
            other => {
                bytes.push(b'\\');
                bytes.extend_from_slice(other.encode_utf8(&mut buf).as_bytes());
            }
        }
    }

    Ok(bytes)
}

/// Read exactly two digits of the given radix and return them as one byte
fn take_digits(chars: &mut std::str::Chars<'_>, radix: u32, expression: &str) -> Result<u8> {
    let digits: String = chars.by_ref().take(2).collect();
    if digits.chars().count() != 2 {
        return Err(Error::expectation(format!(
            "incomplete escape sequence in {:?}",
            expression
        )));
    }
    u8::from_str_radix(&digits, radix).map_err(|e| {
        Error::expectation(format!(
            "invalid escape sequence {:?} in {:?}: {}",
            digits, expression, e
        ))
    })
}

/// Whether a byte sequence contains anything that needs escaping to be
/// printed safely.
pub fn has_unprintable(raw: &[u8]) -> bool {
    match std::str::from_utf8(raw) {
        Ok(s) => s.chars().any(|c| c.is_control()),
        Err(_) => true,
    }
}

/// Render bytes as text where non-printable characters are replaced by
/// escape sequences that [`decode`] understands.
///
/// Printable input is returned unchanged. As soon as anything needs
/// escaping, backslashes are escaped too, so the result decodes back to the
/// input.
pub fn escape_printable(raw: &[u8]) -> String {
    if !has_unprintable(raw) {
        return String::from_utf8_lossy(raw).into_owned();
    }

    match std::str::from_utf8(raw) {
        Ok(s) => {
            let mut out = String::with_capacity(s.len());
            let mut buf = [0u8; 4];
            for c in s.chars() {
                if c.is_control() || c == '\\' {
                    for b in c.encode_utf8(&mut buf).as_bytes() {
                        out.push_str(&escape_byte(*b));
                    }
                } else {
                    out.push(c);
                }
            }
            out
        }
        // not UTF-8: escape everything outside printable ASCII
        Err(_) => raw.iter().map(|b| escape_byte(*b)).collect(),
    }
}

fn escape_byte(byte: u8) -> String {
    match byte {
        b'\n' => "\\n".into(),
        b'\r' => "\\r".into(),
        b'\t' => "\\t".into(),
        0x07 => "\\a".into(),
        0x08 => "\\b".into(),
        0x0c => "\\f".into(),
        0x0b => "\\v".into(),
        b'\\' => "\\\\".into(),
        0x20..=0x7e => (byte as char).to_string(),
        _ => format!("\\x{:02x}", byte),
    }
}

/// Render one line of output as expectation text: the line as-is, or its
/// escaped form with an `(escaped)` marker if it holds non-printable
/// characters. The trailing newline is not part of the expectation.
pub fn escaped_expectation(line: &[u8]) -> String {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    if has_unprintable(line) {
        format!("{} (escaped)", escape_printable(line))
    } else {
        String::from_utf8_lossy(line).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_plain_is_identity() {
        assert_eq!(decode("hello world").unwrap(), b"hello world".to_vec());
        assert_eq!(decode("“quoted”").unwrap(), "“quoted”".as_bytes().to_vec());
    }

    #[test]
    fn test_decode_control_escapes() {
        assert_eq!(decode("foo\\tbar").unwrap(), b"foo\tbar".to_vec());
        assert_eq!(decode("a\\nb\\rc").unwrap(), b"a\nb\rc".to_vec());
        assert_eq!(decode("\\a\\b\\e\\f\\v").unwrap(), vec![0x07, 0x08, 0x1b, 0x0c, 0x0b]);
    }

    #[test]
    fn test_decode_hex_and_octal() {
        assert_eq!(decode("foo\\x00\\x01bar").unwrap(), b"foo\x00\x01bar".to_vec());
        assert_eq!(decode("foo\\000\\001bar").unwrap(), b"foo\x00\x01bar".to_vec());
        assert_eq!(
            decode("\\xe2\\x80\\x9cfoo\\xe2\\x80\\x9d").unwrap(),
            "“foo”".as_bytes().to_vec()
        );
        assert_eq!(decode("\\x1b[1mbold").unwrap(), b"\x1b[1mbold".to_vec());
    }

    #[test]
    fn test_decode_escaped_backslash() {
        // `\\n` is a backslash followed by `n`, not a newline
        assert_eq!(decode("foo\\\\nbar").unwrap(), b"foo\\nbar".to_vec());
    }

    #[test]
    fn test_decode_unknown_sequence_kept() {
        assert_eq!(decode("a\\qb").unwrap(), b"a\\qb".to_vec());
    }

    #[test]
    fn test_decode_errors() {
        assert!(decode("trailing\\").is_err());
        assert!(decode("\\x4").is_err());
        assert!(decode("\\xzz").is_err());
        assert!(decode("\\099").is_err());
    }

    #[test]
    fn test_escape_printable_passthrough() {
        assert_eq!(escape_printable(b"plain text"), "plain text");
        assert_eq!(escape_printable(b"back\\slash"), "back\\slash");
        assert_eq!(escape_printable("🦀 crab".as_bytes()), "🦀 crab");
    }

    #[test]
    fn test_escape_printable_control() {
        assert_eq!(escape_printable(b"foo\tbar"), "foo\\tbar");
        assert_eq!(escape_printable(b"\x1b[1mfoo"), "\\x1b[1mfoo");
        assert_eq!(escape_printable(b"a\\b\x01"), "a\\\\b\\x01");
        assert_eq!(escape_printable(b"\xff\xfe"), "\\xff\\xfe");
    }

    #[test]
    fn test_escape_then_decode_restores_bytes() {
        for raw in [
            b"foo\tbar".to_vec(),
            b"a\\b\x01".to_vec(),
            b"\xef\xbb\xbfbom".to_vec(),
            b"\xff\x00".to_vec(),
        ] {
            let escaped = escape_printable(&raw);
            assert_eq!(decode(&escaped).unwrap(), raw, "via {:?}", escaped);
        }
    }

    #[test]
    fn test_escaped_expectation() {
        assert_eq!(escaped_expectation(b"foo\n"), "foo");
        assert_eq!(escaped_expectation(b"foo\tbar\n"), "foo\\tbar (escaped)");
        assert_eq!(escaped_expectation(b"\x1b[0m"), "\\x1b[0m (escaped)");
    }
}
