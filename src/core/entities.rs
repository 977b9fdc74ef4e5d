//! Entity and Character Reference Decoding
//!
//! Handles the five predefined entities and numeric character references.
//! No DTD is ever read, so any other named reference is an undefined entity.
//!
//! Uses Cow for zero-copy when the input needs no rewriting.

use crate::error::ErrorCode;
use memchr::{memchr, memchr2};
use std::borrow::Cow;

/// A decoding failure at a byte offset relative to the decoded input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeError {
    pub code: ErrorCode,
    pub offset: usize,
}

impl DecodeError {
    fn new(code: ErrorCode, offset: usize) -> Self {
        DecodeError { code, offset }
    }
}

/// How literal whitespace is rewritten while decoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whitespace {
    /// Character data: CR LF and lone CR become LF
    LineEnds,
    /// Attribute values: CR LF, CR, LF and TAB each become a single space
    Attribute,
}

/// Decode character data (entities, character references, line ends)
#[inline]
pub fn decode_text(input: &[u8]) -> Result<Cow<'_, [u8]>, DecodeError> {
    decode(input, Whitespace::LineEnds)
}

/// Decode and normalize an attribute value
#[inline]
pub fn decode_attribute(input: &[u8]) -> Result<Cow<'_, [u8]>, DecodeError> {
    decode(input, Whitespace::Attribute)
}

fn decode(input: &[u8], ws: Whitespace) -> Result<Cow<'_, [u8]>, DecodeError> {
    let needs_rewrite = match ws {
        Whitespace::LineEnds => memchr2(b'&', b'\r', input).is_some(),
        Whitespace::Attribute => input.iter().any(|&b| matches!(b, b'&' | b'\r' | b'\n' | b'\t')),
    };
    if !needs_rewrite {
        return Ok(Cow::Borrowed(input));
    }

    let mut out = Vec::with_capacity(input.len());
    let mut pos = 0;
    while pos < input.len() {
        match input[pos] {
            b'&' => {
                let consumed = decode_reference(&input[pos..], &mut out)
                    .map_err(|code| DecodeError::new(code, pos))?;
                pos += consumed;
            }
            b'\r' => {
                out.push(if ws == Whitespace::Attribute { b' ' } else { b'\n' });
                pos += 1;
                if input.get(pos) == Some(&b'\n') {
                    pos += 1;
                }
            }
            b'\n' | b'\t' if ws == Whitespace::Attribute => {
                out.push(b' ');
                pos += 1;
            }
            b => {
                out.push(b);
                pos += 1;
            }
        }
    }
    Ok(Cow::Owned(out))
}

/// Line-end normalization only, for CDATA sections
pub fn normalize_line_ends(input: &[u8]) -> Cow<'_, [u8]> {
    if memchr(b'\r', input).is_none() {
        return Cow::Borrowed(input);
    }
    let mut out = Vec::with_capacity(input.len());
    let mut iter = input.iter().peekable();
    while let Some(&b) = iter.next() {
        if b == b'\r' {
            out.push(b'\n');
            if iter.peek() == Some(&&b'\n') {
                iter.next();
            }
        } else {
            out.push(b);
        }
    }
    Cow::Owned(out)
}

/// Decode one reference starting at '&', returning the bytes consumed
fn decode_reference(input: &[u8], out: &mut Vec<u8>) -> Result<usize, ErrorCode> {
    let semi = memchr(b';', input).ok_or(ErrorCode::InvalidToken)?;
    let body = &input[1..semi];
    if body.is_empty() {
        return Err(ErrorCode::InvalidToken);
    }

    if body[0] == b'#' {
        let cp = parse_char_ref(&body[1..]).ok_or(ErrorCode::InvalidToken)?;
        if !is_valid_xml_char(cp) {
            return Err(ErrorCode::BadCharRef);
        }
        let c = char::from_u32(cp).ok_or(ErrorCode::BadCharRef)?;
        let mut buf = [0u8; 4];
        out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
        return Ok(semi + 1);
    }

    if !super::scanner::is_name_start_char(body[0])
        || !body.iter().all(|&b| super::scanner::is_name_char(b))
    {
        return Err(ErrorCode::InvalidToken);
    }
    let replacement: &[u8] = match body {
        b"lt" => b"<",
        b"gt" => b">",
        b"amp" => b"&",
        b"quot" => b"\"",
        b"apos" => b"'",
        _ => return Err(ErrorCode::UndefinedEntity),
    };
    out.extend_from_slice(replacement);
    Ok(semi + 1)
}

/// Parse the digits of `&#...;` / `&#x...;`
fn parse_char_ref(digits: &[u8]) -> Option<u32> {
    let (radix, digits) = match digits.first() {
        Some(b'x') => (16, &digits[1..]),
        _ => (10, digits),
    };
    if digits.is_empty() || digits.len() > 8 {
        return None;
    }
    let text = std::str::from_utf8(digits).ok()?;
    if !text.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u32::from_str_radix(text, radix).ok()
}

/// Check if a code point is a valid XML 1.0 Char
/// Char ::= #x9 | #xA | #xD | [#x20-#xD7FF] | [#xE000-#xFFFD] | [#x10000-#x10FFFF]
#[inline]
pub fn is_valid_xml_char(codepoint: u32) -> bool {
    matches!(codepoint,
        0x9 | 0xA | 0xD |
        0x20..=0xD7FF |
        0xE000..=0xFFFD |
        0x10000..=0x10FFFF
    )
}

/// Offset of the first ASCII control character that XML forbids, if any.
/// Input is already valid UTF-8, so only single bytes need checking.
#[inline]
pub fn find_invalid_char(content: &[u8]) -> Option<usize> {
    content
        .iter()
        .position(|&b| b < 0x20 && !matches!(b, 0x9 | 0xA | 0xD))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_entities_is_borrowed() {
        let result = decode_text(b"Hello, World!").unwrap();
        assert!(matches!(result, Cow::Borrowed(_)));
    }

    #[test]
    fn test_predefined_entities() {
        let result = decode_text(b"&lt;hello&gt; &amp; &quot;world&apos;").unwrap();
        assert_eq!(result.as_ref(), b"<hello> & \"world'");
    }

    #[test]
    fn test_char_refs() {
        assert_eq!(decode_text(b"&#65;&#x42;&#x1F600;").unwrap().as_ref(), "AB😀".as_bytes());
    }

    #[test]
    fn test_line_end_normalization() {
        assert_eq!(decode_text(b"a\r\nb\rc").unwrap().as_ref(), b"a\nb\nc");
    }

    #[test]
    fn test_cdata_line_ends_keep_ampersands() {
        assert_eq!(normalize_line_ends(b"a &amp;\r\nb").as_ref(), b"a &amp;\nb");
        assert!(matches!(normalize_line_ends(b"plain"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_attribute_normalization() {
        assert_eq!(decode_attribute(b"a\tb\r\nc&#10;").unwrap().as_ref(), b"a b c\n");
    }

    #[test]
    fn test_undefined_entity() {
        let err = decode_text(b"ab&nbsp;").unwrap_err();
        assert_eq!(err.code, ErrorCode::UndefinedEntity);
        assert_eq!(err.offset, 2);
    }

    #[test]
    fn test_bad_char_ref() {
        assert_eq!(decode_text(b"&#0;").unwrap_err().code, ErrorCode::BadCharRef);
        assert_eq!(decode_text(b"&#xD800;").unwrap_err().code, ErrorCode::BadCharRef);
    }

    #[test]
    fn test_bare_ampersand() {
        assert_eq!(decode_text(b"fish & chips").unwrap_err().code, ErrorCode::InvalidToken);
        assert_eq!(decode_text(b"&;").unwrap_err().code, ErrorCode::InvalidToken);
    }

    #[test]
    fn test_invalid_control_char() {
        assert_eq!(find_invalid_char(b"ok\tfine\n"), None);
        assert_eq!(find_invalid_char(b"bad\x01"), Some(3));
    }
}
