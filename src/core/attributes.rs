//! XML Attribute Parsing
//!
//! Parses the attribute section of a start tag (everything between the
//! element name and the closing `>` or `/>`). Values are entity-decoded and
//! whitespace-normalized. Duplicate names are passed through in
//! declaration order.

use super::entities::{decode_attribute, find_invalid_char};
use super::scanner::{is_name_char, is_name_start_char, is_whitespace};
use crate::error::ErrorCode;
use memchr::memchr;
use std::borrow::Cow;

/// A parsed attribute borrowing from the tokenizer buffer
#[derive(Debug, Clone)]
pub struct Attribute<'a> {
    /// Qualified name as written
    pub name: Cow<'a, [u8]>,
    /// Decoded value
    pub value: Cow<'a, [u8]>,
}

impl<'a> Attribute<'a> {
    pub fn new(name: &'a [u8], value: Cow<'a, [u8]>) -> Self {
        Attribute {
            name: Cow::Borrowed(name),
            value,
        }
    }

    /// Get the name as a string
    pub fn name_str(&self) -> Option<&str> {
        std::str::from_utf8(self.name.as_ref()).ok()
    }

    /// Get the value as a string
    pub fn value_str(&self) -> Option<&str> {
        std::str::from_utf8(self.value.as_ref()).ok()
    }
}

/// Attribute parse failure at an offset relative to the parsed section
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttributeError {
    pub code: ErrorCode,
    pub offset: usize,
}

fn fail<T>(code: ErrorCode, offset: usize) -> Result<T, AttributeError> {
    Err(AttributeError { code, offset })
}

/// Parse the attribute section of a start tag
pub fn parse_attributes(input: &[u8]) -> Result<Vec<Attribute<'_>>, AttributeError> {
    let mut attrs = Vec::new();
    let mut pos = 0;

    loop {
        let ws_start = pos;
        while pos < input.len() && is_whitespace(input[pos]) {
            pos += 1;
        }
        if pos >= input.len() {
            return Ok(attrs);
        }
        // Attributes must be separated from the name and from each other
        if pos == ws_start {
            return fail(ErrorCode::InvalidToken, pos);
        }

        let name_start = pos;
        if !is_name_start_char(input[pos]) {
            return fail(ErrorCode::InvalidToken, pos);
        }
        while pos < input.len() && is_name_char(input[pos]) {
            pos += 1;
        }
        let name = &input[name_start..pos];

        while pos < input.len() && is_whitespace(input[pos]) {
            pos += 1;
        }
        if input.get(pos) != Some(&b'=') {
            return fail(ErrorCode::InvalidToken, pos);
        }
        pos += 1;
        while pos < input.len() && is_whitespace(input[pos]) {
            pos += 1;
        }

        let quote = match input.get(pos) {
            Some(&q) if q == b'"' || q == b'\'' => q,
            _ => return fail(ErrorCode::InvalidToken, pos),
        };
        pos += 1;
        let value_start = pos;
        let value_len = match memchr(quote, &input[value_start..]) {
            Some(len) => len,
            None => return fail(ErrorCode::InvalidToken, input.len()),
        };
        let raw_value = &input[value_start..value_start + value_len];
        if let Some(lt) = memchr(b'<', raw_value) {
            return fail(ErrorCode::InvalidToken, value_start + lt);
        }
        if let Some(bad) = find_invalid_char(raw_value) {
            return fail(ErrorCode::InvalidToken, value_start + bad);
        }
        let value = decode_attribute(raw_value).map_err(|e| AttributeError {
            code: e.code,
            offset: value_start + e.offset,
        })?;
        pos = value_start + value_len + 1;

        attrs.push(Attribute::new(name, value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(input: &[u8]) -> Vec<(String, String)> {
        parse_attributes(input)
            .unwrap()
            .iter()
            .map(|a| (a.name_str().unwrap().to_string(), a.value_str().unwrap().to_string()))
            .collect()
    }

    #[test]
    fn test_empty_section() {
        assert!(parse_attributes(b"").unwrap().is_empty());
        assert!(parse_attributes(b"  \n").unwrap().is_empty());
    }

    #[test]
    fn test_order_and_quotes() {
        assert_eq!(
            pairs(b" x=\"1\" y='2' z = \"3\""),
            vec![
                ("x".to_string(), "1".to_string()),
                ("y".to_string(), "2".to_string()),
                ("z".to_string(), "3".to_string()),
            ]
        );
    }

    #[test]
    fn test_duplicates_pass_through() {
        let attrs = pairs(b" a=\"1\" a=\"2\"");
        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs[1].1, "2");
    }

    #[test]
    fn test_value_decoding() {
        assert_eq!(pairs(b" q=\"&lt;&amp;&gt;\"")[0].1, "<&>");
    }

    #[test]
    fn test_missing_separator() {
        let err = parse_attributes(b" a=\"1\"b=\"2\"").unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidToken);
        assert_eq!(err.offset, 6);
    }

    #[test]
    fn test_unquoted_value() {
        assert_eq!(parse_attributes(b" a=1").unwrap_err().code, ErrorCode::InvalidToken);
    }

    #[test]
    fn test_lt_in_value() {
        let err = parse_attributes(b" a=\"x<y\"").unwrap_err();
        assert_eq!(err.offset, 5);
    }

    #[test]
    fn test_undefined_entity_in_value() {
        let err = parse_attributes(b" a=\"&foo;\"").unwrap_err();
        assert_eq!(err.code, ErrorCode::UndefinedEntity);
        assert_eq!(err.offset, 4);
    }
}
