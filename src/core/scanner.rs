//! Delimiter scanning over the tokenizer's pending buffer
//!
//! All searches use memchr (SIMD where available). Positions are absolute
//! offsets into the buffer the scanner was created over, so the tokenizer
//! can translate them back into line/column information.

use memchr::{memchr, memmem};

/// Cursor over a byte buffer
pub struct Scanner<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> Scanner<'a> {
    /// Create a scanner positioned at `pos`
    #[inline]
    pub fn new(input: &'a [u8], pos: usize) -> Self {
        Scanner { input, pos }
    }

    /// Current cursor offset
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes from the cursor to the end of input
    #[inline]
    pub fn remaining(&self) -> &'a [u8] {
        &self.input[self.pos.min(self.input.len())..]
    }

    /// Byte at the cursor without advancing
    #[inline]
    pub fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    /// Check whether the input at the cursor begins with `needle`
    #[inline]
    pub fn starts_with(&self, needle: &[u8]) -> bool {
        self.remaining().starts_with(needle)
    }

    /// True if the remaining input is a strict prefix of `needle`, i.e.
    /// more bytes are needed before the comparison can be decided.
    #[inline]
    pub fn is_prefix_of(&self, needle: &[u8]) -> bool {
        let rest = self.remaining();
        rest.len() < needle.len() && needle.starts_with(rest)
    }

    /// Skip whitespace characters (space, tab, newline, carriage return)
    pub fn skip_whitespace(&mut self) {
        while let Some(b) = self.peek() {
            if !is_whitespace(b) {
                break;
            }
            self.pos += 1;
        }
    }

    /// Next occurrence of `byte` at or after the cursor
    #[inline]
    pub fn find_byte(&self, byte: u8) -> Option<usize> {
        memchr(byte, self.remaining()).map(|i| self.pos + i)
    }

    /// Next occurrence of a byte sequence at or after `from`
    #[inline]
    pub fn find_seq_from(&self, from: usize, needle: &[u8]) -> Option<usize> {
        memmem::find(&self.input[from..], needle).map(|i| from + i)
    }

    /// Position of the '>' closing the current tag, skipping quoted
    /// attribute values
    pub fn find_tag_end_quoted(&self) -> Option<usize> {
        let mut quote: Option<u8> = None;
        for (i, &b) in self.remaining().iter().enumerate() {
            match (quote, b) {
                (None, b'"') | (None, b'\'') => quote = Some(b),
                (Some(q), _) if q == b => quote = None,
                (None, b'>') => return Some(self.pos + i),
                _ => {}
            }
        }
        None
    }

    /// Read an XML name at the cursor, advancing past it
    pub fn read_name(&mut self) -> Option<&'a [u8]> {
        let start = self.pos;
        match self.peek() {
            Some(b) if is_name_start_char(b) => self.pos += 1,
            _ => return None,
        }
        while let Some(b) = self.peek() {
            if !is_name_char(b) {
                break;
            }
            self.pos += 1;
        }
        Some(&self.input[start..self.pos])
    }
}

/// XML whitespace: space, tab, newline, carriage return
#[inline]
pub fn is_whitespace(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r')
}

/// Name start: ASCII letter, underscore, colon, or any non-ASCII byte
/// (input is valid UTF-8 by the time it reaches the scanner)
#[inline]
pub fn is_name_start_char(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b == b':' || b >= 0x80
}

/// Name character: name start chars plus digits, '-' and '.'
#[inline]
pub fn is_name_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.' | b':') || b >= 0x80
}
