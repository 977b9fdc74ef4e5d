//! XML Encoding Detection and Streaming Conversion
//!
//! Input arrives in arbitrary chunks, so the decoder keeps any incomplete
//! multi-byte sequence between calls. Everything handed to the tokenizer is
//! valid UTF-8.
//!
//! Without an explicit encoding the decoder sniffs the byte order mark and
//! the XML declaration (`<?xml ... encoding="..."?>`) before committing.

use crate::error::ErrorCode;
use memchr::memmem;

/// How long to wait for the end of an XML declaration while sniffing
const SNIFF_LIMIT: usize = 1024;

/// Supported document encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XmlEncoding {
    Utf8,
    Utf16Le,
    Utf16Be,
    Latin1,
    Ascii,
}

impl XmlEncoding {
    /// Resolve an encoding label (case-insensitive)
    ///
    /// Plain "UTF-16" resolves to big endian; a byte order mark at the
    /// start of the stream overrides the byte order.
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim().to_ascii_uppercase();
        match label.as_str() {
            "UTF-8" | "UTF8" => Some(XmlEncoding::Utf8),
            "UTF-16" | "UTF16" | "UTF-16BE" | "UTF16BE" => Some(XmlEncoding::Utf16Be),
            "UTF-16LE" | "UTF16LE" => Some(XmlEncoding::Utf16Le),
            "ISO-8859-1" | "ISO8859-1" | "LATIN1" | "LATIN-1" => Some(XmlEncoding::Latin1),
            "US-ASCII" | "ASCII" => Some(XmlEncoding::Ascii),
            _ => None,
        }
    }

    #[inline]
    pub fn is_utf16(self) -> bool {
        matches!(self, XmlEncoding::Utf16Le | XmlEncoding::Utf16Be)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// No encoding given: look at the BOM and declaration first
    Sniff,
    /// Explicit encoding, byte order mark not checked yet
    Start(XmlEncoding),
    Fixed(XmlEncoding),
    /// Explicit label that no decoder exists for
    Unknown,
}

/// Incremental decoder producing UTF-8
pub struct Decoder {
    state: State,
    /// Undecoded bytes carried over from previous chunks
    pending: Vec<u8>,
}

impl Decoder {
    /// Create a decoder for an optional explicit encoding label
    pub fn new(label: Option<&str>) -> Self {
        let state = match label {
            None => State::Sniff,
            Some(l) => match XmlEncoding::from_label(l) {
                Some(enc) => State::Start(enc),
                None => State::Unknown,
            },
        };
        Decoder {
            state,
            pending: Vec::new(),
        }
    }

    /// Decode `chunk`, appending UTF-8 to `out`
    ///
    /// On error, everything before the offending byte has already been
    /// appended to `out`.
    pub fn decode(&mut self, chunk: &[u8], is_final: bool, out: &mut Vec<u8>) -> Result<(), ErrorCode> {
        self.pending.extend_from_slice(chunk);

        loop {
            match self.state {
                State::Unknown => return Err(ErrorCode::UnknownEncoding),
                State::Sniff => match self.sniff(is_final)? {
                    Some((enc, bom)) => {
                        self.pending.drain(..bom);
                        self.state = State::Fixed(enc);
                    }
                    None => return Ok(()),
                },
                State::Start(enc) => match self.check_bom(enc, is_final) {
                    Some((enc, bom)) => {
                        self.pending.drain(..bom);
                        self.state = State::Fixed(enc);
                    }
                    None => return Ok(()),
                },
                State::Fixed(_) => break,
            }
        }

        let State::Fixed(enc) = self.state else {
            return Ok(());
        };
        let input = std::mem::take(&mut self.pending);
        match enc {
            XmlEncoding::Utf8 => decode_utf8(&input, is_final, out, &mut self.pending),
            XmlEncoding::Utf16Le => decode_utf16(&input, is_final, out, &mut self.pending, u16::from_le_bytes),
            XmlEncoding::Utf16Be => decode_utf16(&input, is_final, out, &mut self.pending, u16::from_be_bytes),
            XmlEncoding::Latin1 => {
                for &b in &input {
                    push_char(out, char::from(b));
                }
                Ok(())
            }
            XmlEncoding::Ascii => match input.iter().position(|&b| b >= 0x80) {
                Some(bad) => {
                    out.extend_from_slice(&input[..bad]);
                    Err(ErrorCode::InvalidToken)
                }
                None => {
                    out.extend_from_slice(&input);
                    Ok(())
                }
            },
        }
    }

    /// Decide the encoding of an unlabelled stream.
    /// Returns the encoding and the number of BOM bytes to skip, or None
    /// when more input is needed.
    fn sniff(&self, is_final: bool) -> Result<Option<(XmlEncoding, usize)>, ErrorCode> {
        let p = self.pending.as_slice();
        match p {
            [0xFF, 0xFE, ..] => return Ok(Some((XmlEncoding::Utf16Le, 2))),
            [0xFE, 0xFF, ..] => return Ok(Some((XmlEncoding::Utf16Be, 2))),
            [b'<', 0x00, ..] => return Ok(Some((XmlEncoding::Utf16Le, 0))),
            [0x00, b'<', ..] => return Ok(Some((XmlEncoding::Utf16Be, 0))),
            [0xEF, 0xBB, 0xBF, ..] => return Ok(Some((XmlEncoding::Utf8, 3))),
            _ => {}
        }
        if !is_final && (p.len() < 2 || (p.len() < 3 && p.starts_with(&[0xEF]))) {
            return Ok(None);
        }

        const DECL: &[u8] = b"<?xml";
        if p.len() < DECL.len() && DECL.starts_with(p) && !is_final {
            return Ok(None);
        }
        if !p.starts_with(DECL) {
            return Ok(Some((XmlEncoding::Utf8, 0)));
        }
        let end = match memmem::find(p, b"?>") {
            Some(end) => end,
            None if !is_final && p.len() < SNIFF_LIMIT => return Ok(None),
            // Malformed declaration; the tokenizer reports it
            None => return Ok(Some((XmlEncoding::Utf8, 0))),
        };
        match pseudo_attribute(&p[DECL.len()..end], b"encoding") {
            None => Ok(Some((XmlEncoding::Utf8, 0))),
            Some(label) => {
                let label = std::str::from_utf8(label).map_err(|_| ErrorCode::UnknownEncoding)?;
                match XmlEncoding::from_label(label) {
                    Some(enc) if enc.is_utf16() => Err(ErrorCode::IncorrectEncoding),
                    Some(enc) => Ok(Some((enc, 0))),
                    None => Err(ErrorCode::UnknownEncoding),
                }
            }
        }
    }

    /// Byte order mark handling for an explicitly labelled stream
    fn check_bom(&self, enc: XmlEncoding, is_final: bool) -> Option<(XmlEncoding, usize)> {
        let p = self.pending.as_slice();
        match enc {
            XmlEncoding::Utf16Le | XmlEncoding::Utf16Be => match p {
                [0xFF, 0xFE, ..] => Some((XmlEncoding::Utf16Le, 2)),
                [0xFE, 0xFF, ..] => Some((XmlEncoding::Utf16Be, 2)),
                _ if p.len() < 2 && !is_final => None,
                _ => Some((enc, 0)),
            },
            XmlEncoding::Utf8 => {
                const BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
                if p.starts_with(BOM) {
                    Some((enc, 3))
                } else if p.len() < 3 && BOM.starts_with(p) && !is_final {
                    None
                } else {
                    Some((enc, 0))
                }
            }
            _ => Some((enc, 0)),
        }
    }
}

fn decode_utf8(input: &[u8], is_final: bool, out: &mut Vec<u8>, carry: &mut Vec<u8>) -> Result<(), ErrorCode> {
    match std::str::from_utf8(input) {
        Ok(_) => {
            out.extend_from_slice(input);
            Ok(())
        }
        Err(e) => {
            let valid = e.valid_up_to();
            out.extend_from_slice(&input[..valid]);
            match e.error_len() {
                Some(_) => Err(ErrorCode::InvalidToken),
                None if is_final => Err(ErrorCode::PartialChar),
                None => {
                    carry.extend_from_slice(&input[valid..]);
                    Ok(())
                }
            }
        }
    }
}

fn decode_utf16(
    input: &[u8],
    is_final: bool,
    out: &mut Vec<u8>,
    carry: &mut Vec<u8>,
    unit: fn([u8; 2]) -> u16,
) -> Result<(), ErrorCode> {
    let mut pos = 0;
    while pos + 2 <= input.len() {
        let u = unit([input[pos], input[pos + 1]]);
        match u {
            0xD800..=0xDBFF => {
                if pos + 4 > input.len() {
                    break;
                }
                let low = unit([input[pos + 2], input[pos + 3]]);
                if !(0xDC00..=0xDFFF).contains(&low) {
                    return Err(ErrorCode::InvalidToken);
                }
                let cp = 0x10000 + (((u as u32) - 0xD800) << 10) + ((low as u32) - 0xDC00);
                push_char(out, char::from_u32(cp).ok_or(ErrorCode::InvalidToken)?);
                pos += 4;
            }
            0xDC00..=0xDFFF => return Err(ErrorCode::InvalidToken),
            _ => {
                push_char(out, char::from_u32(u as u32).ok_or(ErrorCode::InvalidToken)?);
                pos += 2;
            }
        }
    }
    if pos < input.len() {
        if is_final {
            return Err(ErrorCode::PartialChar);
        }
        carry.extend_from_slice(&input[pos..]);
    }
    Ok(())
}

#[inline]
fn push_char(out: &mut Vec<u8>, c: char) {
    let mut buf = [0u8; 4];
    out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
}

/// Value of a pseudo-attribute (`version`, `encoding`, `standalone`) in the
/// body of an XML declaration
pub fn pseudo_attribute<'a>(decl: &'a [u8], name: &[u8]) -> Option<&'a [u8]> {
    let mut from = 0;
    while let Some(found) = memmem::find(&decl[from..], name) {
        let mut pos = from + found + name.len();
        let preceded_by_space = from + found == 0
            || super::scanner::is_whitespace(decl[from + found - 1]);
        while pos < decl.len() && super::scanner::is_whitespace(decl[pos]) {
            pos += 1;
        }
        if preceded_by_space && decl.get(pos) == Some(&b'=') {
            pos += 1;
            while pos < decl.len() && super::scanner::is_whitespace(decl[pos]) {
                pos += 1;
            }
            let quote = *decl.get(pos)?;
            if quote != b'"' && quote != b'\'' {
                return None;
            }
            let start = pos + 1;
            let len = decl[start..].iter().position(|&b| b == quote)?;
            return Some(&decl[start..start + len]);
        }
        from = from + found + name.len();
    }
    None
}
