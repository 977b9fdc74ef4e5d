//! Streaming XML Tokenizer
//!
//! Push-style tokenizer: the caller feeds byte chunks and the tokenizer
//! invokes a [`TokenHandler`] synchronously for every complete token.
//!
//! A token is only reported once it is complete, so the event sequence is
//! identical however the input is split into chunks. Incomplete input at the
//! end of a chunk stays in the pending buffer until the next call.
//!
//! Slices passed to the handler point into the tokenizer's own buffer and
//! are only valid for the duration of the callback.

use std::borrow::Cow;
use std::collections::TryReserveError;

use super::attributes::{parse_attributes, Attribute};
use super::encoding::{pseudo_attribute, Decoder};
use super::entities::{decode_text, find_invalid_char, normalize_line_ends};
use super::namespace::{declared_prefix, NamespaceStack};
use super::scanner::{is_name_start_char, is_whitespace, Scanner};
use crate::error::{ErrorCode, ParseError};
use memchr::{memchr, memmem};

/// Initial capacity of the pending buffer
pub const BUFFER_SIZE: usize = 8192;

/// Line (1-based) and column (0-based, in characters)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub line: u64,
    pub column: u64,
}

impl Default for Position {
    fn default() -> Self {
        Position { line: 1, column: 0 }
    }
}

/// Receiver of tokenizer callbacks
///
/// `raw` is the markup exactly as it appeared in the (decoded) input. It is
/// empty for the end event synthesized after an empty-element tag.
pub trait TokenHandler {
    fn start_element(&mut self, pos: Position, name: &[u8], attrs: &[Attribute<'_>], raw: &[u8]);

    fn end_element(&mut self, pos: Position, name: &[u8], raw: &[u8]);

    /// Text content and CDATA sections, entity references already decoded
    fn character_data(&mut self, pos: Position, text: &[u8], raw: &[u8]);

    /// Markup no other callback covers: XML declaration, comments,
    /// processing instructions, DOCTYPE, whitespace outside the root element
    fn default_data(&mut self, pos: Position, raw: &[u8]);
}

/// Tokenizer construction options
#[derive(Debug, Clone, Default)]
pub struct TokenizerConfig {
    /// Explicit encoding label; sniffed from BOM/declaration when `None`
    pub encoding: Option<String>,
    /// Enables namespace processing; expanded names are `uri<sep>local`
    pub namespace_separator: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Before the root element
    Prolog,
    Content,
    /// After the root element closed
    Epilog,
}

/// Failure at an offset into the pending buffer
#[derive(Debug, Clone, Copy)]
struct Fault {
    code: ErrorCode,
    at: usize,
}

impl Fault {
    fn new(code: ErrorCode, at: usize) -> Self {
        Fault { code, at }
    }
}

type Step = Result<Option<usize>, Fault>;

/// Incremental, well-formedness checking XML tokenizer
pub struct Tokenizer {
    separator: Option<u8>,
    decoder: Decoder,
    /// Decoded input not yet consumed by a complete token
    buffer: Vec<u8>,
    /// Decoded bytes discarded from the front of `buffer` so far
    consumed: u64,
    /// Offset in `buffer` up to which `line`/`column` have been computed
    tracked: usize,
    line: u64,
    column: u64,
    after_cr: bool,
    /// Raw qualified names of open elements
    open: Vec<Vec<u8>>,
    namespaces: NamespaceStack,
    phase: Phase,
    finished: bool,
    error: Option<ParseError>,
    /// Scratch space for expanded names
    name_buf: Vec<u8>,
}

impl Tokenizer {
    /// Create a tokenizer, reserving its pending buffer up front
    pub fn new(config: &TokenizerConfig) -> Result<Self, TryReserveError> {
        let mut buffer = Vec::new();
        buffer.try_reserve(BUFFER_SIZE)?;
        Ok(Tokenizer {
            separator: config.namespace_separator,
            decoder: Decoder::new(config.encoding.as_deref()),
            buffer,
            consumed: 0,
            tracked: 0,
            line: 1,
            column: 0,
            after_cr: false,
            open: Vec::new(),
            namespaces: NamespaceStack::new(),
            phase: Phase::Prolog,
            finished: false,
            error: None,
            name_buf: Vec::new(),
        })
    }

    /// Position of the most recently processed token (or of the error)
    pub fn position(&self) -> Position {
        Position {
            line: self.line,
            column: self.column,
        }
    }

    /// Feed a chunk, dispatching every complete token to `handler`
    ///
    /// Once an error has been returned, every later call returns the same
    /// error. After a successful final call, further calls fail with
    /// [`ErrorCode::Finished`].
    pub fn parse<H: TokenHandler + ?Sized>(
        &mut self,
        chunk: &[u8],
        is_final: bool,
        handler: &mut H,
    ) -> Result<(), ParseError> {
        if let Some(err) = &self.error {
            return Err(err.clone());
        }
        if self.finished {
            return Err(ParseError::new(ErrorCode::Finished, self.line, self.column));
        }

        if self.buffer.try_reserve(chunk.len()).is_err() {
            let err = ParseError::new(ErrorCode::NoMemory, self.line, self.column);
            self.error = Some(err.clone());
            return Err(err);
        }
        let decoded = self.decoder.decode(chunk, is_final, &mut self.buffer);
        let input_final = is_final && decoded.is_ok();

        let buf = std::mem::take(&mut self.buffer);
        let mut cursor = 0;
        let mut outcome = Ok(());
        while cursor < buf.len() {
            match self.step(&buf, cursor, input_final, handler) {
                Ok(Some(next)) => cursor = next,
                Ok(None) => break,
                Err(fault) => {
                    outcome = Err(fault);
                    break;
                }
            }
        }
        if outcome.is_ok() {
            outcome = match decoded {
                Err(code) => Err(Fault::new(code, buf.len())),
                Ok(()) if is_final => self.check_complete(buf.len()),
                Ok(()) => Ok(()),
            };
        }

        let result = match outcome {
            Ok(()) => {
                self.advance_to(&buf, cursor);
                if is_final {
                    self.finished = true;
                }
                Ok(())
            }
            Err(fault) => {
                self.advance_to(&buf, fault.at);
                let err = ParseError::new(fault.code, self.line, self.column);
                log::debug!("tokenizer failed: {}", err);
                self.error = Some(err.clone());
                Err(err)
            }
        };

        self.buffer = buf;
        self.discard(cursor);
        result
    }

    /// Drop consumed bytes from the front of the buffer
    fn discard(&mut self, upto: usize) {
        let upto = upto.min(self.tracked);
        if upto > 0 {
            self.buffer.drain(..upto);
            self.tracked -= upto;
            self.consumed += upto as u64;
        }
    }

    /// Move line/column tracking forward to `to`
    fn advance_to(&mut self, buf: &[u8], to: usize) {
        if to <= self.tracked {
            return;
        }
        for &b in &buf[self.tracked..to] {
            match b {
                b'\n' => {
                    if !self.after_cr {
                        self.line += 1;
                        self.column = 0;
                    }
                    self.after_cr = false;
                }
                b'\r' => {
                    self.line += 1;
                    self.column = 0;
                    self.after_cr = true;
                }
                // UTF-8 continuation bytes do not start a new character
                0x80..=0xBF => self.after_cr = false,
                _ => {
                    self.column += 1;
                    self.after_cr = false;
                }
            }
        }
        self.tracked = to;
    }

    /// Position of the token starting at `start`
    fn mark(&mut self, buf: &[u8], start: usize) -> Position {
        self.advance_to(buf, start);
        self.position()
    }

    /// End-of-document checks after the final chunk
    fn check_complete(&self, end: usize) -> Result<(), Fault> {
        match self.phase {
            Phase::Prolog => Err(Fault::new(ErrorCode::NoElements, end)),
            Phase::Content => Err(Fault::new(ErrorCode::UnclosedToken, end)),
            Phase::Epilog => Ok(()),
        }
    }

    /// Incomplete token at `start`: wait for more input unless this is
    /// the end of the document
    fn incomplete(start: usize, is_final: bool, code: ErrorCode) -> Step {
        if is_final {
            Err(Fault::new(code, start))
        } else {
            Ok(None)
        }
    }

    /// Process one token at `cursor`. Returns the offset after it, or None
    /// when the token is not complete yet.
    fn step<H: TokenHandler + ?Sized>(&mut self, buf: &[u8], cursor: usize, is_final: bool, handler: &mut H) -> Step {
        if buf[cursor] != b'<' {
            return self.text(buf, cursor, is_final, handler);
        }
        match buf.get(cursor + 1) {
            None => Self::incomplete(cursor, is_final, ErrorCode::UnclosedToken),
            Some(b'/') => self.end_tag(buf, cursor, is_final, handler),
            Some(b'?') => self.processing_instruction(buf, cursor, is_final, handler),
            Some(b'!') => self.bang(buf, cursor, is_final, handler),
            Some(&b) if is_name_start_char(b) => self.start_tag(buf, cursor, is_final, handler),
            Some(_) => Err(Fault::new(ErrorCode::InvalidToken, cursor + 1)),
        }
    }

    fn text<H: TokenHandler + ?Sized>(&mut self, buf: &[u8], cursor: usize, is_final: bool, handler: &mut H) -> Step {
        let end = match memchr(b'<', &buf[cursor..]) {
            Some(i) => cursor + i,
            None if is_final => buf.len(),
            None => return Ok(None),
        };
        let raw = &buf[cursor..end];

        if self.phase != Phase::Content {
            if let Some(i) = raw.iter().position(|&b| !is_whitespace(b)) {
                let code = if self.phase == Phase::Prolog {
                    ErrorCode::Syntax
                } else {
                    ErrorCode::JunkAfterDocElement
                };
                return Err(Fault::new(code, cursor + i));
            }
            let pos = self.mark(buf, cursor);
            handler.default_data(pos, raw);
            return Ok(Some(end));
        }

        if let Some(i) = find_invalid_char(raw) {
            return Err(Fault::new(ErrorCode::InvalidToken, cursor + i));
        }
        if let Some(i) = memmem::find(raw, b"]]>") {
            return Err(Fault::new(ErrorCode::InvalidToken, cursor + i));
        }
        let text = decode_text(raw).map_err(|e| Fault::new(e.code, cursor + e.offset))?;
        let pos = self.mark(buf, cursor);
        handler.character_data(pos, &text, raw);
        Ok(Some(end))
    }

    fn start_tag<H: TokenHandler + ?Sized>(&mut self, buf: &[u8], cursor: usize, is_final: bool, handler: &mut H) -> Step {
        let mut sc = Scanner::new(buf, cursor + 1);
        let end = match sc.find_tag_end_quoted() {
            Some(end) => end,
            None => return Self::incomplete(cursor, is_final, ErrorCode::UnclosedToken),
        };
        if self.phase == Phase::Epilog {
            return Err(Fault::new(ErrorCode::JunkAfterDocElement, cursor));
        }

        let name = sc.read_name().ok_or(Fault::new(ErrorCode::InvalidToken, cursor + 1))?;
        let name_end = sc.position();
        let is_empty = end > name_end && buf[end - 1] == b'/';
        let attr_end = if is_empty { end - 1 } else { end };
        let attrs = parse_attributes(&buf[name_end..attr_end])
            .map_err(|e| Fault::new(e.code, name_end + e.offset))?;
        let raw = &buf[cursor..=end];

        let pos = self.mark(buf, cursor);
        self.phase = Phase::Content;

        match self.separator {
            None => {
                handler.start_element(pos, name, &attrs, raw);
                if is_empty {
                    handler.end_element(pos, name, b"");
                }
            }
            Some(sep) => {
                self.namespaces.push_scope();
                for attr in &attrs {
                    if let Some(prefix) = declared_prefix(&attr.name) {
                        self.namespaces
                            .declare(prefix, &attr.value)
                            .map_err(|code| Fault::new(code, cursor))?;
                    }
                }
                let mut expanded = Vec::with_capacity(attrs.len());
                for attr in attrs {
                    if declared_prefix(&attr.name).is_some() {
                        continue;
                    }
                    let mut qname = Vec::new();
                    self.namespaces
                        .expand(&attr.name, true, sep, &mut qname)
                        .map_err(|code| Fault::new(code, cursor))?;
                    expanded.push(Attribute {
                        name: Cow::Owned(qname),
                        value: attr.value,
                    });
                }
                let mut element = std::mem::take(&mut self.name_buf);
                let resolved = self.namespaces.expand(name, false, sep, &mut element);
                self.name_buf = element;
                resolved.map_err(|code| Fault::new(code, cursor))?;

                handler.start_element(pos, &self.name_buf, &expanded, raw);
                if is_empty {
                    handler.end_element(pos, &self.name_buf, b"");
                    self.namespaces.pop_scope();
                }
            }
        }

        if !is_empty {
            self.open.push(name.to_vec());
        } else if self.open.is_empty() {
            self.phase = Phase::Epilog;
        }
        Ok(Some(end + 1))
    }

    fn end_tag<H: TokenHandler + ?Sized>(&mut self, buf: &[u8], cursor: usize, is_final: bool, handler: &mut H) -> Step {
        let mut sc = Scanner::new(buf, cursor + 2);
        let end = match sc.find_byte(b'>') {
            Some(end) => end,
            None => return Self::incomplete(cursor, is_final, ErrorCode::UnclosedToken),
        };
        let name = sc.read_name().ok_or(Fault::new(ErrorCode::InvalidToken, cursor + 2))?;
        sc.skip_whitespace();
        if sc.position() != end {
            return Err(Fault::new(ErrorCode::InvalidToken, sc.position()));
        }

        match self.open.last() {
            None if self.phase == Phase::Epilog => {
                return Err(Fault::new(ErrorCode::JunkAfterDocElement, cursor));
            }
            None => return Err(Fault::new(ErrorCode::InvalidToken, cursor)),
            Some(open) if open.as_slice() != name => {
                return Err(Fault::new(ErrorCode::TagMismatch, cursor + 2));
            }
            Some(_) => {}
        }

        let raw = &buf[cursor..=end];
        let pos = self.mark(buf, cursor);
        match self.separator {
            None => handler.end_element(pos, name, raw),
            Some(sep) => {
                let mut element = std::mem::take(&mut self.name_buf);
                let resolved = self.namespaces.expand(name, false, sep, &mut element);
                self.name_buf = element;
                resolved.map_err(|code| Fault::new(code, cursor))?;
                handler.end_element(pos, &self.name_buf, raw);
                self.namespaces.pop_scope();
            }
        }

        self.open.pop();
        if self.open.is_empty() {
            self.phase = Phase::Epilog;
        }
        Ok(Some(end + 1))
    }

    fn processing_instruction<H: TokenHandler + ?Sized>(
        &mut self,
        buf: &[u8],
        cursor: usize,
        is_final: bool,
        handler: &mut H,
    ) -> Step {
        let mut sc = Scanner::new(buf, cursor + 2);
        let close = match sc.find_seq_from(cursor + 2, b"?>") {
            Some(close) => close,
            None => return Self::incomplete(cursor, is_final, ErrorCode::UnclosedToken),
        };
        let target = sc.read_name().ok_or(Fault::new(ErrorCode::InvalidToken, cursor + 2))?;
        let body_start = sc.position();
        if body_start != close && !is_whitespace(buf[body_start]) {
            return Err(Fault::new(ErrorCode::InvalidToken, body_start));
        }
        let body = &buf[body_start..close];
        if let Some(i) = find_invalid_char(body) {
            return Err(Fault::new(ErrorCode::InvalidToken, body_start + i));
        }

        if target.eq_ignore_ascii_case(b"xml") {
            let at_start = self.consumed + cursor as u64 == 0;
            if !at_start || target != b"xml" {
                return Err(Fault::new(ErrorCode::MisplacedXmlPi, cursor));
            }
            check_xml_declaration(body).map_err(|code| Fault::new(code, cursor))?;
        }

        let pos = self.mark(buf, cursor);
        handler.default_data(pos, &buf[cursor..close + 2]);
        Ok(Some(close + 2))
    }

    /// Comments, CDATA sections and DOCTYPE
    fn bang<H: TokenHandler + ?Sized>(&mut self, buf: &[u8], cursor: usize, is_final: bool, handler: &mut H) -> Step {
        const COMMENT: &[u8] = b"<!--";
        const CDATA: &[u8] = b"<![CDATA[";
        const DOCTYPE: &[u8] = b"<!DOCTYPE";

        let sc = Scanner::new(buf, cursor);
        if sc.starts_with(COMMENT) {
            let close = match sc.find_seq_from(cursor + COMMENT.len(), b"-->") {
                Some(close) => close,
                None => return Self::incomplete(cursor, is_final, ErrorCode::UnclosedToken),
            };
            let body_start = cursor + COMMENT.len();
            let body = &buf[body_start..close];
            if let Some(i) = memmem::find(body, b"--") {
                return Err(Fault::new(ErrorCode::InvalidToken, body_start + i));
            }
            if body.last() == Some(&b'-') {
                return Err(Fault::new(ErrorCode::InvalidToken, close - 1));
            }
            if let Some(i) = find_invalid_char(body) {
                return Err(Fault::new(ErrorCode::InvalidToken, body_start + i));
            }
            let pos = self.mark(buf, cursor);
            handler.default_data(pos, &buf[cursor..close + 3]);
            return Ok(Some(close + 3));
        }

        if sc.starts_with(CDATA) {
            if self.phase != Phase::Content {
                return Err(Fault::new(ErrorCode::InvalidToken, cursor));
            }
            let close = match sc.find_seq_from(cursor + CDATA.len(), b"]]>") {
                Some(close) => close,
                None => return Self::incomplete(cursor, is_final, ErrorCode::UnclosedCdataSection),
            };
            let body_start = cursor + CDATA.len();
            let body = &buf[body_start..close];
            if let Some(i) = find_invalid_char(body) {
                return Err(Fault::new(ErrorCode::InvalidToken, body_start + i));
            }
            let text = normalize_line_ends(body);
            let pos = self.mark(buf, cursor);
            handler.character_data(pos, &text, &buf[cursor..close + 3]);
            return Ok(Some(close + 3));
        }

        if sc.starts_with(DOCTYPE) {
            if self.phase != Phase::Prolog {
                return Err(Fault::new(ErrorCode::InvalidToken, cursor));
            }
            let end = match find_doctype_end(buf, cursor + DOCTYPE.len()) {
                Some(end) => end,
                None => return Self::incomplete(cursor, is_final, ErrorCode::UnclosedToken),
            };
            let pos = self.mark(buf, cursor);
            handler.default_data(pos, &buf[cursor..=end]);
            return Ok(Some(end + 1));
        }

        if sc.is_prefix_of(COMMENT) || sc.is_prefix_of(CDATA) || sc.is_prefix_of(DOCTYPE) {
            return Self::incomplete(cursor, is_final, ErrorCode::UnclosedToken);
        }
        Err(Fault::new(ErrorCode::InvalidToken, cursor + 2))
    }
}

/// Closing '>' of a DOCTYPE, skipping quoted literals and the internal
/// subset. Comments and PIs inside the subset are skipped whole.
fn find_doctype_end(buf: &[u8], from: usize) -> Option<usize> {
    let mut quote: Option<u8> = None;
    let mut depth = 0usize;
    let mut i = from;
    while i < buf.len() {
        let b = buf[i];
        match quote {
            Some(q) if q == b => quote = None,
            Some(_) => {}
            None => match b {
                b'"' | b'\'' => quote = Some(b),
                b'[' => depth += 1,
                b']' => depth = depth.saturating_sub(1),
                b'>' if depth == 0 => return Some(i),
                b'<' if depth > 0 => {
                    let rest = &buf[i..];
                    let skip: Option<(&[u8], &[u8])> = if rest.starts_with(b"<!--") {
                        Some((b"<!--", b"-->"))
                    } else if rest.starts_with(b"<?") {
                        Some((b"<?", b"?>"))
                    } else {
                        None
                    };
                    if let Some((open, close)) = skip {
                        let body = i + open.len();
                        i = body + memmem::find(&buf[body..], close)? + close.len();
                        continue;
                    }
                }
                _ => {}
            },
        }
        i += 1;
    }
    None
}

/// Validate the body of `<?xml ...?>`
fn check_xml_declaration(body: &[u8]) -> Result<(), ErrorCode> {
    let version = pseudo_attribute(body, b"version").ok_or(ErrorCode::XmlDecl)?;
    if !version.starts_with(b"1.") || version.len() < 3 || !version[2..].iter().all(u8::is_ascii_digit) {
        return Err(ErrorCode::XmlDecl);
    }
    if let Some(encoding) = pseudo_attribute(body, b"encoding") {
        let valid = encoding.first().is_some_and(u8::is_ascii_alphabetic)
            && encoding
                .iter()
                .all(|&b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'));
        if !valid {
            return Err(ErrorCode::XmlDecl);
        }
    }
    if let Some(standalone) = pseudo_attribute(body, b"standalone") {
        if standalone != b"yes" && standalone != b"no" {
            return Err(ErrorCode::XmlDecl);
        }
    }
    Ok(())
}
