//! Error Types
//!
//! Parse errors carry a stable numeric code (expat numbering, so existing
//! bindings can keep their tables) plus the line/column of the offending
//! byte. Registry-level failures are reported through [`Error`].

use std::fmt;

use crate::bridge::InstanceId;

/// Tokenizer-reported error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    NoMemory = 1,
    Syntax = 2,
    NoElements = 3,
    InvalidToken = 4,
    UnclosedToken = 5,
    PartialChar = 6,
    TagMismatch = 7,
    JunkAfterDocElement = 9,
    UndefinedEntity = 11,
    BadCharRef = 14,
    MisplacedXmlPi = 17,
    UnknownEncoding = 18,
    IncorrectEncoding = 19,
    UnclosedCdataSection = 20,
    UnboundPrefix = 27,
    UndeclaringPrefix = 28,
    XmlDecl = 30,
    /// A handler panicked mid-feed
    Aborted = 35,
    Finished = 36,
}

impl ErrorCode {
    /// Numeric code as reported across the foreign boundary
    #[inline]
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Human-readable description
    pub fn description(self) -> &'static str {
        match self {
            ErrorCode::NoMemory => "out of memory",
            ErrorCode::Syntax => "syntax error",
            ErrorCode::NoElements => "no element found",
            ErrorCode::InvalidToken => "not well-formed (invalid token)",
            ErrorCode::UnclosedToken => "unclosed token",
            ErrorCode::PartialChar => "partial character",
            ErrorCode::TagMismatch => "mismatched tag",
            ErrorCode::JunkAfterDocElement => "junk after document element",
            ErrorCode::UndefinedEntity => "undefined entity",
            ErrorCode::BadCharRef => "reference to invalid character number",
            ErrorCode::MisplacedXmlPi => "XML or text declaration not at start of entity",
            ErrorCode::UnknownEncoding => "unknown encoding",
            ErrorCode::IncorrectEncoding => "encoding specified in XML declaration is incorrect",
            ErrorCode::UnclosedCdataSection => "unclosed CDATA section",
            ErrorCode::UnboundPrefix => "unbound prefix",
            ErrorCode::UndeclaringPrefix => "must not undeclare prefix",
            ErrorCode::XmlDecl => "XML declaration not well-formed",
            ErrorCode::Aborted => "parsing aborted",
            ErrorCode::Finished => "parsing finished",
        }
    }

    /// Look up a code by its numeric value
    pub fn from_code(code: i32) -> Option<Self> {
        const ALL: [ErrorCode; 19] = [
            ErrorCode::NoMemory,
            ErrorCode::Syntax,
            ErrorCode::NoElements,
            ErrorCode::InvalidToken,
            ErrorCode::UnclosedToken,
            ErrorCode::PartialChar,
            ErrorCode::TagMismatch,
            ErrorCode::JunkAfterDocElement,
            ErrorCode::UndefinedEntity,
            ErrorCode::BadCharRef,
            ErrorCode::MisplacedXmlPi,
            ErrorCode::UnknownEncoding,
            ErrorCode::IncorrectEncoding,
            ErrorCode::UnclosedCdataSection,
            ErrorCode::UnboundPrefix,
            ErrorCode::UndeclaringPrefix,
            ErrorCode::XmlDecl,
            ErrorCode::Aborted,
            ErrorCode::Finished,
        ];
        ALL.into_iter().find(|c| c.code() == code)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// A structured parse failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub code: ErrorCode,
    /// 1-based line of the offending byte
    pub line: u64,
    /// 0-based column (in characters) of the offending byte
    pub column: u64,
}

impl ParseError {
    pub fn new(code: ErrorCode, line: u64, column: u64) -> Self {
        ParseError { code, line, column }
    }

    /// Description of the error code
    pub fn message(&self) -> &'static str {
        self.code.description()
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Error [{}] at line {} column {}: {}",
            self.code.code(),
            self.line,
            self.column,
            self.code.description()
        )
    }
}

impl std::error::Error for ParseError {}

/// Errors returned by registry and instance operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Tokenizer or instance could not be constructed
    AllocationError(String),
    /// No live instance with this id
    UnknownInstance(InstanceId),
    /// The tokenizer rejected the input
    Parse(ParseError),
    /// Error state was queried but no error has been recorded
    NoError(InstanceId),
    /// The instance is already being fed (re-entrantly or from another thread)
    Busy(InstanceId),
}

impl Error {
    /// The parse error, if this is one
    pub fn as_parse(&self) -> Option<&ParseError> {
        match self {
            Error::Parse(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::AllocationError(reason) => write!(f, "cannot create parser: {}", reason),
            Error::UnknownInstance(id) => write!(f, "unknown parser instance {}", id),
            Error::Parse(e) => fmt::Display::fmt(e, f),
            Error::NoError(id) => write!(f, "parser instance {} has no recorded error", id),
            Error::Busy(id) => write!(f, "parser instance {} is already being fed", id),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Parse(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ParseError> for Error {
    fn from(e: ParseError) -> Self {
        Error::Parse(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(ErrorCode::TagMismatch.code(), 7);
        assert_eq!(ErrorCode::UnclosedToken.code(), 5);
        assert_eq!(ErrorCode::Finished.code(), 36);
        assert_eq!(ErrorCode::from_code(11), Some(ErrorCode::UndefinedEntity));
        assert_eq!(ErrorCode::from_code(35), Some(ErrorCode::Aborted));
        assert_eq!(ErrorCode::from_code(1), Some(ErrorCode::NoMemory));
        assert_eq!(ErrorCode::from_code(10), None);
    }

    #[test]
    fn test_parse_error_display() {
        let err = ParseError::new(ErrorCode::TagMismatch, 3, 14);
        assert_eq!(err.to_string(), "Error [7] at line 3 column 14: mismatched tag");
        assert_eq!(err.message(), "mismatched tag");
    }

    #[test]
    fn test_error_source() {
        use std::error::Error as _;
        let err = Error::from(ParseError::new(ErrorCode::Syntax, 1, 0));
        assert!(err.source().is_some());
        assert!(Error::Busy(InstanceId::from_raw(4)).source().is_none());
    }
}
