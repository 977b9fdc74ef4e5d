//! Event Bridge
//!
//! Keeps a table of live parser instances addressed by integer id and
//! republishes tokenizer callbacks as owned events to per-instance handlers.
//!
//! - `registry`: id allocation, lookup and teardown
//! - `instance`: one tokenizer plus its state machine and status block
//! - `events`: owned event records, handler references, tokenizer adapter

pub mod events;
pub mod instance;
pub mod registry;

pub use events::{Attribute, DataHandler, EndHandler, Event, EventKind, Handlers, StartHandler};
pub use instance::{ParserInstance, State};
pub use registry::Registry;

use std::fmt;

use crate::core::tokenizer::TokenizerConfig;
use crate::error::Error;

/// Process-unique, non-zero handle for a parser instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(u32);

impl InstanceId {
    #[inline]
    pub fn from_raw(raw: u32) -> Self {
        InstanceId(raw)
    }

    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Options for a new parser instance
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParserConfig {
    /// Encoding label; detected from the input when `None`
    pub encoding: Option<String>,
    /// Namespace processing with this separator between URI and local name
    pub namespace_separator: Option<char>,
}

impl ParserConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = Some(encoding.into());
        self
    }

    /// Namespace processing with ':' as separator
    pub fn with_namespaces(self) -> Self {
        self.with_namespace_separator(':')
    }

    pub fn with_namespace_separator(mut self, separator: char) -> Self {
        self.namespace_separator = Some(separator);
        self
    }

    pub fn is_namespace_aware(&self) -> bool {
        self.namespace_separator.is_some()
    }

    /// Validate and lower to tokenizer options
    pub(crate) fn tokenizer_config(&self) -> Result<TokenizerConfig, Error> {
        let namespace_separator = match self.namespace_separator {
            None => None,
            Some(c) if c.is_ascii() && c != '\0' => Some(c as u8),
            Some(c) => {
                return Err(Error::AllocationError(format!(
                    "namespace separator {:?} is not a single ASCII character",
                    c
                )))
            }
        };
        Ok(TokenizerConfig {
            encoding: self.encoding.clone(),
            namespace_separator,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = ParserConfig::new().with_encoding("UTF-16").with_namespaces();
        assert_eq!(config.encoding.as_deref(), Some("UTF-16"));
        assert_eq!(config.namespace_separator, Some(':'));
        assert!(config.is_namespace_aware());
        assert!(!ParserConfig::new().is_namespace_aware());
    }

    #[test]
    fn test_non_ascii_separator_rejected() {
        let config = ParserConfig::new().with_namespace_separator('→');
        assert!(matches!(config.tokenizer_config(), Err(Error::AllocationError(_))));
    }

    #[test]
    fn test_instance_id_display() {
        let id = InstanceId::from_raw(42);
        assert_eq!(id.raw(), 42);
        assert_eq!(id.to_string(), "42");
    }
}
