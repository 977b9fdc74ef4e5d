//! Core XML parsing primitives
//!
//! - Scanner: memchr-accelerated delimiter detection
//! - Tokenizer: push-mode state machine dispatching to a TokenHandler
//! - Entities: predefined entity and character reference decoding
//! - Attributes: start-tag attribute parsing
//! - Encoding: BOM/declaration sniffing and conversion to UTF-8
//! - Namespace: prefix scopes and expanded-name construction

pub mod attributes;
pub mod encoding;
pub mod entities;
pub mod namespace;
pub mod scanner;
pub mod tokenizer;
