//! Namespace Processing
//!
//! Tracks `xmlns` bindings per open element and rewrites qualified names
//! into expanded names of the form `uri<separator>local`. Unprefixed
//! attributes never take the default namespace.

use crate::error::ErrorCode;
use memchr::memchr;

/// The namespace bound to the reserved `xml` prefix
pub const XML_NAMESPACE: &[u8] = b"http://www.w3.org/XML/1998/namespace";

#[derive(Debug, Clone)]
struct Binding {
    /// Empty for the default namespace
    prefix: Vec<u8>,
    /// Empty when the default namespace is undeclared (`xmlns=""`)
    uri: Vec<u8>,
}

/// Scoped prefix bindings
#[derive(Debug, Default)]
pub struct NamespaceStack {
    bindings: Vec<Binding>,
    /// Number of bindings in effect before each open element
    scopes: Vec<usize>,
}

impl NamespaceStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a scope for a new element
    pub fn push_scope(&mut self) {
        self.scopes.push(self.bindings.len());
    }

    /// Close the innermost scope, dropping its declarations
    pub fn pop_scope(&mut self) {
        if let Some(len) = self.scopes.pop() {
            self.bindings.truncate(len);
        }
    }

    /// Record a declaration in the innermost scope
    pub fn declare(&mut self, prefix: &[u8], uri: &[u8]) -> Result<(), ErrorCode> {
        if !prefix.is_empty() && uri.is_empty() {
            return Err(ErrorCode::UndeclaringPrefix);
        }
        if prefix == b"xmlns" || (prefix == b"xml" && uri != XML_NAMESPACE) {
            return Err(ErrorCode::UnboundPrefix);
        }
        self.bindings.push(Binding {
            prefix: prefix.to_vec(),
            uri: uri.to_vec(),
        });
        Ok(())
    }

    /// Namespace bound to `prefix` (empty prefix = default namespace)
    pub fn resolve(&self, prefix: &[u8]) -> Option<&[u8]> {
        if prefix == b"xml" {
            return Some(XML_NAMESPACE);
        }
        self.bindings
            .iter()
            .rev()
            .find(|b| b.prefix == prefix)
            .map(|b| b.uri.as_slice())
            .filter(|uri| !uri.is_empty())
    }

    /// Expand a qualified name into `out`
    pub fn expand(
        &self,
        qname: &[u8],
        is_attribute: bool,
        separator: u8,
        out: &mut Vec<u8>,
    ) -> Result<(), ErrorCode> {
        let (prefix, local) = split_qname(qname);
        let uri = match prefix {
            Some(p) => Some(self.resolve(p).ok_or(ErrorCode::UnboundPrefix)?),
            None if is_attribute => None,
            None => self.resolve(b""),
        };
        out.clear();
        if let Some(uri) = uri {
            out.reserve(uri.len() + 1 + local.len());
            out.extend_from_slice(uri);
            out.push(separator);
        }
        out.extend_from_slice(local);
        Ok(())
    }
}

/// Split a qualified name at its first colon
pub fn split_qname(name: &[u8]) -> (Option<&[u8]>, &[u8]) {
    match memchr(b':', name) {
        Some(colon) if colon > 0 && colon + 1 < name.len() => (Some(&name[..colon]), &name[colon + 1..]),
        _ => (None, name),
    }
}

/// If `name` is a namespace declaration attribute, the prefix it declares
/// (empty for the default namespace)
pub fn declared_prefix(name: &[u8]) -> Option<&[u8]> {
    if name == b"xmlns" {
        Some(b"")
    } else {
        name.strip_prefix(b"xmlns:")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expand(ns: &NamespaceStack, qname: &[u8], attr: bool) -> Result<String, ErrorCode> {
        let mut out = Vec::new();
        ns.expand(qname, attr, b'|', &mut out)?;
        Ok(String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_split_qname() {
        assert_eq!(split_qname(b"a:b"), (Some(b"a" as &[u8]), b"b" as &[u8]));
        assert_eq!(split_qname(b"plain"), (None, b"plain" as &[u8]));
        assert_eq!(split_qname(b":odd"), (None, b":odd" as &[u8]));
    }

    #[test]
    fn test_default_namespace_applies_to_elements_only() {
        let mut ns = NamespaceStack::new();
        ns.push_scope();
        ns.declare(b"", b"urn:d").unwrap();
        assert_eq!(expand(&ns, b"item", false).unwrap(), "urn:d|item");
        assert_eq!(expand(&ns, b"id", true).unwrap(), "id");
    }

    #[test]
    fn test_scopes_unwind() {
        let mut ns = NamespaceStack::new();
        ns.push_scope();
        ns.declare(b"p", b"urn:outer").unwrap();
        ns.push_scope();
        ns.declare(b"p", b"urn:inner").unwrap();
        assert_eq!(expand(&ns, b"p:x", false).unwrap(), "urn:inner|x");
        ns.pop_scope();
        assert_eq!(expand(&ns, b"p:x", false).unwrap(), "urn:outer|x");
        ns.pop_scope();
        assert_eq!(expand(&ns, b"p:x", false), Err(ErrorCode::UnboundPrefix));
    }

    #[test]
    fn test_xml_prefix_is_predeclared() {
        let ns = NamespaceStack::new();
        assert_eq!(
            expand(&ns, b"xml:lang", true).unwrap(),
            "http://www.w3.org/XML/1998/namespace|lang"
        );
    }

    #[test]
    fn test_undeclaring_prefix() {
        let mut ns = NamespaceStack::new();
        ns.push_scope();
        assert_eq!(ns.declare(b"p", b""), Err(ErrorCode::UndeclaringPrefix));
        assert!(ns.declare(b"", b"").is_ok());
    }

    #[test]
    fn test_declared_prefix() {
        assert_eq!(declared_prefix(b"xmlns"), Some(b"" as &[u8]));
        assert_eq!(declared_prefix(b"xmlns:a"), Some(b"a" as &[u8]));
        assert_eq!(declared_prefix(b"xmlnsx"), None);
    }
}
