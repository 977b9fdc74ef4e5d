//! Element Tree
//!
//! A small element tree (tag, attributes, text, tail, children) built from
//! the bridge's event stream. In namespace mode names use Clark notation,
//! `{uri}local`.

pub mod builder;
pub mod parser;

pub use builder::TreeBuilder;
pub use parser::{parse_document, parse_documents, TreeParser};

use std::fmt;

use crate::bridge::Attribute;
use crate::error::Error;

/// An XML element
///
/// `<tag attributes>text<child/>...</tag>tail`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    pub tag: String,
    /// Attributes in document order
    pub attributes: Vec<Attribute>,
    pub text: Option<String>,
    pub tail: Option<String>,
    pub children: Vec<Element>,
}

impl Element {
    pub fn new(tag: impl Into<String>, attributes: Vec<Attribute>) -> Self {
        Element {
            tag: tag.into(),
            attributes,
            ..Default::default()
        }
    }

    /// Attribute value; a repeated attribute resolves to its last value
    pub fn get(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .rev()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }

    /// Attribute value, or `default` when it is absent
    pub fn get_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.get(name).unwrap_or(default)
    }

    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attributes.iter_mut().rev().find(|a| a.name == name) {
            Some(attr) => attr.value = value,
            None => self.attributes.push(Attribute::new(name, value)),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.attributes.iter().map(|a| a.name.as_str())
    }

    pub fn append(&mut self, child: Element) {
        self.children.push(child);
    }

    pub fn extend(&mut self, children: impl IntoIterator<Item = Element>) {
        self.children.extend(children);
    }

    /// Insert a subelement at `index`; past the end it is appended
    pub fn insert(&mut self, index: usize, child: Element) {
        let index = index.min(self.children.len());
        self.children.insert(index, child);
    }

    /// Remove and return the subelement at `index`
    pub fn remove(&mut self, index: usize) -> Option<Element> {
        (index < self.children.len()).then(|| self.children.remove(index))
    }

    /// Drop subelements, attributes, text and tail
    pub fn clear(&mut self) {
        self.attributes.clear();
        self.children.clear();
        self.text = None;
        self.tail = None;
    }

    /// Number of subelements
    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// First direct child with this tag
    pub fn find(&self, tag: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.tag == tag)
    }

    /// This element and all descendants, depth first
    pub fn iter(&self) -> impl Iterator<Item = &Element> {
        let mut stack = vec![self];
        std::iter::from_fn(move || {
            let next = stack.pop()?;
            stack.extend(next.children.iter().rev());
            Some(next)
        })
    }

    /// Concatenated text content of this element and its descendants
    pub fn itertext(&self) -> String {
        let mut out = String::new();
        collect_text(self, &mut out);
        out
    }
}

fn collect_text(element: &Element, out: &mut String) {
    if let Some(text) = &element.text {
        out.push_str(text);
    }
    for child in &element.children {
        collect_text(child, out);
        if let Some(tail) = &child.tail {
            out.push_str(tail);
        }
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<Element {}", self.tag)?;
        for attr in &self.attributes {
            write!(f, " {}={:?}", attr.name, attr.value)?;
        }
        write!(f, ">")
    }
}

/// Tree construction failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    /// Document ended with elements still open
    MissingEndTags,
    /// No element was seen
    MissingRoot,
    /// A second top-level element started
    MultipleRoots,
    EndTagMismatch { expected: String, found: String },
    /// The parser rejected the document
    Parse(Error),
}

impl fmt::Display for TreeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TreeError::MissingEndTags => write!(f, "missing end tags"),
            TreeError::MissingRoot => write!(f, "missing top level element"),
            TreeError::MultipleRoots => write!(f, "multiple top level elements"),
            TreeError::EndTagMismatch { expected, found } => {
                write!(f, "end tag mismatch (expected {}, got {})", expected, found)
            }
            TreeError::Parse(e) => write!(f, "Parsing finished with error: {}", e),
        }
    }
}

impl std::error::Error for TreeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TreeError::Parse(e) => Some(e),
            _ => None,
        }
    }
}

impl From<Error> for TreeError {
    fn from(e: Error) -> Self {
        TreeError::Parse(e)
    }
}
