//! Element tree builder
//!
//! Turns a sequence of start/data/end calls into an [`Element`] tree.
//! Text before the first child goes to `text`, text after an element's
//! end tag goes to that element's `tail`.

use super::{Element, TreeError};
use crate::bridge::Attribute;

#[derive(Debug, Default)]
pub struct TreeBuilder {
    /// Open elements, innermost last
    open: Vec<Element>,
    /// Completed top-level element
    root: Option<Element>,
    data: Vec<u8>,
    /// Pending data belongs to the tail of the last closed element
    tail: bool,
    started: bool,
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, tag: String, attributes: Vec<Attribute>) -> Result<(), TreeError> {
        if self.root.is_some() {
            return Err(TreeError::MultipleRoots);
        }
        self.flush();
        self.open.push(Element::new(tag, attributes));
        self.tail = false;
        self.started = true;
        Ok(())
    }

    pub fn data(&mut self, text: &[u8]) {
        self.data.extend_from_slice(text);
    }

    pub fn end(&mut self, tag: &str) -> Result<(), TreeError> {
        self.flush();
        let element = self.open.pop().ok_or_else(|| TreeError::EndTagMismatch {
            expected: String::new(),
            found: tag.to_string(),
        })?;
        if element.tag != tag {
            return Err(TreeError::EndTagMismatch {
                expected: element.tag,
                found: tag.to_string(),
            });
        }
        match self.open.last_mut() {
            Some(parent) => parent.children.push(element),
            None => self.root = Some(element),
        }
        self.tail = true;
        Ok(())
    }

    /// Flush buffers and return the document element
    pub fn close(mut self) -> Result<Element, TreeError> {
        if !self.open.is_empty() {
            return Err(TreeError::MissingEndTags);
        }
        self.flush();
        self.root.ok_or(TreeError::MissingRoot)
    }

    /// Number of currently open elements
    pub fn depth(&self) -> usize {
        self.open.len()
    }

    fn flush(&mut self) {
        if self.data.is_empty() {
            return;
        }
        let text = String::from_utf8_lossy(&self.data).into_owned();
        self.data.clear();
        if !self.started {
            return;
        }
        let target = if self.tail {
            match self.open.last_mut() {
                Some(parent) => parent.children.last_mut(),
                None => self.root.as_mut(),
            }
            .map(|e| &mut e.tail)
        } else {
            self.open.last_mut().map(|e| &mut e.text)
        };
        if let Some(slot) = target {
            slot.get_or_insert_with(String::new).push_str(&text);
        }
    }
}
