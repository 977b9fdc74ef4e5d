//! Owned events and handler dispatch
//!
//! The tokenizer hands out slices into its own buffer that are only valid
//! for one callback. [`EventBridge`] copies every payload into owned values
//! tagged with the instance id and moves them into the registered handler.

use std::fmt;
use std::sync::Arc;

use super::instance::ParserInstance;
use super::InstanceId;
use crate::core::attributes::Attribute as RawAttribute;
use crate::core::tokenizer::{Position, TokenHandler};

/// An attribute as delivered to handlers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: String,
}

impl Attribute {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Attribute {
            name: name.into(),
            value: value.into(),
        }
    }

    fn copy_from(raw: &RawAttribute<'_>) -> Self {
        Attribute {
            name: copy_str(&raw.name),
            value: copy_str(&raw.value),
        }
    }
}

/// Payload of an [`Event`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    StartElement { tag: String, attributes: Vec<Attribute> },
    EndElement { tag: String },
    CharacterData { text: Vec<u8> },
    DefaultData { text: Vec<u8> },
}

/// A parse event tagged with the instance that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub instance: InstanceId,
    pub kind: EventKind,
}

impl Event {
    pub fn start(instance: InstanceId, tag: impl Into<String>, attributes: Vec<Attribute>) -> Self {
        Event {
            instance,
            kind: EventKind::StartElement {
                tag: tag.into(),
                attributes,
            },
        }
    }

    pub fn end(instance: InstanceId, tag: impl Into<String>) -> Self {
        Event {
            instance,
            kind: EventKind::EndElement { tag: tag.into() },
        }
    }

    pub fn character_data(instance: InstanceId, text: impl Into<Vec<u8>>) -> Self {
        Event {
            instance,
            kind: EventKind::CharacterData { text: text.into() },
        }
    }

    pub fn default_data(instance: InstanceId, text: impl Into<Vec<u8>>) -> Self {
        Event {
            instance,
            kind: EventKind::DefaultData { text: text.into() },
        }
    }
}

pub type StartHandler = Arc<dyn Fn(InstanceId, String, Vec<Attribute>) + Send + Sync>;
pub type EndHandler = Arc<dyn Fn(InstanceId, String) + Send + Sync>;
/// Character data and default data handler; receives exactly the reported bytes
pub type DataHandler = Arc<dyn Fn(InstanceId, Vec<u8>) + Send + Sync>;

/// Handler references registered on one instance
///
/// Start, end and character data events without a handler are passed to
/// the default handler as raw markup; with no default handler they are
/// dropped.
#[derive(Clone, Default)]
pub struct Handlers {
    pub start: Option<StartHandler>,
    pub end: Option<EndHandler>,
    pub character_data: Option<DataHandler>,
    pub default: Option<DataHandler>,
}

impl Handlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_start<F>(mut self, f: F) -> Self
    where
        F: Fn(InstanceId, String, Vec<Attribute>) + Send + Sync + 'static,
    {
        self.start = Some(Arc::new(f));
        self
    }

    pub fn on_end<F>(mut self, f: F) -> Self
    where
        F: Fn(InstanceId, String) + Send + Sync + 'static,
    {
        self.end = Some(Arc::new(f));
        self
    }

    pub fn on_character_data<F>(mut self, f: F) -> Self
    where
        F: Fn(InstanceId, Vec<u8>) + Send + Sync + 'static,
    {
        self.character_data = Some(Arc::new(f));
        self
    }

    pub fn on_default<F>(mut self, f: F) -> Self
    where
        F: Fn(InstanceId, Vec<u8>) + Send + Sync + 'static,
    {
        self.default = Some(Arc::new(f));
        self
    }

    /// All four handlers forwarding [`Event`] records to one sink
    pub fn sink<F>(f: F) -> Self
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        let (start, end, chars, default) = (f.clone(), f.clone(), f.clone(), f);
        Handlers::new()
            .on_start(move |id, tag, attrs| start(Event::start(id, tag, attrs)))
            .on_end(move |id, tag| end(Event::end(id, tag)))
            .on_character_data(move |id, text| chars(Event::character_data(id, text)))
            .on_default(move |id, text| default(Event::default_data(id, text)))
    }
}

impl fmt::Debug for Handlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handlers")
            .field("start", &self.start.is_some())
            .field("end", &self.end.is_some())
            .field("character_data", &self.character_data.is_some())
            .field("default", &self.default.is_some())
            .finish()
    }
}

/// Tokenizer callbacks → owned events for one instance
///
/// Handler references are cloned out of the instance for each event, so a
/// handler may replace handlers (or query its own instance) while running.
pub(crate) struct EventBridge<'a> {
    instance: &'a ParserInstance,
}

impl<'a> EventBridge<'a> {
    pub(crate) fn new(instance: &'a ParserInstance) -> Self {
        EventBridge { instance }
    }

    fn fallback(&self, default: Option<DataHandler>, raw: &[u8]) {
        if let Some(handler) = default {
            if !raw.is_empty() {
                handler(self.instance.id(), raw.to_vec());
            }
        }
    }
}

impl TokenHandler for EventBridge<'_> {
    fn start_element(&mut self, pos: Position, name: &[u8], attrs: &[RawAttribute<'_>], raw: &[u8]) {
        let status = self.instance.status();
        status.enter(pos);
        status.set_attribute_count(attrs.len());

        let (handler, default) = self.instance.with_handlers(|h| (h.start.clone(), h.default.clone()));
        match handler {
            Some(handler) => {
                let attributes = attrs.iter().map(Attribute::copy_from).collect();
                handler(self.instance.id(), copy_str(name), attributes);
            }
            None => self.fallback(default, raw),
        }
    }

    fn end_element(&mut self, pos: Position, name: &[u8], raw: &[u8]) {
        self.instance.status().enter(pos);
        let (handler, default) = self.instance.with_handlers(|h| (h.end.clone(), h.default.clone()));
        match handler {
            Some(handler) => handler(self.instance.id(), copy_str(name)),
            None => self.fallback(default, raw),
        }
    }

    fn character_data(&mut self, pos: Position, text: &[u8], raw: &[u8]) {
        self.instance.status().enter(pos);
        let (handler, default) = self
            .instance
            .with_handlers(|h| (h.character_data.clone(), h.default.clone()));
        match handler {
            Some(handler) => handler(self.instance.id(), text.to_vec()),
            None => self.fallback(default, raw),
        }
    }

    fn default_data(&mut self, pos: Position, raw: &[u8]) {
        self.instance.status().enter(pos);
        let default = self.instance.with_handlers(|h| h.default.clone());
        self.fallback(default, raw);
    }
}

/// Tokenizer output is UTF-8, so the lossy path never rewrites anything
#[inline]
fn copy_str(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{ParserConfig, Registry};
    use std::borrow::Cow;
    use std::sync::Mutex;

    fn recording() -> (Handlers, Arc<Mutex<Vec<Event>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        (Handlers::sink(move |e| sink.lock().unwrap().push(e)), events)
    }

    #[test]
    fn test_embedded_nul_copied_by_length() {
        let registry = Registry::new();
        let id = registry.create(ParserConfig::new()).unwrap();
        let instance = registry.lookup(id).unwrap();
        let (handlers, events) = recording();
        instance.replace_handlers(handlers);

        // Well-formed XML cannot carry NUL, so drive the bridge directly
        let mut bridge = EventBridge::new(&instance);
        bridge.character_data(Position::default(), b"a\0b\0c", b"a\0b\0c");

        let events = events.lock().unwrap();
        assert_eq!(events[0], Event::character_data(id, b"a\0b\0c".to_vec()));
        match &events[0].kind {
            EventKind::CharacterData { text } => assert_eq!(text.len(), 5),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_attributes_copied_in_order() {
        let registry = Registry::new();
        let id = registry.create(ParserConfig::new()).unwrap();
        let instance = registry.lookup(id).unwrap();
        let (handlers, events) = recording();
        instance.replace_handlers(handlers);

        let attrs = vec![
            RawAttribute::new(b"z", Cow::Borrowed(b"1")),
            RawAttribute::new(b"a", Cow::Owned(b"2".to_vec())),
            RawAttribute::new(b"z", Cow::Borrowed(b"3")),
        ];
        let mut bridge = EventBridge::new(&instance);
        bridge.start_element(Position { line: 4, column: 2 }, b"e", &attrs, b"<e ...>");

        assert_eq!(
            events.lock().unwrap()[0],
            Event::start(
                id,
                "e",
                vec![Attribute::new("z", "1"), Attribute::new("a", "2"), Attribute::new("z", "3")]
            )
        );
        assert_eq!(instance.attribute_count(), 3);
        assert_eq!(instance.current_line(), 4);
        assert_eq!(instance.current_column(), 2);
    }

    #[test]
    fn test_missing_handler_routes_raw_markup_to_default() {
        let registry = Registry::new();
        let id = registry.create(ParserConfig::new()).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        registry
            .lookup(id)
            .unwrap()
            .replace_handlers(Handlers::new().on_default(move |_, text| sink.lock().unwrap().push(text)));

        registry.feed(id, b"<r a='1'>x &amp; y</r>", true).unwrap();
        let seen: Vec<String> = seen
            .lock()
            .unwrap()
            .iter()
            .map(|t| String::from_utf8(t.clone()).unwrap())
            .collect();
        assert_eq!(seen, vec!["<r a='1'>", "x &amp; y", "</r>"]);
    }

    #[test]
    fn test_no_handlers_drops_events() {
        let registry = Registry::new();
        let id = registry.create(ParserConfig::new()).unwrap();
        assert!(registry.feed(id, b"<r><c/>text</r>", true).is_ok());
        assert_eq!(registry.attribute_count(id).unwrap(), 0);
    }

    #[test]
    fn test_handlers_debug() {
        let handlers = Handlers::new().on_end(|_, _| {});
        let shown = format!("{:?}", handlers);
        assert!(shown.contains("end: true"));
        assert!(shown.contains("start: false"));
    }
}
