//! Instance Registry
//!
//! Maps instance ids to live parser instances. Ids come from an atomic
//! counter, start at 1 and are never reused. The table lock is only held
//! for insert/lookup/remove; instances are handed out as `Arc` so a feed
//! runs without it and handlers may call back into the registry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use super::events::{DataHandler, EndHandler, Handlers, StartHandler};
use super::instance::ParserInstance;
use super::{InstanceId, ParserConfig};
use crate::error::Error;

static GLOBAL: OnceLock<Registry> = OnceLock::new();

/// Table of live parser instances
pub struct Registry {
    next_id: AtomicU32,
    instances: Mutex<HashMap<InstanceId, Arc<ParserInstance>>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            next_id: AtomicU32::new(1),
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// The process-wide registry used by the foreign boundaries
    pub fn global() -> &'static Registry {
        GLOBAL.get_or_init(Registry::new)
    }

    fn table(&self) -> MutexGuard<'_, HashMap<InstanceId, Arc<ParserInstance>>> {
        self.instances.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn allocate_id(&self) -> Result<InstanceId, Error> {
        self.next_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_add(1))
            .map(InstanceId::from_raw)
            .map_err(|_| Error::AllocationError("instance ids exhausted".to_string()))
    }

    /// Create an instance and return its id
    pub fn create(&self, config: ParserConfig) -> Result<InstanceId, Error> {
        let id = self.allocate_id()?;
        let instance = ParserInstance::new(id, config)?;
        log::debug!("created parser instance {} ({:?})", id, instance.config());
        self.table().insert(id, Arc::new(instance));
        Ok(id)
    }

    pub fn lookup(&self, id: InstanceId) -> Result<Arc<ParserInstance>, Error> {
        self.table().get(&id).cloned().ok_or(Error::UnknownInstance(id))
    }

    /// Remove an instance; the id is invalid afterwards. An in-flight feed
    /// keeps the instance alive until it returns.
    pub fn free(&self, id: InstanceId) -> Result<(), Error> {
        match self.table().remove(&id) {
            Some(_) => {
                log::debug!("freed parser instance {}", id);
                Ok(())
            }
            None => Err(Error::UnknownInstance(id)),
        }
    }

    /// Number of live instances
    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn feed(&self, id: InstanceId, chunk: &[u8], is_final: bool) -> Result<(), Error> {
        self.lookup(id)?.feed(chunk, is_final)
    }

    pub fn get_error(&self, id: InstanceId) -> Result<String, Error> {
        self.lookup(id)?.get_error()
    }

    pub fn current_line(&self, id: InstanceId) -> Result<u64, Error> {
        Ok(self.lookup(id)?.current_line())
    }

    pub fn current_column(&self, id: InstanceId) -> Result<u64, Error> {
        Ok(self.lookup(id)?.current_column())
    }

    pub fn attribute_count(&self, id: InstanceId) -> Result<usize, Error> {
        Ok(self.lookup(id)?.attribute_count())
    }

    pub fn set_handlers(
        &self,
        id: InstanceId,
        start: Option<StartHandler>,
        end: Option<EndHandler>,
    ) -> Result<(), Error> {
        self.lookup(id)?.set_handlers(start, end);
        Ok(())
    }

    pub fn set_character_data_handler(&self, id: InstanceId, handler: Option<DataHandler>) -> Result<(), Error> {
        self.lookup(id)?.set_character_data_handler(handler);
        Ok(())
    }

    pub fn set_default_handler(&self, id: InstanceId, handler: Option<DataHandler>) -> Result<(), Error> {
        self.lookup(id)?.set_default_handler(handler);
        Ok(())
    }

    pub fn replace_handlers(&self, id: InstanceId, handlers: Handlers) -> Result<(), Error> {
        self.lookup(id)?.replace_handlers(handlers);
        Ok(())
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{Attribute, Event, EventKind};
    use crate::error::ErrorCode;
    use rayon::prelude::*;

    fn recorder(registry: &Registry, id: InstanceId) -> Arc<Mutex<Vec<Event>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        registry
            .replace_handlers(id, Handlers::sink(move |e| sink.lock().unwrap().push(e)))
            .unwrap();
        events
    }

    /// Start, end and character data events, merging adjacent text
    fn structural(events: &[Event]) -> Vec<EventKind> {
        let mut out: Vec<EventKind> = Vec::new();
        for event in events {
            match (&event.kind, out.last_mut()) {
                (EventKind::DefaultData { .. }, _) => {}
                (EventKind::CharacterData { text }, Some(EventKind::CharacterData { text: prev })) => {
                    prev.extend_from_slice(text)
                }
                (kind, _) => out.push(kind.clone()),
            }
        }
        out
    }

    #[test]
    fn test_ids_are_distinct_and_increasing() {
        let registry = Registry::new();
        let a = registry.create(ParserConfig::new()).unwrap();
        let b = registry.create(ParserConfig::new()).unwrap();
        assert_eq!(a.raw(), 1);
        assert_eq!(b.raw(), a.raw() + 1);
        registry.free(a).unwrap();
        let c = registry.create(ParserConfig::new()).unwrap();
        assert!(c > b);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_end_to_end_document() {
        let registry = Registry::new();
        let id = registry.create(ParserConfig::new()).unwrap();
        let events = recorder(&registry, id);

        registry
            .feed(id, b"<root><child a='1'>hi</child></root>", true)
            .unwrap();

        assert_eq!(
            *events.lock().unwrap(),
            vec![
                Event::start(id, "root", vec![]),
                Event::start(id, "child", vec![Attribute::new("a", "1")]),
                Event::character_data(id, b"hi".to_vec()),
                Event::end(id, "child"),
                Event::end(id, "root"),
            ]
        );
        registry.free(id).unwrap();
    }

    #[test]
    fn test_end_to_end_unclosed() {
        let registry = Registry::new();
        let id = registry.create(ParserConfig::new()).unwrap();
        let err = registry.feed(id, b"<root><unclosed>", true).unwrap_err();
        let parse = err.as_parse().unwrap();
        assert_ne!(parse.code.code(), 0);
        let message = registry.get_error(id).unwrap();
        assert!(message == "unclosed token" || message == "mismatched tag");
        assert_eq!(registry.current_line(id).unwrap(), 1);
        assert_eq!(registry.current_column(id).unwrap(), 16);
    }

    #[test]
    fn test_unknown_and_freed_ids() {
        let registry = Registry::new();
        let bogus = InstanceId::from_raw(99);
        assert_eq!(registry.feed(bogus, b"<a/>", true), Err(Error::UnknownInstance(bogus)));

        let id = registry.create(ParserConfig::new()).unwrap();
        registry.free(id).unwrap();
        assert_eq!(registry.feed(id, b"<a/>", true), Err(Error::UnknownInstance(id)));
        assert_eq!(registry.get_error(id), Err(Error::UnknownInstance(id)));
        assert_eq!(registry.current_line(id), Err(Error::UnknownInstance(id)));
        assert_eq!(registry.set_handlers(id, None, None), Err(Error::UnknownInstance(id)));
        assert_eq!(registry.free(id), Err(Error::UnknownInstance(id)));
    }

    #[test]
    fn test_attribute_count() {
        let registry = Registry::new();
        let id = registry.create(ParserConfig::new()).unwrap();
        registry.feed(id, b"<a x=\"1\" y=\"2\"/>", true).unwrap();
        assert_eq!(registry.attribute_count(id).unwrap(), 2);
    }

    #[test]
    fn test_chunking_does_not_change_events() {
        let doc: &[u8] = b"<?xml version='1.0'?><doc k='v&amp;w'>\n  <item n=\"1\">one &lt; two</item>\
            <![CDATA[x]]><empty/>\n</doc>";
        let registry = Registry::new();

        let whole = registry.create(ParserConfig::new()).unwrap();
        let expected = recorder(&registry, whole);
        registry.feed(whole, doc, true).unwrap();
        let expected = structural(&expected.lock().unwrap());

        for size in [1, 2, 3, 7, 16] {
            let id = registry.create(ParserConfig::new()).unwrap();
            let events = recorder(&registry, id);
            let chunks: Vec<&[u8]> = doc.chunks(size).collect();
            for (i, chunk) in chunks.iter().enumerate() {
                registry.feed(id, chunk, i + 1 == chunks.len()).unwrap();
            }
            assert_eq!(structural(&events.lock().unwrap()), expected, "chunk size {}", size);
            registry.free(id).unwrap();
        }
    }

    #[test]
    fn test_interleaved_instances_stay_separate() {
        let registry = Registry::new();
        let a = registry.create(ParserConfig::new()).unwrap();
        let b = registry.create(ParserConfig::new()).unwrap();
        assert_eq!(b.raw(), a.raw() + 1);
        let events_a = recorder(&registry, a);
        let events_b = recorder(&registry, b);

        registry.feed(a, b"<alpha><one>", false).unwrap();
        registry.feed(b, b"<beta x='2'>", false).unwrap();
        registry.feed(a, b"</one></alpha>", true).unwrap();
        assert_eq!(registry.attribute_count(b).unwrap(), 1);
        assert_eq!(registry.attribute_count(a).unwrap(), 0);
        registry.feed(b, b"text</beta>", true).unwrap();

        let events_a = events_a.lock().unwrap();
        let events_b = events_b.lock().unwrap();
        assert!(events_a.iter().all(|e| e.instance == a));
        assert!(events_b.iter().all(|e| e.instance == b));
        assert_eq!(events_a.len(), 4);
        assert_eq!(
            *events_b,
            vec![
                Event::start(b, "beta", vec![Attribute::new("x", "2")]),
                Event::character_data(b, b"text".to_vec()),
                Event::end(b, "beta"),
            ]
        );
    }

    #[test]
    fn test_parallel_instances() {
        let registry = Registry::new();
        let results: Vec<(InstanceId, usize)> = (0..32)
            .into_par_iter()
            .map(|n| {
                let id = registry.create(ParserConfig::new()).unwrap();
                let events = recorder(&registry, id);
                let doc = format!("<r>{}</r>", "<i/>".repeat(n));
                registry.feed(id, doc.as_bytes(), true).unwrap();
                let count = events
                    .lock()
                    .unwrap()
                    .iter()
                    .filter(|e| e.instance == id && matches!(e.kind, EventKind::StartElement { .. }))
                    .count();
                registry.free(id).unwrap();
                (id, count)
            })
            .collect();

        for (n, (_, count)) in results.iter().enumerate() {
            assert_eq!(*count, n + 1);
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_handler_can_free_its_own_instance() {
        let registry = Arc::new(Registry::new());
        let id = registry.create(ParserConfig::new()).unwrap();
        let inner = registry.clone();
        let free_self: StartHandler = Arc::new(move |id, _, _| {
            let _ = inner.free(id);
        });
        registry.set_handlers(id, Some(free_self), None).unwrap();

        registry.feed(id, b"<a><b/></a>", true).unwrap();
        assert_eq!(registry.lookup(id).unwrap_err(), Error::UnknownInstance(id));
    }

    #[test]
    fn test_namespace_instance() {
        let registry = Registry::new();
        let id = registry
            .create(ParserConfig::new().with_namespace_separator('}'))
            .unwrap();
        let events = recorder(&registry, id);
        registry
            .feed(id, b"<r xmlns='urn:x' xmlns:q='urn:q' q:a='1'/>", true)
            .unwrap();
        assert_eq!(registry.attribute_count(id).unwrap(), 1);
        assert_eq!(
            events.lock().unwrap()[0],
            Event::start(id, "urn:x}r", vec![Attribute::new("urn:q}a", "1")])
        );
    }

    #[test]
    fn test_declared_encoding_errors() {
        let registry = Registry::new();
        let id = registry.create(ParserConfig::new().with_encoding("EBCDIC-XYZ")).unwrap();
        let err = registry.feed(id, b"<a/>", true).unwrap_err();
        assert_eq!(err.as_parse().map(|e| e.code), Some(ErrorCode::UnknownEncoding));
        assert_eq!(registry.get_error(id).unwrap(), "unknown encoding");
    }
}
