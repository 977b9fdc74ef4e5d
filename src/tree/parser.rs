//! Tree parsing through a registry instance
//!
//! [`TreeParser`] owns one parser instance whose handlers drive a
//! [`TreeBuilder`]. With namespaces enabled the instance reports
//! `uri}local`, which is rewritten to Clark notation `{uri}local`; the
//! rewrites are memoized in an LRU cache since documents repeat a small
//! set of names.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use lru::LruCache;
use rayon::prelude::*;

use super::{Element, TreeBuilder, TreeError};
use crate::bridge::{Attribute, Handlers, InstanceId, ParserConfig, Registry};

/// Distinct names remembered by the Clark-notation rewriter
pub const NAME_CACHE_SIZE: usize = 1024;

/// Separator between namespace URI and local name in namespace mode
const CLARK_SEPARATOR: char = '}';

struct Shared {
    builder: TreeBuilder,
    names: LruCache<String, String>,
    /// First builder error; reported by `close`
    error: Option<TreeError>,
}

impl Shared {
    fn new() -> Self {
        let capacity = NonZeroUsize::new(NAME_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN);
        Shared {
            builder: TreeBuilder::new(),
            names: LruCache::new(capacity),
            error: None,
        }
    }

    /// `uri}local` → `{uri}local`
    fn fix_name(&mut self, key: String) -> String {
        if let Some(name) = self.names.get(&key) {
            return name.clone();
        }
        let name = if key.contains(CLARK_SEPARATOR) {
            format!("{{{}", key)
        } else {
            key.clone()
        };
        self.names.put(key, name.clone());
        name
    }

    fn record(&mut self, result: Result<(), TreeError>) {
        if let Err(e) = result {
            self.error.get_or_insert(e);
        }
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Incremental element tree parser
pub struct TreeParser<'r> {
    registry: &'r Registry,
    id: InstanceId,
    shared: Arc<Mutex<Shared>>,
}

impl<'r> TreeParser<'r> {
    /// Create a parser on `registry`; `namespaces` enables Clark-notation names
    pub fn new(registry: &'r Registry, namespaces: bool) -> Result<Self, TreeError> {
        let mut config = ParserConfig::new();
        if namespaces {
            config = config.with_namespace_separator(CLARK_SEPARATOR);
        }
        Self::with_config(registry, config)
    }

    /// Create a parser with explicit options. A namespace separator other
    /// than '}' is passed through unchanged.
    pub fn with_config(registry: &'r Registry, config: ParserConfig) -> Result<Self, TreeError> {
        let id = registry.create(config)?;
        let shared = Arc::new(Mutex::new(Shared::new()));

        let (on_start, on_end, on_data) = (shared.clone(), shared.clone(), shared.clone());
        let handlers = Handlers::new()
            .on_start(move |_, tag, attributes: Vec<Attribute>| {
                let mut state = lock(&on_start);
                let tag = state.fix_name(tag);
                let attributes = attributes
                    .into_iter()
                    .map(|a| Attribute {
                        name: state.fix_name(a.name),
                        value: a.value,
                    })
                    .collect();
                let result = state.builder.start(tag, attributes);
                state.record(result);
            })
            .on_end(move |_, tag| {
                let mut state = lock(&on_end);
                let tag = state.fix_name(tag);
                let result = state.builder.end(&tag);
                state.record(result);
            })
            .on_character_data(move |_, text| lock(&on_data).builder.data(&text));
        registry.replace_handlers(id, handlers)?;

        Ok(TreeParser { registry, id, shared })
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    /// Feed part of the document
    pub fn feed(&self, data: &[u8]) -> Result<(), TreeError> {
        self.registry.feed(self.id, data, false)?;
        Ok(())
    }

    /// Finish the document and return its root element
    pub fn close(self) -> Result<Element, TreeError> {
        self.finish(b"")
    }

    /// Parse a complete document in one call
    pub fn parse_whole(self, data: &[u8]) -> Result<Element, TreeError> {
        self.finish(data)
    }

    fn finish(self, data: &[u8]) -> Result<Element, TreeError> {
        self.registry.feed(self.id, data, true)?;
        let mut state = lock(&self.shared);
        if let Some(e) = state.error.take() {
            return Err(e);
        }
        std::mem::take(&mut state.builder).close()
    }
}

impl Drop for TreeParser<'_> {
    fn drop(&mut self) {
        let _ = self.registry.free(self.id);
    }
}

/// Parse a whole document with namespace processing on the global registry
pub fn parse_document(data: &[u8]) -> Result<Element, TreeError> {
    TreeParser::new(Registry::global(), true)?.parse_whole(data)
}

/// Parse independent documents in parallel, one instance each
pub fn parse_documents(documents: &[&[u8]]) -> Vec<Result<Element, TreeError>> {
    documents.par_iter().map(|doc| parse_document(doc)).collect()
}
