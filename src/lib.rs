//! xmlbridge - Event-driven XML parsing bridge
//!
//! Drives an incremental, well-formedness checking XML tokenizer over
//! caller-supplied byte chunks and republishes every parse event to
//! handlers registered on a parser instance. Instances live in a table
//! keyed by integer id and are reachable from:
//!
//! - Rust: [`bridge::Registry`] with closure handlers
//! - C: the `xmlbridge_*` functions in [`ffi`]
//! - Elixir: the NIFs below (`XmlBridge.Native`), with pids as handlers
//!
//! [`tree`] builds an element tree on top of the event stream.

use rustler::{Binary, Encoder, Env, LocalPid, Term};

pub mod bridge;
pub mod core;
pub mod error;
pub mod ffi;
mod mailbox;
mod term;
pub mod tree;

use bridge::{InstanceId, ParserConfig, Registry};
use error::Error;
use term::{error_to_term, event_to_term, status_to_term};

// ============================================================================
// Allocator Configuration
// ============================================================================

#[cfg(feature = "memory_tracking")]
mod tracking {
    use std::alloc::{GlobalAlloc, Layout};
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub static ALLOCATED: AtomicUsize = AtomicUsize::new(0);
    pub static PEAK_ALLOCATED: AtomicUsize = AtomicUsize::new(0);

    pub struct TrackingAllocator;

    #[cfg(feature = "mimalloc")]
    static UNDERLYING: mimalloc::MiMalloc = mimalloc::MiMalloc;

    #[cfg(not(feature = "mimalloc"))]
    static UNDERLYING: std::alloc::System = std::alloc::System;

    unsafe impl GlobalAlloc for TrackingAllocator {
        unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
            let ptr = UNDERLYING.alloc(layout);
            if !ptr.is_null() {
                let current = ALLOCATED.fetch_add(layout.size(), Ordering::Relaxed) + layout.size();
                PEAK_ALLOCATED.fetch_max(current, Ordering::Relaxed);
            }
            ptr
        }

        unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
            ALLOCATED.fetch_sub(layout.size(), Ordering::Relaxed);
            UNDERLYING.dealloc(ptr, layout)
        }
    }
}

#[cfg(feature = "memory_tracking")]
#[global_allocator]
static GLOBAL: tracking::TrackingAllocator = tracking::TrackingAllocator;

#[cfg(all(feature = "mimalloc", not(feature = "memory_tracking")))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

// ============================================================================
// Memory Tracking NIFs
// ============================================================================

#[cfg(feature = "memory_tracking")]
use std::sync::atomic::Ordering;

#[cfg(feature = "memory_tracking")]
#[rustler::nif]
fn get_rust_memory() -> usize {
    tracking::ALLOCATED.load(Ordering::SeqCst)
}

#[cfg(feature = "memory_tracking")]
#[rustler::nif]
fn get_rust_memory_peak() -> usize {
    tracking::PEAK_ALLOCATED.load(Ordering::SeqCst)
}

#[cfg(feature = "memory_tracking")]
#[rustler::nif]
fn reset_rust_memory_stats() -> (usize, usize) {
    let current = tracking::ALLOCATED.load(Ordering::SeqCst);
    let peak = tracking::PEAK_ALLOCATED.swap(current, Ordering::SeqCst);
    (current, peak)
}

#[cfg(not(feature = "memory_tracking"))]
#[rustler::nif]
fn get_rust_memory() -> usize {
    0
}

#[cfg(not(feature = "memory_tracking"))]
#[rustler::nif]
fn get_rust_memory_peak() -> usize {
    0
}

#[cfg(not(feature = "memory_tracking"))]
#[rustler::nif]
fn reset_rust_memory_stats() -> (usize, usize) {
    (0, 0)
}

// ============================================================================
// Parser Instances
// ============================================================================

fn created<'a>(env: Env<'a>, result: Result<InstanceId, Error>) -> Term<'a> {
    match result {
        Ok(id) => (term::ok(), id.raw()).encode(env),
        Err(e) => error_to_term(env, &e),
    }
}

/// Create an instance: `{:ok, id}` or `{:error, reason}`
/// `encoding` is nil to detect it from the input
#[rustler::nif]
fn create<'a>(env: Env<'a>, encoding: Option<String>, namespace_aware: bool) -> Term<'a> {
    let mut config = ParserConfig {
        encoding,
        namespace_separator: None,
    };
    if namespace_aware {
        config = config.with_namespaces();
    }
    created(env, Registry::global().create(config))
}

/// Create a namespace-aware instance with a one-character separator
#[rustler::nif]
fn create_ns<'a>(env: Env<'a>, encoding: Option<String>, separator: &str) -> Term<'a> {
    let mut chars = separator.chars();
    let result = match (chars.next(), chars.next()) {
        (Some(sep), None) => Registry::global().create(ParserConfig {
            encoding,
            namespace_separator: Some(sep),
        }),
        _ => Err(Error::AllocationError(format!(
            "namespace separator {:?} is not a single character",
            separator
        ))),
    };
    created(env, result)
}

/// Feed a chunk. Events are sent to the handler pids before this returns.
#[rustler::nif]
fn feed<'a>(env: Env<'a>, id: u32, chunk: Binary<'a>, is_final: bool) -> Term<'a> {
    let (result, events) =
        mailbox::collect(|| Registry::global().feed(InstanceId::from_raw(id), chunk.as_slice(), is_final));
    for (pid, event) in events {
        // A dead handler process just misses its events
        let _ = env.send(&pid, event_to_term(env, event));
    }
    status_to_term(env, result)
}

/// `{:ok, message}` or `{:error, reason}`
#[rustler::nif]
fn get_error<'a>(env: Env<'a>, id: u32) -> Term<'a> {
    match Registry::global().get_error(InstanceId::from_raw(id)) {
        Ok(message) => (term::ok(), message).encode(env),
        Err(e) => error_to_term(env, &e),
    }
}

fn query<'a, T: Encoder>(env: Env<'a>, result: Result<T, Error>) -> Term<'a> {
    match result {
        Ok(value) => (term::ok(), value).encode(env),
        Err(e) => error_to_term(env, &e),
    }
}

#[rustler::nif]
fn current_line<'a>(env: Env<'a>, id: u32) -> Term<'a> {
    query(env, Registry::global().current_line(InstanceId::from_raw(id)))
}

#[rustler::nif]
fn current_column<'a>(env: Env<'a>, id: u32) -> Term<'a> {
    query(env, Registry::global().current_column(InstanceId::from_raw(id)))
}

#[rustler::nif]
fn attribute_count<'a>(env: Env<'a>, id: u32) -> Term<'a> {
    query(env, Registry::global().attribute_count(InstanceId::from_raw(id)))
}

/// Set the pids receiving start/end element messages (nil clears)
#[rustler::nif]
fn set_handlers<'a>(env: Env<'a>, id: u32, start: Option<LocalPid>, end: Option<LocalPid>) -> Term<'a> {
    let handlers = mailbox::element_handlers(start, end);
    let result = Registry::global().set_handlers(InstanceId::from_raw(id), handlers.start, handlers.end);
    status_to_term(env, result)
}

/// Set the pids receiving character data and default messages (nil clears)
#[rustler::nif]
fn set_data_handlers<'a>(
    env: Env<'a>,
    id: u32,
    character_data: Option<LocalPid>,
    default: Option<LocalPid>,
) -> Term<'a> {
    let handlers = mailbox::data_handlers(character_data, default);
    let id = InstanceId::from_raw(id);
    let result = Registry::global()
        .set_character_data_handler(id, handlers.character_data)
        .and_then(|()| Registry::global().set_default_handler(id, handlers.default));
    status_to_term(env, result)
}

#[rustler::nif]
fn free<'a>(env: Env<'a>, id: u32) -> Term<'a> {
    status_to_term(env, Registry::global().free(InstanceId::from_raw(id)))
}

// ============================================================================
// NIF Initialization
// ============================================================================

fn load(_env: Env, _info: Term) -> bool {
    log::debug!("xmlbridge NIF loaded");
    true
}

rustler::init!("Elixir.XmlBridge.Native", load = load);
