//! Outbox for BEAM handler delivery
//!
//! Handlers registered from Elixir are pids. Events cannot be sent while
//! the tokenizer is running (no `Env` is reachable from inside a handler),
//! so the handler closures queue them here and the feeding NIF sends them
//! before it returns. The queue is thread-local: a NIF call runs on one
//! scheduler thread from start to finish.
//!
//! Pid handlers only deliver through the `feed` NIF. An instance fed from
//! Rust or C drops their events instead of queueing them.

use std::cell::RefCell;

use rustler::LocalPid;

use crate::bridge::{Event, Handlers};

/// Queue that only accepts items while a collection is open
struct Outbox<T> {
    open: bool,
    queue: Vec<T>,
}

impl<T> Outbox<T> {
    const fn new() -> Self {
        Outbox {
            open: false,
            queue: Vec::new(),
        }
    }

    /// Returns false if the item was dropped
    fn post(&mut self, item: T) -> bool {
        if self.open {
            self.queue.push(item);
        }
        self.open
    }

    fn open(&mut self) {
        self.open = true;
    }

    fn close(&mut self) -> Vec<T> {
        self.open = false;
        std::mem::take(&mut self.queue)
    }
}

thread_local! {
    static OUTBOX: RefCell<Outbox<(LocalPid, Event)>> = const { RefCell::new(Outbox::new()) };
}

/// Closes the outbox even if `f` unwinds
struct Collecting;

impl Drop for Collecting {
    fn drop(&mut self) {
        OUTBOX.with(|outbox| outbox.borrow_mut().close());
    }
}

/// Queue an event for `pid`; dropped unless a [`collect`] is running
pub fn post(pid: LocalPid, event: Event) {
    let queued = OUTBOX.with(|outbox| outbox.borrow_mut().post((pid, event)));
    if !queued {
        log::trace!("dropping pid event outside a NIF feed");
    }
}

/// Run `f`, returning its result and every event posted meanwhile, in order
pub fn collect<R>(f: impl FnOnce() -> R) -> (R, Vec<(LocalPid, Event)>) {
    OUTBOX.with(|outbox| outbox.borrow_mut().open());
    let guard = Collecting;
    let result = f();
    let events = OUTBOX.with(|outbox| outbox.borrow_mut().close());
    drop(guard);
    (result, events)
}

/// Start and end handlers posting to pids; `None` leaves a handler unset
pub fn element_handlers(start: Option<LocalPid>, end: Option<LocalPid>) -> Handlers {
    let mut handlers = Handlers::new();
    if let Some(pid) = start {
        handlers = handlers.on_start(move |id, tag, attrs| post(pid, Event::start(id, tag, attrs)));
    }
    if let Some(pid) = end {
        handlers = handlers.on_end(move |id, tag| post(pid, Event::end(id, tag)));
    }
    handlers
}

/// Character data and default handlers posting to pids
pub fn data_handlers(character_data: Option<LocalPid>, default: Option<LocalPid>) -> Handlers {
    let mut handlers = Handlers::new();
    if let Some(pid) = character_data {
        handlers = handlers.on_character_data(move |id, text| post(pid, Event::character_data(id, text)));
    }
    if let Some(pid) = default {
        handlers = handlers.on_default(move |id, text| post(pid, Event::default_data(id, text)));
    }
    handlers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbox_drops_when_closed() {
        let mut outbox = Outbox::new();
        assert!(!outbox.post(1));
        outbox.open();
        assert!(outbox.post(2));
        assert!(outbox.post(3));
        assert_eq!(outbox.close(), vec![2, 3]);
        assert!(!outbox.post(4));
        assert!(outbox.close().is_empty());
    }

    #[test]
    fn test_collect_closes_after_unwind() {
        let outcome = std::panic::catch_unwind(|| collect(|| -> u32 { panic!("handler failed") }));
        assert!(outcome.is_err());
        assert!(!OUTBOX.with(|outbox| outbox.borrow().open));
        let (value, events) = collect(|| 7);
        assert_eq!(value, 7);
        assert!(events.is_empty());
    }
}
