//! Parser Instance
//!
//! One tokenizer with its handler references, state machine and a status
//! block (position, attribute count, state, last error). The status block
//! is readable without the tokenizer lock, so handlers can query their own
//! instance while a feed is in progress.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};

use super::events::{DataHandler, EndHandler, EventBridge, Handlers, StartHandler};
use super::{InstanceId, ParserConfig};
use crate::core::tokenizer::{Position, Tokenizer};
use crate::error::{Error, ErrorCode, ParseError};

/// Feeding state of an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Created,
    Feeding,
    /// A final chunk was accepted
    Finished,
    /// The tokenizer reported an error
    Failed,
}

pub(crate) struct Status {
    line: AtomicU64,
    column: AtomicU64,
    attributes: AtomicUsize,
    state: Mutex<State>,
    error: Mutex<Option<ParseError>>,
}

impl Status {
    fn new() -> Self {
        let start = Position::default();
        Status {
            line: AtomicU64::new(start.line),
            column: AtomicU64::new(start.column),
            attributes: AtomicUsize::new(0),
            state: Mutex::new(State::Created),
            error: Mutex::new(None),
        }
    }

    /// Record the position of the event being delivered
    pub(crate) fn enter(&self, pos: Position) {
        self.line.store(pos.line, Ordering::Relaxed);
        self.column.store(pos.column, Ordering::Relaxed);
    }

    pub(crate) fn set_attribute_count(&self, count: usize) {
        self.attributes.store(count, Ordering::Relaxed);
    }

    fn state(&self) -> State {
        *lock(&self.state)
    }

    fn set_state(&self, state: State) {
        *lock(&self.state) = state;
    }

    fn error(&self) -> Option<ParseError> {
        lock(&self.error).clone()
    }

    fn set_error(&self, error: ParseError) {
        *lock(&self.error) = Some(error);
    }
}

/// Lock a mutex, recovering the data if a handler panicked while it was held
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A live parser: exclusively owns its tokenizer
pub struct ParserInstance {
    id: InstanceId,
    config: ParserConfig,
    tokenizer: Mutex<Tokenizer>,
    handlers: Mutex<Handlers>,
    status: Status,
}

impl ParserInstance {
    pub(crate) fn new(id: InstanceId, config: ParserConfig) -> Result<Self, Error> {
        let tokenizer = Tokenizer::new(&config.tokenizer_config()?)
            .map_err(|e| Error::AllocationError(e.to_string()))?;
        Ok(ParserInstance {
            id,
            config,
            tokenizer: Mutex::new(tokenizer),
            handlers: Mutex::new(Handlers::default()),
            status: Status::new(),
        })
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn config(&self) -> &ParserConfig {
        &self.config
    }

    pub fn state(&self) -> State {
        self.status.state()
    }

    pub(crate) fn status(&self) -> &Status {
        &self.status
    }

    /// Feed a chunk; handlers run synchronously before this returns
    pub fn feed(&self, chunk: &[u8], is_final: bool) -> Result<(), Error> {
        let mut tokenizer = match self.tokenizer.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return Err(Error::Busy(self.id)),
            Err(TryLockError::Poisoned(_)) => return Err(Error::Parse(self.abandon())),
        };

        match self.status.state() {
            State::Failed => {
                if let Some(err) = self.status.error() {
                    return Err(Error::Parse(err));
                }
            }
            State::Finished => {
                let pos = tokenizer.position();
                let err = ParseError::new(ErrorCode::Finished, pos.line, pos.column);
                self.status.set_error(err.clone());
                return Err(Error::Parse(err));
            }
            State::Created | State::Feeding => self.status.set_state(State::Feeding),
        }

        log::trace!("instance {}: feeding {} bytes (final: {})", self.id, chunk.len(), is_final);
        let mut bridge = EventBridge::new(self);
        let result = tokenizer.parse(chunk, is_final, &mut bridge);
        self.status.enter(tokenizer.position());

        match result {
            Ok(()) => {
                if is_final {
                    self.status.set_state(State::Finished);
                }
                Ok(())
            }
            Err(err) => {
                self.status.set_error(err.clone());
                self.status.set_state(State::Failed);
                Err(Error::Parse(err))
            }
        }
    }

    /// A handler panicked during an earlier feed, leaving the tokenizer
    /// mid-token. The instance fails for good.
    fn abandon(&self) -> ParseError {
        if let (State::Failed, Some(err)) = (self.status.state(), self.status.error()) {
            return err;
        }
        let err = ParseError::new(ErrorCode::Aborted, self.current_line(), self.current_column());
        log::debug!("instance {}: {}", self.id, err);
        self.status.set_error(err.clone());
        self.status.set_state(State::Failed);
        err
    }

    /// Description of the recorded error
    pub fn get_error(&self) -> Result<String, Error> {
        self.status
            .error()
            .map(|e| e.message().to_string())
            .ok_or(Error::NoError(self.id))
    }

    /// The recorded error with its position
    pub fn last_error(&self) -> Option<ParseError> {
        self.status.error()
    }

    /// 1-based line of the current event, or of the end of consumed input
    pub fn current_line(&self) -> u64 {
        self.status.line.load(Ordering::Relaxed)
    }

    /// 0-based column, counted in characters
    pub fn current_column(&self) -> u64 {
        self.status.column.load(Ordering::Relaxed)
    }

    /// Attributes on the most recently started element
    pub fn attribute_count(&self) -> usize {
        self.status.attributes.load(Ordering::Relaxed)
    }

    /// Replace the start and end handlers
    pub fn set_handlers(&self, start: Option<StartHandler>, end: Option<EndHandler>) {
        let mut handlers = lock(&self.handlers);
        handlers.start = start;
        handlers.end = end;
    }

    pub fn set_character_data_handler(&self, handler: Option<DataHandler>) {
        lock(&self.handlers).character_data = handler;
    }

    pub fn set_default_handler(&self, handler: Option<DataHandler>) {
        lock(&self.handlers).default = handler;
    }

    /// Replace all handlers at once
    pub fn replace_handlers(&self, handlers: Handlers) {
        *lock(&self.handlers) = handlers;
    }

    /// Run `f` with the handler table locked; the lock is released before
    /// any handler is invoked
    pub(crate) fn with_handlers<R>(&self, f: impl FnOnce(&Handlers) -> R) -> R {
        f(&lock(&self.handlers))
    }
}

impl std::fmt::Debug for ParserInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParserInstance")
            .field("id", &self.id)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}
