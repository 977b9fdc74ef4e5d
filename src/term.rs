//! Elixir Term Conversion Utilities
//!
//! Converts bridge events and errors to Elixir terms.

use rustler::{Encoder, Env, NewBinary, Term};

use crate::bridge::{Event, EventKind};
use crate::error::Error;

// Pre-defined atoms for efficiency - created once at compile time
rustler::atoms! {
    ok,
    error,
    start_element,
    end_element,
    character_data,
    default,
    parse_error,
    unknown_instance,
    no_error,
    busy,
    allocation_error,
}

/// Convert a byte slice to a binary term
#[inline]
pub fn bytes_to_binary<'a>(env: Env<'a>, bytes: &[u8]) -> Term<'a> {
    let mut binary = NewBinary::new(env, bytes.len());
    binary.as_mut_slice().copy_from_slice(bytes);
    binary.into()
}

/// Convert an event to the message sent to its handler pid
///
/// `{:start_element, id, tag, [{name, value}]}`, `{:end_element, id, tag}`,
/// `{:character_data, id, binary}`, `{:default, id, binary}`
pub fn event_to_term<'a>(env: Env<'a>, event: Event) -> Term<'a> {
    let id = event.instance.raw();
    match event.kind {
        EventKind::StartElement { tag, attributes } => {
            let mut attrs = Term::list_new_empty(env);
            for attr in attributes.into_iter().rev() {
                let tuple = (
                    bytes_to_binary(env, attr.name.as_bytes()),
                    bytes_to_binary(env, attr.value.as_bytes()),
                );
                attrs = attrs.list_prepend(tuple.encode(env));
            }
            (start_element(), id, bytes_to_binary(env, tag.as_bytes()), attrs).encode(env)
        }
        EventKind::EndElement { tag } => (end_element(), id, bytes_to_binary(env, tag.as_bytes())).encode(env),
        EventKind::CharacterData { text } => (character_data(), id, bytes_to_binary(env, &text)).encode(env),
        EventKind::DefaultData { text } => (default(), id, bytes_to_binary(env, &text)).encode(env),
    }
}

/// Convert a bridge error to `{:error, reason}`
///
/// Parse errors become `{:error, {:parse_error, code, message, line, column}}`.
pub fn error_to_term<'a>(env: Env<'a>, err: &Error) -> Term<'a> {
    let reason = match err {
        Error::Parse(e) => (parse_error(), e.code.code(), e.message(), e.line, e.column).encode(env),
        Error::UnknownInstance(_) => unknown_instance().encode(env),
        Error::NoError(_) => no_error().encode(env),
        Error::Busy(_) => busy().encode(env),
        Error::AllocationError(reason) => (allocation_error(), reason.as_str()).encode(env),
    };
    (error(), reason).encode(env)
}

/// `:ok` or `{:error, reason}`
pub fn status_to_term<'a>(env: Env<'a>, result: Result<(), Error>) -> Term<'a> {
    match result {
        Ok(()) => ok().encode(env),
        Err(e) => error_to_term(env, &e),
    }
}
