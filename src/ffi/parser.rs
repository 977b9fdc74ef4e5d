//! FFI wrappers for parser instances and C handler callbacks.
#![allow(unsafe_code, clippy::missing_safety_doc)]

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int, c_void};
use std::sync::Arc;

use crate::bridge::{Attribute, DataHandler, EndHandler, InstanceId, ParserConfig, Registry, StartHandler};
use crate::error::Error;
use crate::ffi::{clear_last_error, set_last_error, to_c_string, UserData};

/// Returned by status functions for an unknown or freed instance id
pub const XMLBRIDGE_UNKNOWN_INSTANCE: c_int = -1;
/// Returned by `xmlbridge_feed` when the instance is already being fed
pub const XMLBRIDGE_BUSY: c_int = -2;
/// Returned for null pointers where data was required
pub const XMLBRIDGE_INVALID_ARGUMENT: c_int = -3;
/// Returned when buffers or an instance id could not be allocated
pub const XMLBRIDGE_ALLOCATION_ERROR: c_int = -4;
/// Returned when an error was asked for but none was recorded
pub const XMLBRIDGE_NO_ERROR: c_int = -5;

/// C function pointer type for start-element events.
///
/// Arguments: instance id, tag, attribute array
/// (`name0, value0, name1, value1, ..., NULL`), `user_data`.
pub type StartElementCb =
    Option<unsafe extern "C" fn(i64, *const c_char, *const *const c_char, *mut c_void)>;

/// C function pointer type for end-element events.
///
/// Arguments: instance id, tag, `user_data`.
pub type EndElementCb = Option<unsafe extern "C" fn(i64, *const c_char, *mut c_void)>;

/// C function pointer type for character data and default data.
///
/// Arguments: instance id, bytes, exact length, `user_data`.
pub type DataCb = Option<unsafe extern "C" fn(i64, *const c_char, usize, *mut c_void)>;

/// Ids outside the issued range map to 0, which is never issued.
fn instance_id(id: i64) -> InstanceId {
    InstanceId::from_raw(u32::try_from(id).unwrap_or(0))
}

/// Status code for a bridge error, recording its message.
fn status_code(err: &Error) -> c_int {
    set_last_error(&err.to_string());
    match err {
        Error::Parse(e) => e.code.code(),
        Error::Busy(_) => XMLBRIDGE_BUSY,
        Error::UnknownInstance(_) => XMLBRIDGE_UNKNOWN_INSTANCE,
        Error::AllocationError(_) => XMLBRIDGE_ALLOCATION_ERROR,
        Error::NoError(_) => XMLBRIDGE_NO_ERROR,
    }
}

fn status(result: Result<(), Error>) -> c_int {
    match result {
        Ok(()) => 0,
        Err(e) => status_code(&e),
    }
}

/// Copy a handler string for C. Tags and attributes never contain NUL.
fn c_string(s: String) -> CString {
    CString::new(s).unwrap_or_default()
}

fn start_handler(cb: StartElementCb, user_data: UserData) -> Option<StartHandler> {
    let cb = cb?;
    Some(Arc::new(move |id: InstanceId, tag: String, attributes: Vec<Attribute>| {
        let tag = c_string(tag);
        let strings: Vec<CString> = attributes
            .into_iter()
            .flat_map(|a| [c_string(a.name), c_string(a.value)])
            .collect();
        let mut ptrs: Vec<*const c_char> = strings.iter().map(|s| s.as_ptr()).collect();
        ptrs.push(std::ptr::null());
        // SAFETY: all pointers stay alive until the callback returns.
        unsafe { cb(i64::from(id.raw()), tag.as_ptr(), ptrs.as_ptr(), user_data.get()) };
    }))
}

fn end_handler(cb: EndElementCb, user_data: UserData) -> Option<EndHandler> {
    let cb = cb?;
    Some(Arc::new(move |id: InstanceId, tag: String| {
        let tag = c_string(tag);
        // SAFETY: `tag` outlives the callback.
        unsafe { cb(i64::from(id.raw()), tag.as_ptr(), user_data.get()) };
    }))
}

fn data_handler(cb: DataCb, user_data: UserData) -> Option<DataHandler> {
    let cb = cb?;
    Some(Arc::new(move |id: InstanceId, mut text: Vec<u8>| {
        let len = text.len();
        text.push(0);
        // SAFETY: `text` holds `len` bytes plus a NUL and outlives the callback.
        unsafe { cb(i64::from(id.raw()), text.as_ptr().cast(), len, user_data.get()) };
    }))
}

fn create(config: ParserConfig) -> i64 {
    match Registry::global().create(config) {
        Ok(id) => {
            clear_last_error();
            i64::from(id.raw())
        }
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

/// Reads an optional encoding label; null means "detect".
unsafe fn encoding_arg(encoding: *const c_char) -> Result<Option<String>, ()> {
    if encoding.is_null() {
        return Ok(None);
    }
    match CStr::from_ptr(encoding).to_str() {
        Ok(label) => Ok(Some(label.to_string())),
        Err(_) => {
            set_last_error("invalid UTF-8 in encoding name");
            Err(())
        }
    }
}

/// Creates a parser instance.
///
/// `encoding` may be null to detect the encoding from the input. A non-zero
/// `namespace_aware` enables namespace processing with ':' between the
/// namespace URI and the local name.
///
/// Returns the instance id, or -1 on failure.
#[no_mangle]
pub unsafe extern "C" fn xmlbridge_create(encoding: *const c_char, namespace_aware: c_int) -> i64 {
    let Ok(encoding) = encoding_arg(encoding) else {
        return -1;
    };
    let mut config = ParserConfig {
        encoding,
        namespace_separator: None,
    };
    if namespace_aware != 0 {
        config = config.with_namespaces();
    }
    create(config)
}

/// Creates a namespace-aware parser instance with a custom separator.
///
/// Returns the instance id, or -1 on failure (including a non-ASCII
/// separator).
#[no_mangle]
pub unsafe extern "C" fn xmlbridge_create_ns(encoding: *const c_char, separator: c_char) -> i64 {
    let Ok(encoding) = encoding_arg(encoding) else {
        return -1;
    };
    let config = ParserConfig {
        encoding,
        namespace_separator: Some(char::from(separator as u8)),
    };
    create(config)
}

/// Feeds `len` bytes at `data` to an instance.
///
/// Handlers run before this returns. Returns 0 on success, the positive
/// parse error code if the document was rejected, or a negative status.
#[no_mangle]
pub unsafe extern "C" fn xmlbridge_feed(id: i64, data: *const u8, len: usize, is_final: c_int) -> c_int {
    let chunk: &[u8] = if len == 0 {
        &[]
    } else if data.is_null() {
        set_last_error("null data pointer");
        return XMLBRIDGE_INVALID_ARGUMENT;
    } else {
        std::slice::from_raw_parts(data, len)
    };
    clear_last_error();
    status(Registry::global().feed(instance_id(id), chunk, is_final != 0))
}

/// Returns the description of the instance's recorded error.
///
/// The string must be freed with `xmlbridge_free_string`. Returns null if
/// the instance is unknown or has no recorded error.
#[no_mangle]
pub extern "C" fn xmlbridge_get_error(id: i64) -> *mut c_char {
    match Registry::global().get_error(instance_id(id)) {
        Ok(message) => {
            clear_last_error();
            to_c_string(&message)
        }
        Err(e) => {
            set_last_error(&e.to_string());
            std::ptr::null_mut()
        }
    }
}

fn query(id: i64, f: impl FnOnce(&Registry, InstanceId) -> Result<u64, Error>) -> i64 {
    match f(Registry::global(), instance_id(id)) {
        Ok(value) => {
            clear_last_error();
            i64::try_from(value).unwrap_or(i64::MAX)
        }
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

/// Current line (1-based), or -1 for an unknown instance.
#[no_mangle]
pub extern "C" fn xmlbridge_current_line(id: i64) -> i64 {
    query(id, Registry::current_line)
}

/// Current column (0-based, in characters), or -1 for an unknown instance.
#[no_mangle]
pub extern "C" fn xmlbridge_current_column(id: i64) -> i64 {
    query(id, Registry::current_column)
}

/// Attributes on the most recent start tag, or -1 for an unknown instance.
#[no_mangle]
pub extern "C" fn xmlbridge_attribute_count(id: i64) -> i64 {
    query(id, |registry, id| registry.attribute_count(id).map(|n| n as u64))
}

/// Replaces the start and end handlers. Either may be null.
#[no_mangle]
pub unsafe extern "C" fn xmlbridge_set_handlers(
    id: i64,
    start: StartElementCb,
    end: EndElementCb,
    user_data: *mut c_void,
) -> c_int {
    clear_last_error();
    let user_data = UserData::new(user_data);
    status(Registry::global().set_handlers(
        instance_id(id),
        start_handler(start, user_data),
        end_handler(end, user_data),
    ))
}

/// Replaces the character data handler; null removes it.
#[no_mangle]
pub unsafe extern "C" fn xmlbridge_set_character_data_handler(id: i64, cb: DataCb, user_data: *mut c_void) -> c_int {
    clear_last_error();
    let handler = data_handler(cb, UserData::new(user_data));
    status(Registry::global().set_character_data_handler(instance_id(id), handler))
}

/// Replaces the default handler; null removes it.
#[no_mangle]
pub unsafe extern "C" fn xmlbridge_set_default_handler(id: i64, cb: DataCb, user_data: *mut c_void) -> c_int {
    clear_last_error();
    let handler = data_handler(cb, UserData::new(user_data));
    status(Registry::global().set_default_handler(instance_id(id), handler))
}

/// Frees an instance. Returns 0, or -1 if the id is unknown or already freed.
#[no_mangle]
pub extern "C" fn xmlbridge_free(id: i64) -> c_int {
    clear_last_error();
    status(Registry::global().free(instance_id(id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::ffi::{xmlbridge_free_string, xmlbridge_last_error};
    use std::sync::Mutex;

    /// What the C callbacks saw, reached through `user_data`
    #[derive(Default)]
    struct Log {
        lines: Mutex<Vec<String>>,
        lengths: Mutex<Vec<usize>>,
    }

    unsafe fn log<'a>(user_data: *mut c_void) -> &'a Log {
        &*(user_data as *const Log)
    }

    unsafe fn text(ptr: *const c_char) -> String {
        CStr::from_ptr(ptr).to_str().unwrap().to_string()
    }

    unsafe extern "C" fn on_start(id: i64, tag: *const c_char, attrs: *const *const c_char, user_data: *mut c_void) {
        let mut line = format!("{} start {}", id, text(tag));
        let mut i = 0;
        while !(*attrs.add(i)).is_null() {
            line.push_str(&format!(" {}={}", text(*attrs.add(i)), text(*attrs.add(i + 1))));
            i += 2;
        }
        log(user_data).lines.lock().unwrap().push(line);
    }

    unsafe extern "C" fn on_end(id: i64, tag: *const c_char, user_data: *mut c_void) {
        log(user_data).lines.lock().unwrap().push(format!("{} end {}", id, text(tag)));
    }

    unsafe extern "C" fn on_data(id: i64, data: *const c_char, len: usize, user_data: *mut c_void) {
        let bytes = std::slice::from_raw_parts(data.cast::<u8>(), len);
        let log = log(user_data);
        log.lengths.lock().unwrap().push(len);
        log.lines
            .lock()
            .unwrap()
            .push(format!("{} data {}", id, String::from_utf8_lossy(bytes)));
    }

    fn feed(id: i64, doc: &[u8], is_final: bool) -> c_int {
        unsafe { xmlbridge_feed(id, doc.as_ptr(), doc.len(), c_int::from(is_final)) }
    }

    #[test]
    fn test_end_to_end_through_c_callbacks() {
        let log = Log::default();
        let ud = &log as *const Log as *mut c_void;
        let id = unsafe { xmlbridge_create(std::ptr::null(), 0) };
        assert!(id > 0);
        unsafe {
            assert_eq!(xmlbridge_set_handlers(id, Some(on_start), Some(on_end), ud), 0);
            assert_eq!(xmlbridge_set_character_data_handler(id, Some(on_data), ud), 0);
        }

        assert_eq!(feed(id, b"<root><child a='1' b=\"2\">hi</child></root>", true), 0);
        assert_eq!(
            *log.lines.lock().unwrap(),
            vec![
                format!("{} start root", id),
                format!("{} start child a=1 b=2", id),
                format!("{} data hi", id),
                format!("{} end child", id),
                format!("{} end root", id),
            ]
        );
        assert_eq!(*log.lengths.lock().unwrap(), vec![2]);
        assert_eq!(xmlbridge_attribute_count(id), 2);
        assert_eq!(xmlbridge_free(id), 0);
        assert_eq!(xmlbridge_free(id), XMLBRIDGE_UNKNOWN_INSTANCE);
    }

    #[test]
    fn test_parse_error_reporting() {
        let id = unsafe { xmlbridge_create(std::ptr::null(), 0) };
        let code = feed(id, b"<root><unclosed>", true);
        assert_eq!(code, ErrorCode::UnclosedToken.code());
        assert!(!xmlbridge_last_error().is_null());

        let message = xmlbridge_get_error(id);
        assert_eq!(unsafe { text(message) }, "unclosed token");
        unsafe { xmlbridge_free_string(message) };
        assert_eq!(xmlbridge_current_line(id), 1);
        assert_eq!(xmlbridge_current_column(id), 16);

        // failed instances keep failing
        assert_eq!(feed(id, b"<x/>", true), code);
        xmlbridge_free(id);
    }

    #[test]
    fn test_unknown_ids() {
        assert_eq!(feed(0, b"<a/>", true), XMLBRIDGE_UNKNOWN_INSTANCE);
        assert_eq!(feed(-7, b"<a/>", true), XMLBRIDGE_UNKNOWN_INSTANCE);
        assert_eq!(feed(i64::MAX, b"<a/>", true), XMLBRIDGE_UNKNOWN_INSTANCE);
        assert_eq!(xmlbridge_current_line(0), -1);
        assert!(xmlbridge_get_error(0).is_null());
        assert!(!xmlbridge_last_error().is_null());
    }

    #[test]
    fn test_no_error_yields_null() {
        let id = unsafe { xmlbridge_create(std::ptr::null(), 0) };
        assert!(xmlbridge_get_error(id).is_null());
        xmlbridge_free(id);
    }

    #[test]
    fn test_data_is_length_exact() {
        let log = Log::default();
        let ud = &log as *const Log as *mut c_void;
        let id = unsafe { xmlbridge_create(std::ptr::null(), 0) };
        unsafe { xmlbridge_set_character_data_handler(id, Some(on_data), ud) };

        let instance = Registry::global().lookup(instance_id(id)).unwrap();
        instance.with_handlers(|h| h.character_data.clone()).unwrap()(instance.id(), b"a\0b\0c".to_vec());

        assert_eq!(*log.lengths.lock().unwrap(), vec![5]);
        assert_eq!(log.lines.lock().unwrap()[0], format!("{} data a\0b\0c", id));
        xmlbridge_free(id);
    }

    #[test]
    fn test_namespace_separator() {
        let log = Log::default();
        let ud = &log as *const Log as *mut c_void;
        let id = unsafe { xmlbridge_create_ns(c"UTF-8".as_ptr(), b'#' as c_char) };
        unsafe { xmlbridge_set_handlers(id, Some(on_start), None, ud) };
        assert_eq!(feed(id, b"<r xmlns='urn:a'/>", true), 0);
        assert_eq!(log.lines.lock().unwrap()[0], format!("{} start urn:a#r", id));
        xmlbridge_free(id);
    }

    #[test]
    fn test_default_handler_and_chunks() {
        let log = Log::default();
        let ud = &log as *const Log as *mut c_void;
        let id = unsafe { xmlbridge_create(c"ISO-8859-1".as_ptr(), 0) };
        unsafe { xmlbridge_set_default_handler(id, Some(on_data), ud) };

        assert_eq!(feed(id, b"<!-- c", false), 0);
        assert_eq!(feed(id, b" --><a>\xE9</a>", true), 0);
        assert_eq!(
            *log.lines.lock().unwrap(),
            vec![
                format!("{} data <!-- c -->", id),
                format!("{} data <a>", id),
                format!("{} data é", id),
                format!("{} data </a>", id),
            ]
        );
        xmlbridge_free(id);
    }

    #[test]
    fn test_invalid_arguments() {
        let id = unsafe { xmlbridge_create(std::ptr::null(), 0) };
        assert_eq!(unsafe { xmlbridge_feed(id, std::ptr::null(), 4, 0) }, XMLBRIDGE_INVALID_ARGUMENT);
        assert_eq!(unsafe { xmlbridge_feed(id, std::ptr::null(), 0, 0) }, 0);
        assert_eq!(unsafe { xmlbridge_create_ns(std::ptr::null(), 0xE2u8 as c_char) }, -1);
        xmlbridge_free(id);
    }

    #[test]
    fn test_status_codes_are_distinct() {
        let codes = [
            status_code(&Error::UnknownInstance(InstanceId::from_raw(9))),
            status_code(&Error::Busy(InstanceId::from_raw(9))),
            status_code(&Error::AllocationError("out of ids".to_string())),
            status_code(&Error::NoError(InstanceId::from_raw(9))),
        ];
        assert_eq!(
            codes,
            [XMLBRIDGE_UNKNOWN_INSTANCE, XMLBRIDGE_BUSY, XMLBRIDGE_ALLOCATION_ERROR, XMLBRIDGE_NO_ERROR]
        );
        assert!(!codes.contains(&XMLBRIDGE_INVALID_ARGUMENT));
        let message = unsafe { CStr::from_ptr(xmlbridge_last_error()) };
        assert!(!message.to_bytes().is_empty());
    }
}
