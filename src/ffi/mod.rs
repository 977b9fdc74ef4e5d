//! C FFI layer for xmlbridge.
//!
//! Exposes the process-wide [`Registry`](crate::bridge::Registry) to C and
//! other languages with a C FFI. All symbols use the `xmlbridge_` prefix.
//!
//! # Error Handling
//!
//! Instance ids are returned as `int64_t`; -1 means creation failed.
//! Status-returning functions use 0 for success and negative values for
//! bridge failures (see [`parser`]); `xmlbridge_feed` returns the positive
//! parse error code when the document is rejected. The last bridge error
//! message is kept in thread-local storage, see [`xmlbridge_last_error`].
//!
//! # Ownership
//!
//! - Strings returned by FFI functions are caller-owned and must be freed
//!   with [`xmlbridge_free_string`].
//! - Everything passed *into* a callback (tag, attribute array, data
//!   buffer) is owned by the bridge and freed when the callback returns.
//!   Data buffers carry an extra NUL byte after `len` bytes, but `len` is
//!   authoritative: the text may itself contain NUL bytes.
//!
//! # Safety
//!
//! All `extern "C"` functions in this module are inherently unsafe because
//! they accept raw pointers from C callers.

// FFI functions require unsafe blocks throughout.
#![allow(unsafe_code, clippy::missing_safety_doc)]

pub mod parser;

use std::cell::RefCell;
use std::ffi::{c_void, CString};
use std::os::raw::c_char;

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Stores an error message in thread-local storage.
fn set_last_error(msg: &str) {
    LAST_ERROR.with(|cell| {
        *cell.borrow_mut() = CString::new(msg).ok();
    });
}

/// Clears the thread-local error.
fn clear_last_error() {
    LAST_ERROR.with(|cell| {
        *cell.borrow_mut() = None;
    });
}

/// Returns the last error message, or null if the last call succeeded.
///
/// The returned string is owned by the library and must NOT be freed
/// by the caller. It is valid until the next FFI call on the same thread.
#[no_mangle]
pub extern "C" fn xmlbridge_last_error() -> *const c_char {
    LAST_ERROR.with(|cell| {
        let borrow = cell.borrow();
        match borrow.as_ref() {
            Some(cs) => cs.as_ptr(),
            None => std::ptr::null(),
        }
    })
}

/// Converts a Rust string to a caller-owned C string.
///
/// Returns null if the string contains interior null bytes.
pub(crate) fn to_c_string(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cs) => cs.into_raw(),
        Err(_) => std::ptr::null_mut(),
    }
}

/// Frees a string previously returned by an xmlbridge FFI function.
///
/// Passing null is safe and does nothing.
///
/// # Safety
///
/// The pointer must have been returned by an xmlbridge FFI function,
/// or be null.
#[no_mangle]
pub unsafe extern "C" fn xmlbridge_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        // SAFETY: `ptr` was created by `CString::into_raw` via `to_c_string`, and is non-null.
        unsafe {
            drop(CString::from_raw(ptr));
        }
    }
}

/// Opaque caller pointer handed back to every callback.
///
/// The bridge never dereferences it; keeping it valid, and synchronizing
/// whatever it points to, is the caller's responsibility.
#[derive(Debug, Clone, Copy)]
pub(crate) struct UserData(*mut c_void);

// SAFETY: the pointer is only passed back to the caller's own callbacks.
unsafe impl Send for UserData {}
unsafe impl Sync for UserData {}

impl UserData {
    pub(crate) fn new(ptr: *mut c_void) -> Self {
        UserData(ptr)
    }

    /// Accessor rather than field access so closures capture the whole
    /// (Send) wrapper instead of the raw pointer
    #[inline]
    pub(crate) fn get(self) -> *mut c_void {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CStr;

    #[test]
    fn test_last_error_roundtrip() {
        set_last_error("boom");
        let ptr = xmlbridge_last_error();
        assert!(!ptr.is_null());
        assert_eq!(unsafe { CStr::from_ptr(ptr) }.to_str().unwrap(), "boom");
        clear_last_error();
        assert!(xmlbridge_last_error().is_null());
    }

    #[test]
    fn test_string_ownership() {
        let ptr = to_c_string("owned");
        assert_eq!(unsafe { CStr::from_ptr(ptr) }.to_str().unwrap(), "owned");
        unsafe { xmlbridge_free_string(ptr) };
        unsafe { xmlbridge_free_string(std::ptr::null_mut()) };
        assert!(to_c_string("nul\0inside").is_null());
    }
}
