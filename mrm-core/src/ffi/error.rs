//! FFI error handling.
//!
//! Each thread keeps the message and category of the last failed call. The
//! category is one of the [`Error::kind`] names, or `"argument"` for a
//! pointer that could not be read.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::fmt;
use std::os::raw::c_char;

use crate::error::Error;
use crate::host::HostValue;

struct LastError {
    kind: CString,
    message: CString,
}

thread_local! {
    static LAST_ERROR: RefCell<Option<LastError>> = const { RefCell::new(None) };
}

/// An error that can be stored as the thread's last error.
pub(crate) trait FfiError: fmt::Display {
    fn kind(&self) -> &'static str;
}

impl FfiError for Error {
    fn kind(&self) -> &'static str {
        Error::kind(self)
    }
}

/// Pointer conversion failures.
impl FfiError for &'static str {
    fn kind(&self) -> &'static str {
        "argument"
    }
}

pub(crate) fn set_last_error(kind: &str, message: &str) {
    let stored = CString::new(kind)
        .and_then(|kind| Ok(LastError { kind, message: CString::new(message)? }))
        .ok();
    LAST_ERROR.with(|e| *e.borrow_mut() = stored);
}

pub(crate) fn record<E: FfiError>(err: &E) {
    tracing::debug!(kind = err.kind(), error = %err, "FFI call failed");
    set_last_error(err.kind(), &err.to_string());
}

pub(crate) fn clear_last_error() {
    LAST_ERROR.with(|e| *e.borrow_mut() = None);
}

/// Message of the last error on this thread, or NULL.
///
/// # Safety
/// The returned string is valid until the next call to any mrm_* function
/// on the same thread. Do not free it.
#[no_mangle]
pub extern "C" fn mrm_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match e.borrow().as_ref() {
        Some(last) => last.message.as_ptr(),
        None => std::ptr::null(),
    })
}

/// Category of the last error on this thread (`"decode"`, `"internal"`, ...), or NULL.
///
/// # Safety
/// Same lifetime rules as `mrm_last_error()`.
#[no_mangle]
pub extern "C" fn mrm_last_error_kind() -> *const c_char {
    LAST_ERROR.with(|e| match e.borrow().as_ref() {
        Some(last) => last.kind.as_ptr(),
        None => std::ptr::null(),
    })
}

/// Returns 1 if there is a pending error, 0 otherwise.
#[no_mangle]
pub extern "C" fn mrm_has_error() -> i32 {
    LAST_ERROR.with(|e| e.borrow().is_some() as i32)
}

#[no_mangle]
pub extern "C" fn mrm_clear_error() {
    clear_last_error();
}

/// Unwrap a Result or record the error and return early.
macro_rules! ffi_try {
    ($expr:expr) => {
        match $expr {
            Ok(val) => {
                $crate::ffi::error::clear_last_error();
                val
            }
            Err(e) => {
                $crate::ffi::error::record(&e);
                return std::ptr::null_mut();
            }
        }
    };
    ($expr:expr, $err_val:expr) => {
        match $expr {
            Ok(val) => {
                $crate::ffi::error::clear_last_error();
                val
            }
            Err(e) => {
                $crate::ffi::error::record(&e);
                return $err_val;
            }
        }
    };
}

pub(crate) use ffi_try;

/// Read a nullable C string argument as a host value; NULL is the host `null`.
///
/// # Safety
/// A non-null pointer must be valid and null-terminated.
pub(crate) unsafe fn cstr_to_host_value(s: *const c_char) -> Result<HostValue, &'static str> {
    if s.is_null() {
        return Ok(HostValue::Null);
    }
    CStr::from_ptr(s)
        .to_str()
        .map(HostValue::from)
        .map_err(|_| "invalid UTF-8")
}

/// Borrow a non-null C string as UTF-8.
///
/// # Safety
/// A non-null pointer must be valid and null-terminated for `'a`.
pub(crate) unsafe fn cstr_to_str<'a>(s: *const c_char) -> Result<&'a str, &'static str> {
    if s.is_null() {
        return Err("null pointer");
    }
    CStr::from_ptr(s).to_str().map_err(|_| "invalid UTF-8")
}

/// Copy a string into a library-owned C string (free with `mrm_string_free`).
pub(crate) fn str_to_cstring(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cs) => cs.into_raw(),
        Err(_) => {
            set_last_error("encoding", "string contains null byte");
            std::ptr::null_mut()
        }
    }
}
