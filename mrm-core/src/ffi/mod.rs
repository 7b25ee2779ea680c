//! C FFI bindings for mrm-core.
//!
//! The C host drives the same four entry points as a scripting host. Call
//! `mrm_init()` once, then:
//!
//! - `mrm_parse(source)` / `mrm_generate(problem)` return an envelope
//! - `mrm_generate_streamed(problem, callback, user_data)` returns the
//!   acknowledgement and posts each batch, then `"done"`, to the callback
//! - `mrm_stream_new(problem)` returns a pull stream handle driven by
//!   `mrm_stream_start/pull/cancel/free`
//!
//! ## Memory Management
//!
//! - Strings returned by the library must be freed with `mrm_string_free()`
//! - Stream handles must be freed with `mrm_stream_free()`
//! - Strings passed to callbacks are only valid for the duration of the call
//! - Caller-owned strings passed to functions are not freed by the library
//!
//! ## Error Handling
//!
//! Request, engine and parse failures are not errors at this level: they come
//! back as failure envelopes. Functions return `NULL` (or a negative value)
//! only when no envelope can be produced; details are then available via
//! `mrm_last_error()` (thread-local).
//!
//! ## Thread Safety
//!
//! Callbacks run on background worker threads. They must hand the payload
//! over to the host's own event loop instead of running host code directly.

mod error;
mod stream;

pub use error::*;
pub use stream::*;

use std::ffi::CString;
use std::os::raw::{c_char, c_void};
use std::sync::{Arc, Mutex};

use tracing::info;

use self::error::{cstr_to_host_value, ffi_try, str_to_cstring};
use crate::bridge::Bridge;
use crate::config::BridgeConfig;
use crate::error::{Error, Result};
use crate::host::HostValue;

static BRIDGE: Mutex<Option<Arc<Bridge>>> = Mutex::new(None);

fn global_bridge() -> Result<Arc<Bridge>> {
    BRIDGE
        .lock()
        .map_err(|e| Error::Internal(format!("Failed to lock bridge: {}", e)))?
        .clone()
        .ok_or_else(|| Error::Internal("mrm_init has not been called".to_string()))
}

// ============================================================================
// Library Information
// ============================================================================

/// Get the library version string.
///
/// # Safety
/// The returned string must be freed with `mrm_string_free()`.
#[no_mangle]
pub extern "C" fn mrm_version() -> *mut c_char {
    str_to_cstring(env!("CARGO_PKG_VERSION"))
}

/// Free a string allocated by the library.
///
/// # Safety
/// - `s` must be a pointer returned by an mrm_* function, or NULL.
/// - After calling this function, `s` must not be used.
#[no_mangle]
pub unsafe extern "C" fn mrm_string_free(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}

// ============================================================================
// Initialization
// ============================================================================

/// Build the global bridge. `config_json` may be NULL for the defaults.
///
/// Returns 0 on success, 1 if already initialized, -1 on failure.
///
/// # Safety
/// `config_json` must be NULL or a valid null-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn mrm_init(config_json: *const c_char) -> i32 {
    let config = if config_json.is_null() {
        BridgeConfig::default()
    } else {
        let json = ffi_try!(error::cstr_to_str(config_json), -1);
        ffi_try!(BridgeConfig::from_json(json), -1)
    };

    let mut slot = ffi_try!(
        BRIDGE
            .lock()
            .map_err(|e| Error::Internal(format!("Failed to lock bridge: {}", e))),
        -1
    );
    if slot.is_some() {
        return 1;
    }
    let bridge = ffi_try!(Bridge::new(config), -1);
    *slot = Some(Arc::new(bridge));
    info!("Bridge initialized");
    0
}

/// Drop the global bridge. Outstanding stream handles stop receiving data.
#[no_mangle]
pub extern "C" fn mrm_shutdown() {
    let bridge = match BRIDGE.lock() {
        Ok(mut slot) => slot.take(),
        Err(_) => None,
    };
    if bridge.is_some() {
        info!("Bridge shut down");
    }
}

// ============================================================================
// Entry points
// ============================================================================

unsafe fn call_entry(
    arg: *const c_char,
    entry: impl FnOnce(&Bridge, &[HostValue]) -> Result<String>,
) -> *mut c_char {
    let arg = ffi_try!(cstr_to_host_value(arg));
    let bridge = ffi_try!(global_bridge());
    let envelope = ffi_try!(entry(&bridge, &[arg]));
    str_to_cstring(&envelope)
}

/// Parse, simplify and reformat expression source.
///
/// # Safety
/// - `source` must be NULL or a valid null-terminated C string.
/// - The returned string must be freed with `mrm_string_free()`.
#[no_mangle]
pub unsafe extern "C" fn mrm_parse(source: *const c_char) -> *mut c_char {
    call_entry(source, |bridge, args| bridge.parse(args))
}

/// Generate every question of a problem.
///
/// # Safety
/// - `problem` must be NULL or a valid null-terminated C string.
/// - The returned string must be freed with `mrm_string_free()`.
#[no_mangle]
pub unsafe extern "C" fn mrm_generate(problem: *const c_char) -> *mut c_char {
    call_entry(problem, |bridge, args| bridge.generate(args))
}

/// Generate in the background, posting each batch envelope and then `"done"`
/// to `callback`.
///
/// # Safety
/// - `problem` must be NULL or a valid null-terminated C string.
/// - `callback` and `user_data` must stay valid until `"done"` is delivered,
///   and `user_data` must be usable from any thread.
/// - The returned string must be freed with `mrm_string_free()`.
#[no_mangle]
pub unsafe extern "C" fn mrm_generate_streamed(
    problem: *const c_char,
    callback: MrmMessageCallback,
    user_data: *mut c_void,
) -> *mut c_char {
    let channel = ffi_try!(stream::CallbackChannel::new(callback, user_data));
    call_entry(problem, |bridge, args| {
        bridge.generate_streamed_to(args, Arc::new(channel))
    })
}

// ============================================================================
// Tests
// ============================================================================
