//! FFI bindings for push callbacks and pull streams.

use std::ffi::CString;
use std::os::raw::{c_char, c_void};
use std::sync::Arc;

use super::error::{cstr_to_host_value, ffi_try, set_last_error};
use super::global_bridge;
use crate::delivery::PullStream;
use crate::error::{Error, Result};
use crate::host::{MessageChannel, StreamController};
use crate::registry::HostReturn;

/// Receives one message (batch envelope, failure envelope or `"done"`).
pub type MrmMessageCallback =
    Option<unsafe extern "C" fn(user_data: *mut c_void, message: *const c_char)>;

/// Stream controller supplied by the host.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct MrmStreamCallbacks {
    pub user_data: *mut c_void,
    /// Receives one batch envelope
    pub on_enqueue: Option<unsafe extern "C" fn(user_data: *mut c_void, chunk: *const c_char)>,
    pub on_close: Option<unsafe extern "C" fn(user_data: *mut c_void)>,
    pub on_error: Option<unsafe extern "C" fn(user_data: *mut c_void, message: *const c_char)>,
}

/// Opaque pull stream handle.
pub struct MrmStream {
    stream: PullStream,
    controller: Option<Arc<dyn StreamController>>,
}

pub(crate) struct CallbackChannel {
    callback: unsafe extern "C" fn(*mut c_void, *const c_char),
    user_data: *mut c_void,
}

// SAFETY: the caller of mrm_generate_streamed guarantees that the callback
// and user_data may be used from any thread.
unsafe impl Send for CallbackChannel {}
unsafe impl Sync for CallbackChannel {}

impl CallbackChannel {
    pub(crate) fn new(callback: MrmMessageCallback, user_data: *mut c_void) -> Result<Self> {
        let callback = callback.ok_or_else(|| Error::argument("callback must not be NULL"))?;
        Ok(Self {
            callback,
            user_data,
        })
    }
}

impl MessageChannel for CallbackChannel {
    fn post_message(&self, message: String) {
        if let Ok(message) = CString::new(message) {
            unsafe { (self.callback)(self.user_data, message.as_ptr()) }
        }
    }
}

struct CallbackController(MrmStreamCallbacks);

// SAFETY: the caller of mrm_stream_start guarantees that the callbacks and
// user_data may be used from any thread.
unsafe impl Send for CallbackController {}
unsafe impl Sync for CallbackController {}

impl StreamController for CallbackController {
    fn enqueue(&self, chunk: String) {
        if let (Some(on_enqueue), Ok(chunk)) = (self.0.on_enqueue, CString::new(chunk)) {
            unsafe { on_enqueue(self.0.user_data, chunk.as_ptr()) }
        }
    }

    fn close(&self) {
        if let Some(on_close) = self.0.on_close {
            unsafe { on_close(self.0.user_data) }
        }
    }

    fn error(&self, message: String) {
        if let (Some(on_error), Ok(message)) = (self.0.on_error, CString::new(message)) {
            unsafe { on_error(self.0.user_data, message.as_ptr()) }
        }
    }
}

// ============================================================================
// MrmStream
// ============================================================================

/// Create a pull stream over the questions of a problem.
///
/// Returns NULL when the request is rejected; `mrm_last_error()` then holds
/// the failure envelope and `mrm_last_error_kind()` is `"response"`.
///
/// # Safety
/// - `problem` must be NULL or a valid null-terminated C string.
/// - The returned pointer must be freed with `mrm_stream_free()`.
#[no_mangle]
pub unsafe extern "C" fn mrm_stream_new(problem: *const c_char) -> *mut MrmStream {
    let arg = ffi_try!(cstr_to_host_value(problem));
    let bridge = ffi_try!(global_bridge());
    match ffi_try!(bridge.generate_stream(&[arg])) {
        HostReturn::Stream(stream) => Box::into_raw(Box::new(MrmStream {
            stream,
            controller: None,
        })),
        HostReturn::Json(envelope) => {
            set_last_error("response", &envelope);
            std::ptr::null_mut()
        }
    }
}

/// Attach the controller callbacks. Must precede `mrm_stream_pull()`.
///
/// Returns 0 on success, -1 on failure.
///
/// # Safety
/// - `stream` must be a valid pointer from `mrm_stream_new()`.
/// - `callbacks` must be valid; its functions and `user_data` must stay
///   usable from any thread until the stream is freed.
#[no_mangle]
pub unsafe extern "C" fn mrm_stream_start(
    stream: *mut MrmStream,
    callbacks: *const MrmStreamCallbacks,
) -> i32 {
    if stream.is_null() || callbacks.is_null() {
        set_last_error("argument", "null pointer");
        return -1;
    }
    let stream = &mut *stream;
    let controller: Arc<dyn StreamController> = Arc::new(CallbackController(*callbacks));
    stream.stream.start(Arc::clone(&controller));
    stream.controller = Some(controller);
    0
}

/// Request one batch. Returns immediately; the outcome arrives on a callback.
///
/// Returns 0 on success, -1 on failure.
///
/// # Safety
/// `stream` must be a valid pointer from `mrm_stream_new()`.
#[no_mangle]
pub unsafe extern "C" fn mrm_stream_pull(stream: *const MrmStream) -> i32 {
    if stream.is_null() {
        set_last_error("argument", "null pointer");
        return -1;
    }
    let stream = &*stream;
    let controller = ffi_try!(
        stream
            .controller
            .clone()
            .ok_or_else(|| Error::argument("mrm_stream_start has not been called")),
        -1
    );
    stream.stream.pull(controller);
    0
}

/// Cancel the stream. No callback fires after this returns.
///
/// # Safety
/// `stream` must be a valid pointer from `mrm_stream_new()`, or NULL.
#[no_mangle]
pub unsafe extern "C" fn mrm_stream_cancel(stream: *const MrmStream) {
    if !stream.is_null() {
        (*stream).stream.cancel();
    }
}

/// Returns 1 once the stream has closed, failed or been cancelled.
///
/// # Safety
/// `stream` must be a valid pointer from `mrm_stream_new()`.
#[no_mangle]
pub unsafe extern "C" fn mrm_stream_is_finished(stream: *const MrmStream) -> i32 {
    if stream.is_null() {
        return -1;
    }
    (*stream).stream.is_finished() as i32
}

/// Free a stream handle, cancelling it first.
///
/// # Safety
/// - `stream` must be a pointer from `mrm_stream_new()`, or NULL.
/// - After calling this function, `stream` must not be used.
#[no_mangle]
pub unsafe extern "C" fn mrm_stream_free(stream: *mut MrmStream) {
    if !stream.is_null() {
        drop(Box::from_raw(stream));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffi::tests::{init, problem};
    use crate::ffi::{mrm_has_error, mrm_last_error, mrm_last_error_kind};
    use crate::testing::{Signal, TIMEOUT};
    use pretty_assertions::assert_eq;
    use std::ffi::CStr;
    use std::sync::mpsc::{self, Receiver, Sender};
    use std::sync::Mutex;

    unsafe fn sender<'a>(user_data: *mut c_void) -> &'a Mutex<Sender<Signal>> {
        &*(user_data as *const Mutex<Sender<Signal>>)
    }

    unsafe extern "C" fn on_enqueue(user_data: *mut c_void, chunk: *const c_char) {
        let chunk = CStr::from_ptr(chunk).to_str().unwrap().to_string();
        let _ = sender(user_data).lock().unwrap().send(Signal::Enqueue(chunk));
    }

    unsafe extern "C" fn on_close(user_data: *mut c_void) {
        let _ = sender(user_data).lock().unwrap().send(Signal::Close);
    }

    unsafe extern "C" fn on_error(user_data: *mut c_void, message: *const c_char) {
        let message = CStr::from_ptr(message).to_str().unwrap().to_string();
        let _ = sender(user_data).lock().unwrap().send(Signal::Error(message));
    }

    fn callbacks() -> (Box<Mutex<Sender<Signal>>>, MrmStreamCallbacks, Receiver<Signal>) {
        let (tx, rx) = mpsc::channel();
        let sender = Box::new(Mutex::new(tx));
        let callbacks = MrmStreamCallbacks {
            user_data: &*sender as *const Mutex<Sender<Signal>> as *mut c_void,
            on_enqueue: Some(on_enqueue),
            on_close: Some(on_close),
            on_error: Some(on_error),
        };
        (sender, callbacks, rx)
    }

    #[test]
    fn test_stream_lifecycle() {
        init();
        let problem = problem(r#"{"a":[1,2],"b":[5]}"#);
        let (_sender, callbacks, rx) = callbacks();

        unsafe {
            let stream = mrm_stream_new(problem.as_ptr());
            assert!(!stream.is_null());
            assert_eq!(mrm_stream_pull(stream), -1);
            assert_eq!(mrm_stream_start(stream, &callbacks), 0);

            assert_eq!(mrm_stream_pull(stream), 0);
            assert_eq!(
                rx.recv_timeout(TIMEOUT).unwrap(),
                Signal::Enqueue(r#"{"success":true,"questions":["1+5","2+5"]}"#.into())
            );
            assert_eq!(mrm_stream_pull(stream), 0);
            assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), Signal::Close);
            assert_eq!(mrm_stream_is_finished(stream), 1);

            mrm_stream_free(stream);
        }
    }

    #[test]
    fn test_cancelled_stream_is_silent() {
        init();
        let problem = problem(r#"{"a":[1,2],"b":[5]}"#);
        let (_sender, callbacks, rx) = callbacks();

        unsafe {
            let stream = mrm_stream_new(problem.as_ptr());
            assert_eq!(mrm_stream_start(stream, &callbacks), 0);
            mrm_stream_cancel(stream);
            assert_eq!(mrm_stream_pull(stream), 0);
            assert_eq!(mrm_stream_is_finished(stream), 1);
            mrm_stream_free(stream);
        }
        assert!(rx.recv_timeout(std::time::Duration::from_millis(100)).is_err());
    }

    #[test]
    fn test_rejected_problem_returns_null() {
        init();
        let problem = CString::new("{}").unwrap();

        let stream = unsafe { mrm_stream_new(problem.as_ptr()) };
        assert!(stream.is_null());
        assert_eq!(mrm_has_error(), 1);

        let kind = unsafe { CStr::from_ptr(mrm_last_error_kind()) };
        assert_eq!(kind.to_str().unwrap(), "response");
        let envelope = unsafe { CStr::from_ptr(mrm_last_error()) };
        assert!(envelope.to_str().unwrap().starts_with(r#"{"success":false"#));
    }
}
