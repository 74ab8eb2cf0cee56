//! C ABI mirror of the command façade, for embedding the transport in
//! C helpers and plugins.

use std::ffi::{CStr, CString, c_char};
use std::sync::atomic::Ordering;

use crate::{client, server};

/// Sends `command` to the bar named `bar_name` and returns the reply as
/// a heap-allocated C string. Never null; failures yield an empty
/// string. Release the result with [`barlink_free_response`].
///
/// Arguments are message-first, the order C bar helpers already use.
///
/// # Safety
///
/// Both pointers must be null or valid NUL-terminated strings.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn barlink_send_command(
    command: *const c_char,
    bar_name: *const c_char,
) -> *mut c_char {
    let command = unsafe { cstr_arg(command) };
    let bar_name = unsafe { cstr_arg(bar_name) };
    let reply = client::send_command(bar_name, command);
    // The reply was truncated at its first NUL, so this cannot fail.
    CString::new(reply)
        .unwrap_or_default()
        .into_raw()
}

/// Releases a reply returned by [`barlink_send_command`].
///
/// # Safety
///
/// `response` must be null or a pointer obtained from
/// [`barlink_send_command`] that has not been freed yet.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn barlink_free_response(response: *mut c_char) {
    if !response.is_null() {
        drop(unsafe { CString::from_raw(response) });
    }
}

/// Drops the cached connection and re-resolves the bar's service port.
/// Returns `true` when the bar is reachable again.
///
/// # Safety
///
/// `bar_name` must be null or a valid NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn barlink_refresh(bar_name: *const c_char) -> bool {
    client::refresh(unsafe { cstr_arg(bar_name) })
}

/// Drops the cached connection.
#[unsafe(no_mangle)]
pub extern "C" fn barlink_shutdown() {
    client::shutdown();
}

/// Registers an event service under `service_name` and delivers each
/// event's env blob to `handler`. The handler returns `false` to stop
/// the server. Returns `false` when setup fails, `true` after a clean
/// stop.
///
/// # Safety
///
/// `service_name` must be null or a valid NUL-terminated string. The
/// blob pointer passed to `handler` is only valid for the duration of
/// the call.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn barlink_run_event_server(
    service_name: *const c_char,
    handler: unsafe extern "C" fn(env: *const c_char) -> bool,
) -> bool {
    let service_name = unsafe { cstr_arg(service_name) };
    server::run_event_server(service_name, |env, running| {
        // Hand the handler the raw blob; its empty-key terminator doubles
        // as the C string terminator for the first key.
        if !unsafe { handler(env.as_bytes().as_ptr().cast()) } {
            running.store(false, Ordering::Release);
        }
    })
}

/// Looks `key` up in an env blob delivered to an event handler and
/// returns a pointer to its value inside the blob, or to a shared empty
/// string when the key is absent. Never null; the value pointer is only
/// valid as long as the blob is.
///
/// # Safety
///
/// `env` must be null or a blob pointer handed to a
/// [`barlink_run_event_server`] handler (alternating NUL-terminated
/// key/value strings ending in an empty key); `key` must be null or a
/// valid NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn barlink_env_get(
    env: *const c_char,
    key: *const c_char,
) -> *const c_char {
    const EMPTY: &CStr = c"";
    if env.is_null() || key.is_null() {
        return EMPTY.as_ptr();
    }
    let key = unsafe { CStr::from_ptr(key) };
    let mut cursor = env;
    loop {
        let current = unsafe { CStr::from_ptr(cursor) };
        if current.is_empty() {
            // Empty key terminates the blob.
            return EMPTY.as_ptr();
        }
        let value = unsafe { cursor.add(current.count_bytes() + 1) };
        if current == key {
            return value;
        }
        let value_len = unsafe { CStr::from_ptr(value) }.count_bytes();
        cursor = unsafe { value.add(value_len + 1) };
    }
}

/// A null or non-UTF-8 argument reads as the empty string, which the
/// façade maps to its failure result.
unsafe fn cstr_arg<'a>(ptr: *const c_char) -> &'a str {
    if ptr.is_null() {
        return "";
    }
    unsafe { CStr::from_ptr(ptr) }.to_str().unwrap_or("")
}
