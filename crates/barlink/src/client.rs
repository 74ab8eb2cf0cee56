//! Command façade over a process-wide cached connection to the bar.

use std::sync::Mutex;

use tracing::{debug, warn};

use crate::message;
use crate::port::{SendRight, resolve_service};
use crate::Result;

/// The cached send right to the bar's service port. The lock is held for
/// the whole resolve-and-exchange sequence, so concurrent callers
/// serialize and each one observes a settled cache.
static CONNECTION: Mutex<Option<SendRight>> = Mutex::new(None);

/// Sends one command string to the bar named `bar_name` and returns the
/// bar's reply.
///
/// The command is tokenized into the bar's argv framing before send. Any
/// failure (bar not running, send failure, no reply within the transport
/// timeout) yields an empty string; the transport has no error channel.
pub fn send_command(bar_name: &str, command: &str) -> String {
    let payload = barlink_proto::encode_command(command);
    match exchange_with_cached(bar_name, &payload) {
        Ok(reply) => reply_to_string(&reply),
        Err(error) => {
            warn!(bar = bar_name, %error, "command exchange failed");
            String::new()
        }
    }
}

/// Drops the cached connection and re-resolves the bar's service port,
/// returning whether the bar is reachable again.
pub fn refresh(bar_name: &str) -> bool {
    let mut connection = lock();
    *connection = None;
    match resolve_service(bar_name) {
        Ok(right) => {
            debug!(bar = bar_name, "connection re-established");
            *connection = Some(right);
            true
        }
        Err(error) => {
            warn!(bar = bar_name, %error, "connection refresh failed");
            false
        }
    }
}

/// Drops the cached connection. The next [`send_command`] re-resolves.
pub fn shutdown() {
    *lock() = None;
}

fn exchange_with_cached(bar_name: &str, payload: &[u8]) -> Result<Vec<u8>> {
    let mut connection = lock();
    let right = match connection.take() {
        Some(right) => right,
        None => resolve_service(bar_name)?,
    };
    let result = message::exchange(&right, payload);
    // A failed exchange leaves the cached right in place; callers decide
    // when to re-resolve via `refresh`.
    *connection = Some(right);
    result
}

fn lock() -> std::sync::MutexGuard<'static, Option<SendRight>> {
    // A poisoned cache only means a panic elsewhere mid-exchange; the
    // Option inside is still coherent.
    CONNECTION.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Replies follow the C string contract: the payload is truncated at its
/// first NUL.
fn reply_to_string(reply: &[u8]) -> String {
    let end = reply.iter().position(|&b| b == 0).unwrap_or(reply.len());
    String::from_utf8_lossy(&reply[..end]).into_owned()
}
