//! Mach IPC transport for SketchyBar-compatible status bars.
//!
//! This crate provides:
//! - Command delivery over the bar's bootstrap service port, behind a
//!   process-wide cached connection ([`send_command`], [`refresh`],
//!   [`shutdown`])
//! - A blocking event server the bar pushes env blobs into
//!   ([`EventServer`], [`run_event_server`])
//! - A C ABI mirror of the command façade ([`capi`])
//!
//! The transport itself is macOS-only; on other targets only the error
//! type and the re-exported wire encodings are built, so workspace-wide
//! builds and tests stay green.

pub use barlink_proto::{Env, encode_command};

#[cfg(target_os = "macos")]
pub mod capi;
#[cfg(target_os = "macos")]
mod client;
#[cfg(target_os = "macos")]
mod message;
#[cfg(target_os = "macos")]
mod port;
#[cfg(target_os = "macos")]
mod server;

#[cfg(target_os = "macos")]
pub use client::{refresh, send_command, shutdown};
#[cfg(target_os = "macos")]
pub use server::{EventServer, run_event_server};

use thiserror::Error;

/// Kernel return code, kept for diagnostics.
pub type KernReturn = i32;

/// Errors raised inside the Mach transport.
///
/// These never cross the public façade: the bar protocol has no error
/// channel, so [`send_command`] maps every failure to an empty response
/// and [`refresh`] to `false`. They exist so the plumbing can propagate
/// with `?` and so logged diagnostics carry the kernel return code.
#[derive(Debug, Error)]
pub enum IpcError {
    #[error("service name {0:?} is empty, contains NUL, or overflows the name buffer")]
    InvalidServiceName(String),

    #[error("bootstrap lookup failed for {name:?} ({code})")]
    ServiceNotFound { name: String, code: KernReturn },

    #[error("task bootstrap port unavailable ({0})")]
    Bootstrap(KernReturn),

    #[error("bootstrap registration failed ({0})")]
    Register(KernReturn),

    #[error("receive right allocation failed ({0})")]
    AllocateReceiveRight(KernReturn),

    #[error("send right insertion failed ({0})")]
    InsertSendRight(KernReturn),

    #[error("message send failed ({0})")]
    Send(KernReturn),

    #[error("timed out waiting for the bar's reply")]
    ReplyTimeout,

    #[error("message receive failed ({0})")]
    Receive(KernReturn),

    #[error("reply carried no payload")]
    EmptyReply,
}

pub type Result<T> = std::result::Result<T, IpcError>;
