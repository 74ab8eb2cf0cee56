//! Mach message construction, the request/response exchange, and the
//! bounded receive primitive.

use std::ffi::c_void;
use std::mem;

use mach2::message::{
    MACH_MSG_SUCCESS, MACH_MSG_TIMEOUT_NONE, MACH_MSG_TYPE_COPY_SEND, MACH_MSG_TYPE_MAKE_SEND,
    MACH_MSG_VIRTUAL_COPY, MACH_MSGH_BITS_COMPLEX, MACH_MSG_OOL_DESCRIPTOR, MACH_RCV_MSG,
    MACH_RCV_TIMED_OUT, MACH_RCV_TIMEOUT, MACH_SEND_MSG, mach_msg, mach_msg_header_t,
    mach_msg_id_t, mach_msg_ool_descriptor_t, mach_msg_size_t, mach_msg_timeout_t,
    mach_msg_trailer_t,
};
use mach2::port::{MACH_PORT_NULL, mach_port_t};

use crate::port::{ReceiveRight, SendRight};
use crate::{IpcError, Result};

/// How long a command round trip waits for the bar's reply.
pub(crate) const REPLY_TIMEOUT_MS: mach_msg_timeout_t = 100;

// Not exported by mach2. Destroys a received message, releasing any
// out-of-line memory and port rights it carries.
unsafe extern "C" {
    fn mach_msg_destroy(header: *mut mach_msg_header_t);
}

/// Outbound request: header plus exactly one out-of-line descriptor.
#[repr(C)]
struct Message {
    header: mach_msg_header_t,
    descriptor_count: mach_msg_size_t,
    descriptor: mach_msg_ool_descriptor_t,
}

/// Inbound message buffer: the request layout plus the kernel trailer.
#[repr(C)]
pub(crate) struct Buffer {
    header: mach_msg_header_t,
    descriptor_count: mach_msg_size_t,
    descriptor: mach_msg_ool_descriptor_t,
    trailer: mach_msg_trailer_t,
}

impl Buffer {
    pub(crate) fn zeroed() -> Self {
        // SAFETY: all-zero bytes are a valid empty message buffer.
        unsafe { mem::zeroed() }
    }

    /// The out-of-line payload, if the kernel delivered one.
    ///
    /// The slice points into kernel-managed memory that is released when
    /// the buffer drops; copy it out before then.
    pub(crate) fn payload(&self) -> Option<&[u8]> {
        let address = self.descriptor.address;
        if address.is_null() {
            return None;
        }
        // SAFETY: `address` and `size` describe the out-of-line region
        // the kernel mapped for this message, valid until destroy.
        Some(unsafe {
            std::slice::from_raw_parts(address as *const u8, self.descriptor.size as usize)
        })
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        // SAFETY: the buffer holds either a received message or zeroes;
        // destroy handles both and releases any out-of-line memory.
        unsafe { mach_msg_destroy(&mut self.header) };
    }
}

/// Receives one message into `buffer`. `None` blocks indefinitely; on any
/// failure the descriptor address is cleared so the buffer reads empty.
pub(crate) fn receive(
    buffer: &mut Buffer,
    port: mach_port_t,
    timeout: Option<mach_msg_timeout_t>,
) -> Result<()> {
    let (options, timeout) = match timeout {
        Some(ms) => (MACH_RCV_MSG | MACH_RCV_TIMEOUT, ms),
        None => (MACH_RCV_MSG, MACH_MSG_TIMEOUT_NONE),
    };
    // SAFETY: `buffer` is a live, correctly sized receive buffer and
    // `port` names a receive right we own.
    let kr = unsafe {
        mach_msg(
            &mut buffer.header,
            options,
            0,
            mem::size_of::<Buffer>() as mach_msg_size_t,
            port,
            timeout,
            MACH_PORT_NULL,
        )
    };
    if kr != MACH_MSG_SUCCESS {
        buffer.descriptor.address = std::ptr::null_mut();
        return Err(if kr == MACH_RCV_TIMED_OUT {
            IpcError::ReplyTimeout
        } else {
            IpcError::Receive(kr)
        });
    }
    Ok(())
}

/// One request/response round trip against the bar's service port.
///
/// A fresh reply port is allocated per call; every right acquired here is
/// released by scope-based drops before returning, on success and failure
/// alike. Blocks for the send plus at most [`REPLY_TIMEOUT_MS`].
pub(crate) fn exchange(remote: &SendRight, payload: &[u8]) -> Result<Vec<u8>> {
    let reply_port = ReceiveRight::allocate()?;
    reply_port.insert_send_right()?;

    let mut message = Message {
        header: mach_msg_header_t {
            msgh_bits: msgh_bits(MACH_MSG_TYPE_COPY_SEND, MACH_MSG_TYPE_MAKE_SEND)
                | MACH_MSGH_BITS_COMPLEX,
            msgh_size: mem::size_of::<Message>() as mach_msg_size_t,
            msgh_remote_port: remote.raw(),
            msgh_local_port: reply_port.raw(),
            // Diagnostic only; the bar echoes it back.
            msgh_id: reply_port.raw() as mach_msg_id_t,
            ..Default::default()
        },
        descriptor_count: 1,
        descriptor: mach_msg_ool_descriptor_t {
            address: payload.as_ptr() as *mut c_void,
            size: payload.len() as mach_msg_size_t,
            // The sender keeps ownership of its heap copy.
            deallocate: 0,
            copy: MACH_MSG_VIRTUAL_COPY as _,
            pad1: 0,
            type_: MACH_MSG_OOL_DESCRIPTOR as _,
        },
    };

    // SAFETY: the message references `payload`, which outlives the call;
    // the kernel virtual-copies it during send.
    let kr = unsafe {
        mach_msg(
            &mut message.header,
            MACH_SEND_MSG,
            mem::size_of::<Message>() as mach_msg_size_t,
            0,
            MACH_PORT_NULL,
            MACH_MSG_TIMEOUT_NONE,
            MACH_PORT_NULL,
        )
    };
    if kr != MACH_MSG_SUCCESS {
        return Err(IpcError::Send(kr));
    }

    let mut buffer = Buffer::zeroed();
    receive(&mut buffer, reply_port.raw(), Some(REPLY_TIMEOUT_MS))?;

    // Copy the reply out before `buffer` drops and destroys the kernel's
    // out-of-line memory with the message.
    buffer.payload().map(<[u8]>::to_vec).ok_or(IpcError::EmptyReply)
}

/// `MACH_MSGH_BITS`: remote disposition in the low byte, local in the
/// next.
const fn msgh_bits(remote: u32, local: u32) -> u32 {
    remote | (local << 8)
}
