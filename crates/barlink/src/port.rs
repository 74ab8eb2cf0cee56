//! RAII wrappers for Mach port rights and bootstrap namespace access.
//!
//! Every right acquired here is released by a scope-based drop, so call
//! sites never issue raw release calls and failure paths cannot leak a
//! right.

use std::ffi::CString;

use mach2::bootstrap::{bootstrap_look_up, bootstrap_register};
use mach2::kern_return::KERN_SUCCESS;
use mach2::mach_port::{
    mach_port_allocate, mach_port_deallocate, mach_port_insert_right, mach_port_mod_refs,
};
use mach2::message::MACH_MSG_TYPE_MAKE_SEND;
use mach2::port::{MACH_PORT_NULL, MACH_PORT_RIGHT_RECEIVE, mach_port_t};
use mach2::task::{TASK_BOOTSTRAP_PORT, task_get_special_port};
use mach2::traps::mach_task_self;

use crate::{IpcError, Result};

/// Bars advertise themselves as `git.felix.<bar_name>`.
pub(crate) const SERVICE_NAME_PREFIX: &str = "git.felix.";

/// Size of the service-name buffer on the bar side.
const SERVICE_NAME_MAX: usize = 256;

/// A send right to a port owned elsewhere. Deallocated on drop.
pub(crate) struct SendRight(mach_port_t);

impl SendRight {
    pub(crate) fn raw(&self) -> mach_port_t {
        self.0
    }
}

impl Drop for SendRight {
    fn drop(&mut self) {
        if self.0 != MACH_PORT_NULL {
            // SAFETY: the right was acquired by this wrapper and is
            // released exactly once.
            unsafe {
                mach_port_deallocate(mach_task_self(), self.0);
            }
        }
    }
}

/// A receive right owned by this task, optionally with a make-send right
/// inserted under the same name. Both are dropped together.
pub(crate) struct ReceiveRight(mach_port_t);

impl ReceiveRight {
    pub(crate) fn allocate() -> Result<Self> {
        let mut port: mach_port_t = MACH_PORT_NULL;
        // SAFETY: allocating a fresh receive right in our own IPC space;
        // `port` is a valid out-parameter.
        let kr = unsafe { mach_port_allocate(mach_task_self(), MACH_PORT_RIGHT_RECEIVE, &mut port) };
        if kr != KERN_SUCCESS {
            return Err(IpcError::AllocateReceiveRight(kr));
        }
        Ok(Self(port))
    }

    /// Inserts a make-send right under the same name so a peer can send
    /// to this port.
    pub(crate) fn insert_send_right(&self) -> Result<()> {
        // SAFETY: `self.0` names a receive right this wrapper owns.
        let kr = unsafe {
            mach_port_insert_right(mach_task_self(), self.0, self.0, MACH_MSG_TYPE_MAKE_SEND)
        };
        if kr != KERN_SUCCESS {
            return Err(IpcError::InsertSendRight(kr));
        }
        Ok(())
    }

    pub(crate) fn raw(&self) -> mach_port_t {
        self.0
    }
}

impl Drop for ReceiveRight {
    fn drop(&mut self) {
        // SAFETY: drops the receive right, then any send right inserted
        // under the same name; the second call is a no-op when no send
        // right exists.
        unsafe {
            let task = mach_task_self();
            mach_port_mod_refs(task, self.0, MACH_PORT_RIGHT_RECEIVE, -1);
            mach_port_deallocate(task, self.0);
        }
    }
}

/// Obtains the task's bootstrap port as an owned send right.
pub(crate) fn bootstrap_port() -> Result<SendRight> {
    let mut port: mach_port_t = MACH_PORT_NULL;
    // SAFETY: TASK_BOOTSTRAP_PORT is a valid special-port selector and
    // `port` is a valid out-parameter.
    let kr = unsafe { task_get_special_port(mach_task_self(), TASK_BOOTSTRAP_PORT, &mut port) };
    if kr != KERN_SUCCESS {
        return Err(IpcError::Bootstrap(kr));
    }
    Ok(SendRight(port))
}

/// Looks the bar's service port up in the bootstrap namespace.
///
/// The bootstrap port is released on every path; the returned send right
/// is the only right that survives the call.
pub(crate) fn resolve_service(bar_name: &str) -> Result<SendRight> {
    let name = service_name(bar_name)?;
    let bootstrap = bootstrap_port()?;

    let mut port: mach_port_t = MACH_PORT_NULL;
    // SAFETY: `name` is NUL-terminated and `port` is a valid
    // out-parameter.
    let kr = unsafe { bootstrap_look_up(bootstrap.raw(), name.as_ptr(), &mut port) };
    if kr != KERN_SUCCESS {
        return Err(IpcError::ServiceNotFound {
            name: name.into_string().unwrap_or_default(),
            code: kr,
        });
    }
    Ok(SendRight(port))
}

/// Registers `port` under the verbatim `name` so a peer can look it up
/// and send to it.
pub(crate) fn register_service(
    bootstrap: &SendRight,
    name: &str,
    port: &ReceiveRight,
) -> Result<()> {
    let cname =
        CString::new(name).map_err(|_| IpcError::InvalidServiceName(name.replace('\0', "")))?;
    // SAFETY: `cname` outlives the call; the kernel copies the name.
    let kr = unsafe { bootstrap_register(bootstrap.raw(), cname.as_ptr().cast_mut(), port.raw()) };
    if kr != KERN_SUCCESS {
        return Err(IpcError::Register(kr));
    }
    Ok(())
}

fn service_name(bar_name: &str) -> Result<CString> {
    if bar_name.is_empty() {
        return Err(IpcError::InvalidServiceName(String::new()));
    }
    let name = format!("{SERVICE_NAME_PREFIX}{bar_name}");
    if name.len() >= SERVICE_NAME_MAX {
        return Err(IpcError::InvalidServiceName(name));
    }
    match CString::new(name) {
        Ok(cstr) => Ok(cstr),
        Err(err) => Err(IpcError::InvalidServiceName(
            String::from_utf8_lossy(&err.into_vec()).into_owned(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_name_is_prefixed() {
        let name = service_name("sketchybar").unwrap();
        assert_eq!(name.as_bytes(), b"git.felix.sketchybar");
    }

    #[test]
    fn empty_bar_name_is_rejected() {
        assert!(matches!(
            service_name(""),
            Err(IpcError::InvalidServiceName(_))
        ));
    }

    #[test]
    fn oversized_bar_name_is_rejected() {
        let long = "x".repeat(SERVICE_NAME_MAX);
        assert!(matches!(
            service_name(&long),
            Err(IpcError::InvalidServiceName(_))
        ));
    }

    #[test]
    fn interior_nul_is_rejected() {
        assert!(matches!(
            service_name("a\0b"),
            Err(IpcError::InvalidServiceName(_))
        ));
    }
}
