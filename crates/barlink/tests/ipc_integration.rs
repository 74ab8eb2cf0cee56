//! End-to-end exchanges against a mock bar living in this process.
//!
//! The command connection cache is process-wide, so every test takes the
//! serialization lock and starts from a clean cache.

#![cfg(target_os = "macos")]

use std::ffi::CString;
use std::mem;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, mpsc};
use std::thread;
use std::time::Duration;

use mach2::bootstrap::{bootstrap_look_up, bootstrap_register};
use mach2::kern_return::KERN_SUCCESS;
use mach2::mach_port::{mach_port_allocate, mach_port_deallocate, mach_port_insert_right};
use mach2::message::{
    MACH_MSG_SUCCESS, MACH_MSG_TIMEOUT_NONE, MACH_MSG_TYPE_COPY_SEND, MACH_MSG_TYPE_MAKE_SEND,
    MACH_MSG_TYPE_MOVE_SEND, MACH_MSG_VIRTUAL_COPY, MACH_MSGH_BITS_COMPLEX,
    MACH_MSG_OOL_DESCRIPTOR, MACH_RCV_MSG, MACH_SEND_MSG, mach_msg, mach_msg_header_t,
    mach_msg_ool_descriptor_t, mach_msg_return_t, mach_msg_size_t, mach_msg_trailer_t,
};
use mach2::port::{MACH_PORT_NULL, MACH_PORT_RIGHT_RECEIVE, mach_port_t};
use mach2::task::{TASK_BOOTSTRAP_PORT, task_get_special_port};
use mach2::traps::mach_task_self;
use mach2::vm::mach_vm_deallocate;
use mach2::vm_types::{mach_vm_address_t, mach_vm_size_t};

use barlink::{refresh, run_event_server, send_command, shutdown};

static TEST_LOCK: Mutex<()> = Mutex::new(());
static NAME_COUNTER: AtomicU32 = AtomicU32::new(0);

// Enumerates this task's port names; used to check right accounting.
unsafe extern "C" {
    fn mach_port_names(
        task: mach_port_t,
        names: *mut *mut mach_port_t,
        names_count: *mut u32,
        types: *mut *mut u32,
        types_count: *mut u32,
    ) -> i32;
}

/// Number of port names currently held by this task.
fn port_name_count() -> usize {
    let mut names: *mut mach_port_t = std::ptr::null_mut();
    let mut names_count: u32 = 0;
    let mut types: *mut u32 = std::ptr::null_mut();
    let mut types_count: u32 = 0;
    unsafe {
        assert_eq!(
            mach_port_names(
                mach_task_self(),
                &mut names,
                &mut names_count,
                &mut types,
                &mut types_count,
            ),
            KERN_SUCCESS
        );
        mach_vm_deallocate(
            mach_task_self(),
            names as mach_vm_address_t,
            (names_count as usize * mem::size_of::<mach_port_t>()) as mach_vm_size_t,
        );
        mach_vm_deallocate(
            mach_task_self(),
            types as mach_vm_address_t,
            (types_count as usize * mem::size_of::<u32>()) as mach_vm_size_t,
        );
    }
    names_count as usize
}

fn serialize() -> std::sync::MutexGuard<'static, ()> {
    let guard = TEST_LOCK
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    shutdown();
    guard
}

fn unique_bar_name() -> String {
    format!(
        "test{}n{}",
        std::process::id(),
        NAME_COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

#[repr(C)]
struct OolMessage {
    header: mach_msg_header_t,
    descriptor_count: mach_msg_size_t,
    descriptor: mach_msg_ool_descriptor_t,
}

#[repr(C)]
struct OolBuffer {
    header: mach_msg_header_t,
    descriptor_count: mach_msg_size_t,
    descriptor: mach_msg_ool_descriptor_t,
    trailer: mach_msg_trailer_t,
}

/// Allocates a receive port and registers it as `git.felix.<bar>`.
fn register_bar(bar: &str) -> mach_port_t {
    register_raw_service(&format!("git.felix.{bar}"))
}

fn register_raw_service(service: &str) -> mach_port_t {
    let mut port: mach_port_t = MACH_PORT_NULL;
    unsafe {
        assert_eq!(
            mach_port_allocate(mach_task_self(), MACH_PORT_RIGHT_RECEIVE, &mut port),
            KERN_SUCCESS
        );
        assert_eq!(
            mach_port_insert_right(mach_task_self(), port, port, MACH_MSG_TYPE_MAKE_SEND),
            KERN_SUCCESS
        );
        let mut bootstrap: mach_port_t = MACH_PORT_NULL;
        assert_eq!(
            task_get_special_port(mach_task_self(), TASK_BOOTSTRAP_PORT, &mut bootstrap),
            KERN_SUCCESS
        );
        let name = CString::new(service).unwrap();
        assert_eq!(
            bootstrap_register(bootstrap, name.as_ptr().cast_mut(), port),
            KERN_SUCCESS
        );
        mach_port_deallocate(mach_task_self(), bootstrap);
    }
    port
}

/// Blocks for one request, returning its payload and the caller's reply
/// port.
fn receive_request(port: mach_port_t) -> (Vec<u8>, mach_port_t) {
    let mut buffer: OolBuffer = unsafe { mem::zeroed() };
    let kr = unsafe {
        mach_msg(
            &mut buffer.header,
            MACH_RCV_MSG,
            0,
            mem::size_of::<OolBuffer>() as mach_msg_size_t,
            port,
            MACH_MSG_TIMEOUT_NONE,
            MACH_PORT_NULL,
        )
    };
    assert_eq!(kr, MACH_MSG_SUCCESS);
    let payload = unsafe {
        std::slice::from_raw_parts(
            buffer.descriptor.address as *const u8,
            buffer.descriptor.size as usize,
        )
    }
    .to_vec();
    unsafe {
        mach_vm_deallocate(
            mach_task_self(),
            buffer.descriptor.address as mach_vm_address_t,
            buffer.descriptor.size as mach_vm_size_t,
        );
    }
    (payload, buffer.header.msgh_remote_port)
}

/// Sends `bytes` as an out-of-line payload. `disposition` applies to the
/// destination right.
fn send_ool(remote: mach_port_t, bytes: &[u8], disposition: u32) -> mach_msg_return_t {
    let mut message = OolMessage {
        header: mach_msg_header_t {
            msgh_bits: disposition | MACH_MSGH_BITS_COMPLEX,
            msgh_size: mem::size_of::<OolMessage>() as mach_msg_size_t,
            msgh_remote_port: remote,
            msgh_local_port: MACH_PORT_NULL,
            ..Default::default()
        },
        descriptor_count: 1,
        descriptor: mach_msg_ool_descriptor_t {
            address: bytes.as_ptr() as *mut _,
            size: bytes.len() as mach_msg_size_t,
            deallocate: 0,
            copy: MACH_MSG_VIRTUAL_COPY as _,
            pad1: 0,
            type_: MACH_MSG_OOL_DESCRIPTOR as _,
        },
    };
    unsafe {
        mach_msg(
            &mut message.header,
            MACH_SEND_MSG,
            mem::size_of::<OolMessage>() as mach_msg_size_t,
            0,
            MACH_PORT_NULL,
            MACH_MSG_TIMEOUT_NONE,
            MACH_PORT_NULL,
        )
    }
}

/// Joins the request's argv with `|` and NUL-terminates it, so the
/// client's reply string makes token boundaries visible.
fn echo_reply(payload: &[u8]) -> Vec<u8> {
    let body = payload.strip_suffix(&[0]).unwrap_or(payload);
    let tokens: Vec<&[u8]> = body.split(|&b| b == 0).collect();
    let mut reply = tokens.join(&b'|');
    reply.push(0);
    reply
}

/// Serves `delays.len()` requests, sleeping per-request before replying.
/// Late replies to an abandoned reply port are expected to fail; those
/// send errors are ignored.
fn serve(port: mach_port_t, delays: Vec<Option<Duration>>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        for delay in delays {
            let (payload, reply_port) = receive_request(port);
            if let Some(delay) = delay {
                thread::sleep(delay);
            }
            let reply = echo_reply(&payload);
            send_ool(reply_port, &reply, MACH_MSG_TYPE_MOVE_SEND);
        }
    })
}

#[test]
fn command_roundtrip_echoes_argv() {
    let _guard = serialize();
    let bar = unique_bar_name();
    let port = register_bar(&bar);
    let server = serve(port, vec![None]);

    assert_eq!(send_command(&bar, "--query bar"), "--query|bar");

    server.join().unwrap();
    shutdown();
}

#[test]
fn quoted_argument_travels_as_one_token() {
    let _guard = serialize();
    let bar = unique_bar_name();
    let port = register_bar(&bar);
    let server = serve(port, vec![None]);

    assert_eq!(send_command(&bar, "--msg 'hello world'"), "--msg|hello world");

    server.join().unwrap();
    shutdown();
}

#[test]
fn missing_bar_then_refresh_recovers() {
    let _guard = serialize();
    let bar = unique_bar_name();

    // The bar is not running: every call degrades, none panics.
    assert_eq!(send_command(&bar, "--query bar"), "");
    assert!(!refresh(&bar));

    let port = register_bar(&bar);
    let server = serve(port, vec![None]);

    assert!(refresh(&bar));
    assert_eq!(send_command(&bar, "--query bar"), "--query|bar");

    server.join().unwrap();
    shutdown();
}

#[test]
fn concurrent_senders_each_get_their_own_reply() {
    let _guard = serialize();
    let bar = unique_bar_name();
    let port = register_bar(&bar);
    let count = 100;
    let server = serve(port, vec![None; count + 1]);

    // Warm the connection cache so its one send right is in the baseline,
    // then every exchange must leave the task's right count untouched.
    assert_eq!(send_command(&bar, "--warm up"), "--warm|up");
    let baseline = port_name_count();

    let senders: Vec<_> = (0..count)
        .map(|i| {
            let bar = bar.clone();
            thread::spawn(move || {
                assert_eq!(
                    send_command(&bar, &format!("--ping {i}")),
                    format!("--ping|{i}")
                );
            })
        })
        .collect();
    for sender in senders {
        sender.join().unwrap();
    }

    assert_eq!(port_name_count(), baseline, "exchanges leaked port rights");

    server.join().unwrap();
    shutdown();
}

#[test]
fn slow_reply_times_out_and_connection_survives() {
    let _guard = serialize();
    let bar = unique_bar_name();
    let port = register_bar(&bar);
    let server = serve(port, vec![Some(Duration::from_millis(400)), None]);

    // The reply arrives well past the transport timeout.
    assert_eq!(send_command(&bar, "--slow call"), "");

    // Let the mock finish its late (failing) reply before the next
    // request so the second exchange is served promptly.
    thread::sleep(Duration::from_millis(450));
    assert_eq!(send_command(&bar, "--query bar"), "--query|bar");

    server.join().unwrap();
    shutdown();
}

#[test]
fn event_server_delivers_env_and_stops_on_request() {
    let _guard = serialize();
    let service = format!("git.felix.events-{}", unique_bar_name());
    let (result_tx, result_rx) = mpsc::channel();

    let runner = {
        let service = service.clone();
        thread::spawn(move || {
            run_event_server(&service, move |env, running| {
                result_tx
                    .send((
                        env.get("NAME").to_owned(),
                        env.get("LEVEL").to_owned(),
                        env.get("MISSING").to_owned(),
                    ))
                    .unwrap();
                running.store(false, Ordering::Release);
            })
        })
    };

    // The runner registers asynchronously; poll the namespace until the
    // service shows up.
    let name = CString::new(service).unwrap();
    let mut remote: mach_port_t = MACH_PORT_NULL;
    let mut bootstrap: mach_port_t = MACH_PORT_NULL;
    unsafe {
        assert_eq!(
            task_get_special_port(mach_task_self(), TASK_BOOTSTRAP_PORT, &mut bootstrap),
            KERN_SUCCESS
        );
    }
    for _ in 0..200 {
        let kr = unsafe { bootstrap_look_up(bootstrap, name.as_ptr(), &mut remote) };
        if kr == KERN_SUCCESS {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    assert_ne!(remote, MACH_PORT_NULL, "event service never registered");

    assert_eq!(
        send_ool(remote, b"NAME\0sb\0LEVEL\0info\0\0", MACH_MSG_TYPE_COPY_SEND),
        MACH_MSG_SUCCESS
    );

    let (name_var, level_var, missing_var) =
        result_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(name_var, "sb");
    assert_eq!(level_var, "info");
    assert_eq!(missing_var, "");
    assert!(runner.join().unwrap());

    unsafe {
        mach_port_deallocate(mach_task_self(), remote);
        mach_port_deallocate(mach_task_self(), bootstrap);
    }
    shutdown();
}
