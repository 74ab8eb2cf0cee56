//! Blocking event server: the bar pushes env blobs at a registered
//! bootstrap service and a handler consumes them.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{info, warn};

use barlink_proto::Env;

use crate::message::{self, Buffer};
use crate::port::{ReceiveRight, SendRight, bootstrap_port, register_service};
use crate::{Result, client};

/// A bootstrap-registered receive port the bar delivers events to.
///
/// Dropping the server releases the receive right; the bootstrap
/// registration dies with it.
pub struct EventServer {
    receive: ReceiveRight,
    _bootstrap: SendRight,
    running: Arc<AtomicBool>,
}

impl EventServer {
    /// Allocates a receive port and registers it under the verbatim
    /// `service_name` in the bootstrap namespace.
    pub fn bind(service_name: &str) -> Result<Self> {
        let receive = ReceiveRight::allocate()?;
        receive.insert_send_right()?;
        let bootstrap = bootstrap_port()?;
        register_service(&bootstrap, service_name, &receive)?;
        info!(service = service_name, "event server registered");
        Ok(Self {
            receive,
            _bootstrap: bootstrap,
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    /// The run flag. Clearing it (from the handler or another thread)
    /// stops [`run`](Self::run) once the in-flight event completes.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Receives events until the run flag clears or a receive fails,
    /// invoking `handler` with each decoded env blob.
    ///
    /// Blocks indefinitely between events. The [`Env`] handed to the
    /// handler borrows the message's out-of-line memory and is released
    /// when the handler returns. On exit the process-wide command
    /// connection is dropped alongside the server's rights.
    pub fn run<F>(self, mut handler: F)
    where
        F: FnMut(Env<'_>),
    {
        while self.running.load(Ordering::Acquire) {
            let mut buffer = Buffer::zeroed();
            if let Err(error) = message::receive(&mut buffer, self.receive.raw(), None) {
                warn!(%error, "event receive failed, draining");
                break;
            }
            if let Some(payload) = buffer.payload() {
                handler(Env::new(payload));
            }
        }
        info!("event server stopped");
        client::shutdown();
    }
}

/// Binds an event server under `service_name` and runs `handler` until
/// the handler clears the server's run flag.
///
/// Returns `false` when the port cannot be allocated or registered, and
/// `true` after a clean stop.
pub fn run_event_server<F>(service_name: &str, mut handler: F) -> bool
where
    F: FnMut(Env<'_>, &AtomicBool),
{
    let server = match EventServer::bind(service_name) {
        Ok(server) => server,
        Err(error) => {
            warn!(service = service_name, %error, "event server setup failed");
            return false;
        }
    };
    let running = server.running_flag();
    server.run(move |env| handler(env, &running));
    true
}
