//! TCP listener transport.
//!
//! Binds eagerly (failure to bind is the one fatal startup error and is
//! surfaced to the caller), then accepts on a monitor thread with a
//! non-blocking listener: `WouldBlock` backs off briefly, hard accept
//! errors back off longer. Every accepted stream becomes a
//! [`TcpConnection`] tracked by the controller with the default idle
//! timeout.

use std::io;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::connection::{IdleTimeout, TcpConnection};
use crate::controller::Controller;

use super::Transport;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(25);
const ERROR_BACKOFF: Duration = Duration::from_millis(150);

/// Listening-socket transport with a background accept monitor.
pub struct TcpTransport {
    local_addr: SocketAddr,
    stop: Arc<AtomicBool>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl TcpTransport {
    /// Binds a listener and starts the accept monitor.
    ///
    /// # Errors
    ///
    /// Fails when the address cannot be bound or the listener cannot be
    /// switched to non-blocking mode.
    pub fn bind(controller: Arc<Controller>, addr: impl ToSocketAddrs) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let stop = Arc::new(AtomicBool::new(false));
        let monitor = {
            let stop = Arc::clone(&stop);
            thread::spawn(move || run_accept_loop(&listener, &controller, &stop))
        };

        info!(%local_addr, "tcp transport listening");
        Ok(Self {
            local_addr,
            stop,
            monitor: Mutex::new(Some(monitor)),
        })
    }

    /// The bound listen address (useful with port 0).
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Transport for TcpTransport {
    fn name(&self) -> &'static str {
        "tcp"
    }

    fn is_active(&self) -> bool {
        !self.stop.load(Ordering::Acquire)
    }

    fn shutdown(&self) {
        self.stop.store(true, Ordering::Release);
        let handle = self.monitor.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("tcp accept monitor panicked");
            }
        }
    }
}

impl Drop for TcpTransport {
    /// The monitor thread holds the controller alive through its closure;
    /// joining it here keeps an unmanaged transport from outliving its
    /// owner.
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_accept_loop(listener: &TcpListener, controller: &Arc<Controller>, stop: &AtomicBool) {
    while !stop.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((stream, peer)) => match TcpConnection::from_stream(stream) {
                Ok(connection) => {
                    let id = controller.add_connection(Arc::new(connection), IdleTimeout::Default);
                    debug!(%peer, id, "tcp connection accepted");
                }
                Err(err) => warn!(%peer, error = %err, "accepted stream unusable"),
            },
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_BACKOFF);
            }
            Err(err) => {
                warn!(error = %err, "tcp accept failed");
                thread::sleep(ERROR_BACKOFF);
            }
        }
    }
    debug!("tcp accept monitor exiting");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
