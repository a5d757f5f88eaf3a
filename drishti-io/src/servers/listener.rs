//! Shared TCP accept loop for all protocol servers
//!
//! Each server owns one `<name>-accept` thread polling a non-blocking
//! listener, and spawns one `<name>-conn` thread per accepted client.
//!
//! ```text
//! ┌──────────────┐  accept  ┌──────────────┐
//! │ <name>-accept│─────────▶│ <name>-conn  │ × N  (handler.handle)
//! └──────────────┘          └──────────────┘
//! ```
//!
//! Stopping sets the server's shutdown flag; the accept loop notices within
//! one poll interval, drops the listener and gives workers a bounded grace
//! period. Workers watch [`ConnContext::is_active`] between I/O operations.

use crate::error::{Error, Result};
use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Sleep between accept polls when no connection is pending
const ACCEPT_POLL: Duration = Duration::from_millis(10);

/// Bound on joining the accept thread
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Grace period for connection workers once the server stops
const WORKER_GRACE: Duration = Duration::from_secs(1);

/// Flags a connection worker must observe
#[derive(Clone)]
pub struct ConnContext {
    running: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
}

impl ConnContext {
    /// Process still running and this server not stopped
    pub fn is_active(&self) -> bool {
        self.running.load(Ordering::Relaxed) && !self.shutdown.load(Ordering::Relaxed)
    }
}

/// Serves one accepted connection
pub trait ConnectionHandler: Send + Sync + 'static {
    fn handle(&self, stream: TcpStream, peer: SocketAddr, ctx: &ConnContext) -> Result<()>;
}

/// Running server; stop it explicitly or by dropping
pub struct ServerHandle {
    name: &'static str,
    local_addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    accept_thread: Option<JoinHandle<()>>,
}

impl ServerHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Bound address (useful with port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Signal shutdown and join the accept thread with a bounded wait
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let Some(handle) = self.accept_thread.take() else {
            return;
        };
        if join_with_timeout(handle, JOIN_TIMEOUT) {
            log::info!("{} server stopped", self.name);
        } else {
            log::warn!("{} server did not stop within {:?}", self.name, JOIN_TIMEOUT);
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Wait for a thread to finish; true if it was joined
pub fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(ACCEPT_POLL);
    }
    if handle.join().is_err() {
        log::error!("Joined thread had panicked");
    }
    true
}

/// Bind `addr` and serve connections with `handler` until stopped.
///
/// Bind failures are returned as [`Error::Bind`] (fatal at startup).
pub fn spawn_server<H: ConnectionHandler>(
    name: &'static str,
    addr: &str,
    running: Arc<AtomicBool>,
    handler: Arc<H>,
) -> Result<ServerHandle> {
    let listener = TcpListener::bind(addr).map_err(|source| Error::Bind {
        addr: addr.to_string(),
        source,
    })?;
    listener.set_nonblocking(true)?;
    let local_addr = listener.local_addr()?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let ctx = ConnContext {
        running,
        shutdown: Arc::clone(&shutdown),
    };

    let accept_thread = thread::Builder::new()
        .name(format!("{}-accept", name))
        .spawn(move || accept_loop(name, listener, handler, ctx))
        .map_err(|e| Error::Thread(format!("{}-accept: {}", name, e)))?;

    log::info!("{} server listening on {}", name, local_addr);

    Ok(ServerHandle {
        name,
        local_addr,
        shutdown,
        accept_thread: Some(accept_thread),
    })
}

fn accept_loop<H: ConnectionHandler>(
    name: &'static str,
    listener: TcpListener,
    handler: Arc<H>,
    ctx: ConnContext,
) {
    let mut workers: Vec<JoinHandle<()>> = Vec::new();

    while ctx.is_active() {
        match listener.accept() {
            Ok((stream, peer)) => {
                if let Err(e) = stream.set_nonblocking(false) {
                    log::error!("{}: failed to set blocking mode for {}: {}", name, peer, e);
                    continue;
                }
                log::debug!("{} connection from {}", name, peer);

                let handler = Arc::clone(&handler);
                let conn_ctx = ctx.clone();
                let spawned = thread::Builder::new()
                    .name(format!("{}-conn", name))
                    .spawn(move || {
                        if let Err(e) = handler.handle(stream, peer, &conn_ctx) {
                            log::debug!("{} client {} error: {}", name, peer, e);
                        }
                        log::debug!("{} client {} disconnected", name, peer);
                    });
                match spawned {
                    Ok(handle) => workers.push(handle),
                    Err(e) => log::error!("{}: failed to spawn connection thread: {}", name, e),
                }
                workers.retain(|w| !w.is_finished());
            }
            Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL);
            }
            Err(e) => {
                log::error!("{} accept error: {}", name, e);
                thread::sleep(ACCEPT_POLL);
            }
        }
    }

    drop(listener);

    let deadline = Instant::now() + WORKER_GRACE;
    for worker in workers {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if !join_with_timeout(worker, remaining) {
            log::debug!("{}: leaving a connection worker behind", name);
        }
    }
}
