//! Connection loop
//!
//! Accepts TCP connections and hands each one to a [`Session`]. In the
//! default sequential mode the next connection is accepted only after the
//! current session ended; threaded mode runs one session per OS thread.
//!
//! The loop polls a non-blocking listener so a [`ShutdownHandle`] request is
//! noticed within a few milliseconds, even when no client ever connects.

use crate::daemon::config::{ConcurrencyMode, ServerConfig};
use crate::daemon::session::{Session, SessionId, SessionOptions};
use anyhow::{Context, Result};
use chrono::Local;
use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Sleep between accept attempts while idle
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Back-off after an accept error that is not WouldBlock
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Server lifecycle object.
///
/// Cloned into signal handlers and tests. A request stops the accept loop
/// and shuts down every connection still being served, so blocked session
/// reads return and the listener is released.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    requested: Arc<AtomicBool>,
    active: Arc<Mutex<HashMap<SessionId, TcpStream>>>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);

        if let Ok(active) = self.active.lock() {
            for (id, stream) in active.iter() {
                debug!(session = id, "Closing connection for shutdown");
                let _ = stream.shutdown(Shutdown::Both);
            }
        }
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Raw flag, for `signal_hook::flag` style registration
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.requested)
    }

    fn track(&self, id: SessionId, stream: &TcpStream) {
        let clone = match stream.try_clone() {
            Ok(clone) => clone,
            Err(e) => {
                warn!(session = id, error = %e, "Connection not tracked for shutdown");
                return;
            }
        };
        if let Ok(mut active) = self.active.lock() {
            active.insert(id, clone);
        }
    }

    fn untrack(&self, id: SessionId) {
        if let Ok(mut active) = self.active.lock() {
            active.remove(&id);
        }
    }

    /// Number of connections currently being served
    pub fn active_sessions(&self) -> usize {
        self.active.lock().map(|active| active.len()).unwrap_or(0)
    }
}

pub struct Server {
    listener: TcpListener,
    config: ServerConfig,
    shutdown: ShutdownHandle,
    next_id: SessionId,
    workers: Vec<JoinHandle<()>>,
}

impl Server {
    /// Bind the listening socket. Failure here is the only fatal server error.
    pub fn bind(config: ServerConfig) -> Result<Self> {
        let addr = SocketAddr::new(config.bind, config.port);
        let listener =
            TcpListener::bind(addr).with_context(|| format!("Failed to bind {}", addr))?;

        listener
            .set_nonblocking(true)
            .context("Failed to make the listener non-blocking")?;

        Ok(Self {
            listener,
            config,
            shutdown: ShutdownHandle::new(),
            next_id: 0,
            workers: Vec::new(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Accept loop. Returns once shutdown was requested; the listener is
    /// closed when the server is dropped on return.
    pub fn run(mut self) -> Result<()> {
        let addr = self.local_addr()?;
        info!(
            %addr,
            framing = %self.config.framing,
            mode = ?self.config.mode,
            "Server listening"
        );
        warn!(
            user = %whoami::username(),
            "Commands run with the privileges of this user"
        );

        while !self.shutdown.is_requested() {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(e) = self.accept_connection(stream, peer) {
                        error!(%peer, error = %e, "Error accepting connection");
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.reap_workers();
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(error = %e, "Error accepting connection");
                    thread::sleep(ACCEPT_ERROR_BACKOFF);
                }
            }
        }

        info!("Shutting down server");
        self.join_workers();
        Ok(())
    }

    fn accept_connection(&mut self, stream: TcpStream, peer: SocketAddr) -> io::Result<()> {
        // the listener is non-blocking; sessions use blocking I/O
        stream.set_nonblocking(false)?;
        stream.set_read_timeout(self.config.read_timeout)?;

        self.next_id += 1;
        let id = self.next_id;
        info!(
            session = id,
            peer = %peer.ip(),
            at = %Local::now().format("%d/%m/%Y %H:%M:%S"),
            "Client connected"
        );

        let options = SessionOptions::from(&self.config);
        match self.config.mode {
            ConcurrencyMode::Sequential => {
                serve(id, stream, peer.ip(), options, &self.shutdown);
            }
            ConcurrencyMode::Threaded => {
                let shutdown = self.shutdown.clone();
                let worker = thread::Builder::new()
                    .name(format!("rexsh-session-{}", id))
                    .spawn(move || serve(id, stream, peer.ip(), options, &shutdown))?;
                self.workers.push(worker);
            }
        }

        Ok(())
    }

    fn reap_workers(&mut self) {
        let (finished, running): (Vec<_>, Vec<_>) =
            self.workers.drain(..).partition(|worker| worker.is_finished());
        self.workers = running;

        for worker in finished {
            if worker.join().is_err() {
                error!("Session thread panicked");
            }
        }
    }

    fn join_workers(&mut self) {
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!("Session thread panicked");
            }
        }
    }
}

fn serve(
    id: SessionId,
    stream: TcpStream,
    peer: IpAddr,
    options: SessionOptions,
    shutdown: &ShutdownHandle,
) {
    shutdown.track(id, &stream);
    // a request may have raced with the accept
    if shutdown.is_requested() {
        let _ = stream.shutdown(Shutdown::Both);
    }

    let summary = Session::new(id, stream, peer, options).run();
    shutdown.untrack(id);

    info!(
        session = id,
        commands = summary.commands,
        bytes = summary.bytes_sent,
        "Session closed"
    );
}
