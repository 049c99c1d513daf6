//! Listening socket and connection multiplexing.
//!
//! The server owns no threads. A host loop calls [`Server::pump`]
//! repeatedly; each pump accepts whatever connections are pending, runs a
//! zero-timeout `poll(2)` over the live connections and advances every
//! ready one by at most one read and one write.

use std::io;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::os::fd::{AsFd, AsRawFd};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::sys::socket::{
    AddressFamily, Backlog, SockFlag, SockType, SockaddrIn, SockaddrIn6, bind, listen, setsockopt,
    socket, sockopt,
};
use tracing::{debug, info, warn};

use super::connection::{ClientConnection, Readiness};
use super::error::ServerError;
use super::methods::ActionHandler;
use super::pipeline::Pipeline;
use crate::logging::LogThrottle;

const ACCEPT_ERROR_LOG_INTERVAL: Duration = Duration::from_secs(5);

/// Socket-level settings for [`Server::bind`].
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub bind_address: String,
    pub bind_port: u16,
    pub backlog: u32,
    /// Idle time after which a connection is dropped.
    pub timeout: Duration,
    /// Largest request a connection may buffer before it is dropped.
    pub max_request_bytes: usize,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            bind_port: 8765,
            backlog: 5,
            timeout: Duration::from_secs(5),
            max_request_bytes: 128 * 1024 * 1024,
        }
    }
}

/// Single-threaded RPC server.
pub struct Server<H> {
    listener: TcpListener,
    local_addr: SocketAddr,
    connections: Vec<ClientConnection>,
    pipeline: Pipeline<H>,
    timeout: Duration,
    max_request_bytes: usize,
    accept_errors: LogThrottle,
}

impl<H: ActionHandler> Server<H> {
    /// Bind the listening socket. Failing here is the only fatal error.
    pub fn bind(options: &ServerOptions, pipeline: Pipeline<H>) -> Result<Self, ServerError> {
        let addr = resolve(&options.bind_address, options.bind_port)?;
        let listener = bind_listener(addr, options.backlog)?;
        listener
            .set_nonblocking(true)
            .map_err(|source| ServerError::NonBlocking { source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { addr, source })?;

        info!(addr = %local_addr, "RPC server listening");

        Ok(Self {
            listener,
            local_addr,
            connections: Vec::new(),
            pipeline,
            timeout: options.timeout,
            max_request_bytes: options.max_request_bytes,
            accept_errors: LogThrottle::new(ACCEPT_ERROR_LOG_INTERVAL),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn pipeline(&self) -> &Pipeline<H> {
        &self.pipeline
    }

    pub fn pipeline_mut(&mut self) -> &mut Pipeline<H> {
        &mut self.pipeline
    }

    /// Make one round of non-blocking progress. Never blocks.
    pub fn pump(&mut self) {
        self.accept_pending();
        self.advance_connections();
        self.evict();
    }

    fn accept_pending(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(error) = stream.set_nonblocking(true) {
                        warn!(peer = %peer, error = %error, "Failed to configure client socket");
                        continue;
                    }
                    if let Err(error) = stream.set_nodelay(true) {
                        debug!(peer = %peer, error = %error, "Failed to disable Nagle's algorithm");
                    }
                    debug!(peer = %peer, "Client connected");
                    self.connections
                        .push(ClientConnection::new(stream, peer, self.max_request_bytes));
                }
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => break,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) => {
                    if let Some(suppressed) = self.accept_errors.admit() {
                        warn!(error = %error, suppressed, "Failed to accept connection");
                    }
                    break;
                }
            }
        }
    }

    fn advance_connections(&mut self) {
        if self.connections.is_empty() {
            return;
        }

        let readiness = match poll_readiness(&self.connections) {
            Ok(readiness) => readiness,
            Err(Errno::EINTR) => return,
            Err(errno) => {
                warn!(error = %errno, "Readiness poll failed");
                return;
            }
        };

        for (connection, readiness) in self.connections.iter_mut().zip(readiness) {
            connection.advance(readiness, &mut self.pipeline);
        }
    }

    fn evict(&mut self) {
        let now = Instant::now();
        for connection in &mut self.connections {
            if connection.is_open() && connection.idle_for(now) > self.timeout {
                debug!(peer = %connection.peer(), "Connection timed out");
                connection.close();
            }
        }
        self.connections.retain(ClientConnection::is_open);
    }
}

fn poll_readiness(connections: &[ClientConnection]) -> Result<Vec<Readiness>, Errno> {
    let mut fds: Vec<PollFd<'_>> = connections
        .iter()
        .map(|connection| {
            let mut interest = PollFlags::empty();
            if connection.wants_read() {
                interest |= PollFlags::POLLIN;
            }
            if connection.wants_write() {
                interest |= PollFlags::POLLOUT;
            }
            PollFd::new(connection.stream().as_fd(), interest)
        })
        .collect();

    poll(&mut fds, PollTimeout::ZERO)?;

    let failed = PollFlags::POLLHUP | PollFlags::POLLERR;
    Ok(fds
        .iter()
        .map(|fd| {
            let events = fd.revents().unwrap_or(PollFlags::empty());
            // A hung-up socket is surfaced as ready so the next I/O call reports it.
            let broken = events.intersects(failed);
            Readiness {
                readable: broken || events.contains(PollFlags::POLLIN),
                writable: broken || events.contains(PollFlags::POLLOUT),
            }
        })
        .collect())
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr, ServerError> {
    let mut addrs = (host, port)
        .to_socket_addrs()
        .map_err(|source| ServerError::Resolve {
            host: host.to_string(),
            port,
            source,
        })?;
    addrs.next().ok_or_else(|| ServerError::ResolveEmpty {
        host: host.to_string(),
        port,
    })
}

/// Bind with an explicit listen backlog, which `std` does not expose.
fn bind_listener(addr: SocketAddr, backlog: u32) -> Result<TcpListener, ServerError> {
    let queue = i32::try_from(backlog)
        .ok()
        .and_then(|value| Backlog::new(value).ok())
        .ok_or(ServerError::Backlog { backlog })?;
    let failed = |errno: Errno| ServerError::Bind {
        addr,
        source: io::Error::from(errno),
    };

    let family = match addr {
        SocketAddr::V4(_) => AddressFamily::Inet,
        SocketAddr::V6(_) => AddressFamily::Inet6,
    };
    let fd = socket(family, SockType::Stream, SockFlag::SOCK_CLOEXEC, None).map_err(failed)?;
    setsockopt(&fd, sockopt::ReuseAddr, &true).map_err(failed)?;
    match addr {
        SocketAddr::V4(v4) => bind(fd.as_raw_fd(), &SockaddrIn::from(v4)),
        SocketAddr::V6(v6) => bind(fd.as_raw_fd(), &SockaddrIn6::from(v6)),
    }
    .map_err(failed)?;
    listen(&fd, queue).map_err(failed)?;

    Ok(TcpListener::from(fd))
}
