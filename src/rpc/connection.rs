//! One accepted client socket.
//!
//! Each connection carries exactly one request: bytes are accumulated until
//! the framer yields a request, the reply is queued, flushed, and the
//! connection closes. Any hard I/O error closes it without a reply, as does
//! a header block larger than [`MAX_HEADER_BYTES`].

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::framer::FrameScanner;
use super::methods::ActionHandler;
use super::pipeline::Pipeline;

const READ_CHUNK: usize = 8 * 1024;

/// Bytes a client may send before the blank line that ends its headers.
pub const MAX_HEADER_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Closed,
}

/// What the last readiness sweep reported for a socket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
}

pub struct ClientConnection {
    stream: TcpStream,
    peer: SocketAddr,
    read_buffer: Vec<u8>,
    scanner: FrameScanner,
    write_buffer: Vec<u8>,
    state: ConnectionState,
    responded: bool,
    last_activity: Instant,
    max_request_bytes: usize,
}

impl ClientConnection {
    /// Wrap an accepted socket, which must already be non-blocking.
    pub fn new(stream: TcpStream, peer: SocketAddr, max_request_bytes: usize) -> Self {
        Self {
            stream,
            peer,
            read_buffer: Vec::new(),
            scanner: FrameScanner::default(),
            write_buffer: Vec::new(),
            state: ConnectionState::Open,
            responded: false,
            last_activity: Instant::now(),
            max_request_bytes,
        }
    }

    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// Input is only wanted until a reply has been queued.
    pub fn wants_read(&self) -> bool {
        self.is_open() && !self.responded
    }

    pub fn wants_write(&self) -> bool {
        self.is_open() && !self.write_buffer.is_empty()
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    pub fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.state = ConnectionState::Closed;
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
        debug!(peer = %self.peer, "Client disconnected");
    }

    /// Advance the connection once, given the socket's readiness.
    pub fn advance<H: ActionHandler>(&mut self, readiness: Readiness, pipeline: &mut Pipeline<H>) {
        if readiness.readable && self.wants_read() {
            self.read(pipeline);
        }
        if readiness.writable && self.wants_write() {
            self.write();
        }
    }

    fn read<H: ActionHandler>(&mut self, pipeline: &mut Pipeline<H>) {
        let mut chunk = [0u8; READ_CHUNK];
        let received = match self.stream.read(&mut chunk) {
            Ok(0) => {
                self.close();
                return;
            }
            Ok(received) => received,
            Err(error) if is_transient(&error) => return,
            Err(error) => {
                debug!(peer = %self.peer, error = %error, "Receive failed");
                self.close();
                return;
            }
        };

        self.last_activity = Instant::now();
        self.read_buffer.extend_from_slice(&chunk[..received]);

        match self.scanner.advance(&self.read_buffer) {
            Some((request, consumed)) => {
                self.read_buffer.drain(..consumed);
                let response = pipeline.respond(&request);
                self.write_buffer.extend_from_slice(&response.to_bytes());
                self.responded = true;
            }
            None if !self.scanner.headers_complete()
                && self.read_buffer.len() > MAX_HEADER_BYTES =>
            {
                warn!(
                    peer = %self.peer,
                    buffered = self.read_buffer.len(),
                    "Request headers exceed size limit, closing connection"
                );
                self.close();
            }
            None if self.read_buffer.len() > self.max_request_bytes => {
                warn!(
                    peer = %self.peer,
                    buffered = self.read_buffer.len(),
                    "Request exceeds size limit, closing connection"
                );
                self.close();
            }
            None => {}
        }
    }

    fn write(&mut self) {
        match self.stream.write(&self.write_buffer) {
            Ok(sent) => {
                self.last_activity = Instant::now();
                self.write_buffer.drain(..sent);
                if self.write_buffer.is_empty() {
                    self.close();
                }
            }
            Err(error) if is_transient(&error) => {}
            Err(error) => {
                debug!(peer = %self.peer, error = %error, "Send failed");
                self.close();
            }
        }
    }
}

fn is_transient(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::error::ActionError;
    use crate::rpc::methods::ActionCall;
    use crate::rpc::origin::OriginPolicy;
    use serde_json::Value;
    use std::net::TcpListener;
    use std::thread;

    struct Echo;

    impl ActionHandler for Echo {
        fn handle(&mut self, call: ActionCall) -> Result<Value, ActionError> {
            Ok(Value::String(call.action))
        }
    }

    fn pipeline() -> Pipeline<Echo> {
        Pipeline::new(
            OriginPolicy::new(vec!["http://localhost".to_string()], Vec::new()),
            Echo,
        )
    }

    fn connected_pair(limit: usize) -> (TcpStream, ClientConnection) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, peer) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        (client, ClientConnection::new(server, peer, limit))
    }

    const BOTH: Readiness = Readiness {
        readable: true,
        writable: true,
    };

    fn drive(connection: &mut ClientConnection, pipeline: &mut Pipeline<Echo>) {
        for _ in 0..200 {
            if !connection.is_open() {
                return;
            }
            connection.advance(BOTH, pipeline);
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn serves_one_request_then_closes() {
        let (mut client, mut connection) = connected_pair(1024);
        let mut pipeline = pipeline();

        let body = r#"{"action":"deckNames"}"#;
        let request = format!("POST / HTTP/1.1\r\nContent-Length: {}\r\n\r\n{body}", body.len());
        client.write_all(request.as_bytes()).unwrap();

        drive(&mut connection, &mut pipeline);
        assert_eq!(connection.state(), ConnectionState::Closed);

        let mut response = String::new();
        client.read_to_string(&mut response).unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.ends_with("\"deckNames\""));
    }

    #[test]
    fn peer_hangup_closes_without_reply() {
        let (client, mut connection) = connected_pair(1024);
        let mut pipeline = pipeline();
        drop(client);

        drive(&mut connection, &mut pipeline);
        assert_eq!(connection.state(), ConnectionState::Closed);
        assert!(!connection.wants_write());
    }

    #[test]
    fn incomplete_request_waits() {
        let (mut client, mut connection) = connected_pair(1024);
        let mut pipeline = pipeline();
        client
            .write_all(b"POST / HTTP/1.1\r\nContent-Length: 50\r\n\r\n{\"act")
            .unwrap();

        for _ in 0..20 {
            connection.advance(BOTH, &mut pipeline);
            thread::sleep(Duration::from_millis(2));
        }
        assert!(connection.is_open());
        assert!(connection.wants_read());
        assert!(!connection.wants_write());
    }

    #[test]
    fn oversized_request_is_dropped() {
        let (mut client, mut connection) = connected_pair(16);
        let mut pipeline = pipeline();
        client
            .write_all(b"POST / HTTP/1.1\r\nContent-Length: 5000\r\n\r\n0123456789")
            .unwrap();

        drive(&mut connection, &mut pipeline);
        assert_eq!(connection.state(), ConnectionState::Closed);
    }

    #[test]
    fn unterminated_headers_are_dropped() {
        let (mut client, mut connection) = connected_pair(usize::MAX);
        let mut pipeline = pipeline();
        let garbage = vec![b'x'; MAX_HEADER_BYTES + READ_CHUNK];

        let writer = thread::spawn(move || {
            let _ = client.write_all(&garbage);
            client
        });
        drive(&mut connection, &mut pipeline);
        let _client = writer.join().unwrap();

        assert_eq!(connection.state(), ConnectionState::Closed);
        assert!(!connection.wants_write());
    }

    #[test]
    fn unready_socket_is_left_alone() {
        let (_client, mut connection) = connected_pair(1024);
        let mut pipeline = pipeline();

        connection.advance(Readiness::default(), &mut pipeline);
        assert!(connection.is_open());
    }
}
