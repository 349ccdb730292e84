//! WebSocket bootstrap server
//!
//! `WebSocketServer` owns the listening socket for its whole lifetime and
//! hands out one connection handle per accepted client. Accepting and
//! negotiating are blocking calls; callers wanting concurrent clients run
//! accept/negotiate per connection on their own execution contexts.

use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::bind::bind_with_fallback;
use crate::error::{Error, Result};
use crate::handshake::{self, HandshakeRequest};
use crate::Config;

/// Poll interval for deadline-bounded accept
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// One accepted client connection, prior to the handshake
///
/// A handle serves exactly one client session; accept again for the next
/// client rather than reusing it.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
}

impl Connection {
    /// Address of the connected peer
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

/// An upgraded connection, ready for a framing layer
#[derive(Debug)]
pub struct UpgradedConnection {
    stream: TcpStream,
    peer: SocketAddr,
    request: HandshakeRequest,
    leftover: Option<Bytes>,
}

impl UpgradedConnection {
    /// Address of the connected peer
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// The parsed upgrade request (path, raw header lines)
    pub fn request(&self) -> &HandshakeRequest {
        &self.request
    }

    /// Bytes the client sent after the handshake request, if any.
    ///
    /// These belong to the framing layer and must be consumed before
    /// reading from the stream again.
    pub fn leftover(&self) -> Option<&Bytes> {
        self.leftover.as_ref()
    }

    /// Consume the handle, yielding the raw stream, the parsed request,
    /// and any buffered post-handshake bytes
    pub fn into_parts(self) -> (TcpStream, HandshakeRequest, Option<Bytes>) {
        (self.stream, self.request, self.leftover)
    }
}

/// Blocking WebSocket bootstrap server
///
/// # Example
///
/// ```no_run
/// use ws_bootstrap::{Config, WebSocketServer};
///
/// let mut server = WebSocketServer::bind(Config::default())?;
/// loop {
///     let conn = server.accept()?;
///     match server.negotiate(conn) {
///         Ok(upgraded) => {
///             // hand `upgraded` to the framing layer
///         }
///         Err(err) => {
///             // this connection is unusable; the listener is still valid
///             eprintln!("handshake failed: {err}");
///         }
///     }
/// }
/// # Ok::<(), ws_bootstrap::Error>(())
/// ```
#[derive(Debug)]
pub struct WebSocketServer {
    listener: TcpListener,
    port: u16,
    config: Config,
}

impl WebSocketServer {
    /// Bind the listening socket, retrying on adjacent ports.
    ///
    /// Fails with [`Error::BindExhausted`] when no port between
    /// `config.port` and `config.port_ceiling` is bindable; that is fatal,
    /// the server cannot start.
    pub fn bind(config: Config) -> Result<Self> {
        let (listener, port) = bind_with_fallback(config.host, config.port, config.port_ceiling)?;
        info!(host = %config.host, port, "websocket server listening");
        Ok(Self {
            listener,
            port,
            config,
        })
    }

    /// The port actually bound, which may differ from the configured
    /// preference after fallback
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Local address of the listening socket
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// The server configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Block until a client connects.
    ///
    /// When `config.timeout` is set it bounds the wait; expiry fails with
    /// [`Error::AcceptFailed`]. The configured timeout is applied to the
    /// new connection's reads and writes before any further I/O. A failed
    /// accept never invalidates the listener.
    ///
    /// Takes `&mut self` because a deadline-bounded wait toggles the
    /// listener's blocking mode; exclusive access keeps that toggle out
    /// of reach of concurrent callers.
    pub fn accept(&mut self) -> Result<Connection> {
        let (stream, peer) = match self.config.timeout {
            None => self.listener.accept().map_err(Error::AcceptFailed)?,
            Some(limit) => self.accept_with_deadline(limit)?,
        };

        stream
            .set_read_timeout(self.config.timeout)
            .and_then(|()| stream.set_write_timeout(self.config.timeout))
            .map_err(Error::AcceptFailed)?;

        debug!(%peer, "client connection accepted");
        Ok(Connection { stream, peer })
    }

    /// Poll a non-blocking accept against a deadline.
    ///
    /// `std::net` listeners have no native accept timeout, so the wait is
    /// a short poll loop; the listener is restored to blocking mode on
    /// every exit path.
    fn accept_with_deadline(&self, limit: Duration) -> Result<(TcpStream, SocketAddr)> {
        self.listener
            .set_nonblocking(true)
            .map_err(Error::AcceptFailed)?;

        let deadline = Instant::now() + limit;
        let result = loop {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    // Some platforms hand out the accepted socket in
                    // non-blocking mode; the handshake needs blocking I/O
                    break stream
                        .set_nonblocking(false)
                        .map(|()| (stream, peer))
                        .map_err(Error::AcceptFailed);
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        break Err(Error::AcceptFailed(io::Error::new(
                            io::ErrorKind::TimedOut,
                            "timed out waiting for a client connection",
                        )));
                    }
                    thread::sleep(ACCEPT_POLL_INTERVAL);
                }
                Err(err) => break Err(Error::AcceptFailed(err)),
            }
        };

        self.listener
            .set_nonblocking(false)
            .map_err(Error::AcceptFailed)?;
        result
    }

    /// Drive the opening handshake on an accepted connection.
    ///
    /// On success the returned [`UpgradedConnection`] is framing-ready.
    /// On failure the connection is unusable and dropped; the listener and
    /// any other connections are unaffected.
    pub fn negotiate(&self, conn: Connection) -> Result<UpgradedConnection> {
        let Connection { mut stream, peer } = conn;

        match handshake::negotiate(&mut stream) {
            Ok((request, leftover)) => {
                info!(%peer, path = %request.path(), "connection upgraded to websocket");
                Ok(UpgradedConnection {
                    stream,
                    peer,
                    request,
                    leftover,
                })
            }
            Err(err) => {
                warn!(%peer, error = %err, "handshake failed");
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::{IpAddr, Ipv4Addr};

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    const UPGRADE_REQUEST: &[u8] = b"GET /chat HTTP/1.1\r\n\
        Host: localhost\r\n\
        Upgrade: websocket\r\n\
        Connection: Upgrade\r\n\
        Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
        Sec-WebSocket-Version: 13\r\n\
        \r\n";

    /// Route test log output through a real subscriber, once per process.
    /// `RUST_LOG=debug cargo test` shows the bind/accept/handshake events.
    fn init_tracing() {
        use std::sync::Once;

        static INIT: Once = Once::new();
        INIT.call_once(|| {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .with_test_writer()
                .try_init();
        });
    }

    fn local_server() -> WebSocketServer {
        init_tracing();
        // OS-assigned port keeps parallel tests from colliding
        let config = Config::builder().host(LOCALHOST).port(0).build();
        WebSocketServer::bind(config).unwrap()
    }

    fn read_response(stream: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 256];
        while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = stream.read(&mut chunk).unwrap();
            assert!(n > 0, "connection closed before response completed");
            buf.extend_from_slice(&chunk[..n]);
        }
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn test_accept_and_negotiate() {
        let mut server = local_server();
        let port = server.port();

        let client = thread::spawn(move || {
            let mut stream = TcpStream::connect((LOCALHOST, port)).unwrap();
            stream.write_all(UPGRADE_REQUEST).unwrap();
            read_response(&mut stream)
        });

        let conn = server.accept().unwrap();
        let upgraded = server.negotiate(conn).unwrap();
        assert_eq!(upgraded.request().path(), "/chat");
        assert_eq!(upgraded.request().header("host"), Some("localhost"));
        assert!(upgraded.leftover().is_none());

        let response = client.join().unwrap();
        assert!(response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(response.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
    }

    #[test]
    fn test_listener_survives_failed_handshake() {
        let mut server = local_server();
        let port = server.port();

        let bad_client = thread::spawn(move || {
            let mut stream = TcpStream::connect((LOCALHOST, port)).unwrap();
            stream.write_all(b"GET /chat HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();
            // Wait for the server to drop the connection
            let mut sink = Vec::new();
            let _ = stream.read_to_end(&mut sink);
        });

        let conn = server.accept().unwrap();
        assert!(matches!(server.negotiate(conn), Err(Error::MissingKey { .. })));
        bad_client.join().unwrap();

        // The listener is still valid for the next client
        let good_client = thread::spawn(move || {
            let mut stream = TcpStream::connect((LOCALHOST, port)).unwrap();
            stream.write_all(UPGRADE_REQUEST).unwrap();
            read_response(&mut stream)
        });

        let conn = server.accept().unwrap();
        let upgraded = server.negotiate(conn).unwrap();
        assert_eq!(upgraded.request().path(), "/chat");
        assert!(good_client.join().unwrap().contains("101 Switching Protocols"));
    }

    #[test]
    fn test_accept_times_out_without_client() {
        init_tracing();
        let config = Config::builder()
            .host(LOCALHOST)
            .port(0)
            .timeout(Some(Duration::from_millis(60)))
            .build();
        let mut server = WebSocketServer::bind(config).unwrap();

        let started = Instant::now();
        match server.accept() {
            Err(Error::AcceptFailed(err)) => {
                assert_eq!(err.kind(), io::ErrorKind::TimedOut);
            }
            other => panic!("expected AcceptFailed, got {other:?}"),
        }
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[test]
    fn test_bound_port_reflects_fallback() {
        init_tracing();
        let occupant = TcpListener::bind((LOCALHOST, 0)).unwrap();
        let taken = occupant.local_addr().unwrap().port();

        let config = Config::builder()
            .host(LOCALHOST)
            .port(taken)
            .port_ceiling(taken.saturating_add(50))
            .build();
        let server = WebSocketServer::bind(config).unwrap();
        assert!(server.port() > taken);
        assert_eq!(server.local_addr().unwrap().port(), server.port());
    }

    #[test]
    fn test_leftover_bytes_survive_upgrade() {
        let mut server = local_server();
        let port = server.port();

        let client = thread::spawn(move || {
            let mut stream = TcpStream::connect((LOCALHOST, port)).unwrap();
            let mut payload = UPGRADE_REQUEST.to_vec();
            payload.extend_from_slice(b"\x81\x02hi");
            stream.write_all(&payload).unwrap();
            read_response(&mut stream)
        });

        let conn = server.accept().unwrap();
        let upgraded = server.negotiate(conn).unwrap();
        client.join().unwrap();

        // The pipelined frame bytes may arrive with the request or in a
        // later segment; when they arrived together they must be preserved
        if let Some(leftover) = upgraded.leftover() {
            assert_eq!(&leftover[..], b"\x81\x02hi");
        }
    }
}
