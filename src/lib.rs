//! # ws-bootstrap: server-side WebSocket bootstrap
//!
//! The opening-handshake pipeline of an RFC 6455 server, and nothing
//! after it:
//!
//! - **Port-fallback bind**: acquire a listening socket on the preferred
//!   port, walking upward when the port is taken
//! - **Accept**: one blocking accept per client, with an optional deadline
//! - **Handshake**: read the HTTP upgrade request, derive
//!   `Sec-WebSocket-Accept`, write the `101 Switching Protocols` response
//!
//! Frame codecs, control frames, and multi-client scheduling are separate
//! components that consume the [`UpgradedConnection`] this crate hands
//! off.
//!
//! ## Example
//!
//! ```no_run
//! use ws_bootstrap::{Config, WebSocketServer};
//!
//! let mut server = WebSocketServer::bind(Config::builder().port(8000).build())?;
//! let conn = server.accept()?;
//! let upgraded = server.negotiate(conn)?;
//! println!("client requested {}", upgraded.request().path());
//! # Ok::<(), ws_bootstrap::Error>(())
//! ```
//!
//! Log events go through the [`tracing`] facade; with no subscriber
//! installed they are no-ops.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

pub mod bind;
pub mod error;
pub mod handshake;
pub mod server;

pub use error::{Error, Result};
pub use handshake::{build_response, derive_accept_key, parse_request, HandshakeRequest};
pub use server::{Connection, UpgradedConnection, WebSocketServer};

/// WebSocket GUID for accept-key derivation (RFC 6455 §1.3)
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Default preferred port
pub const DEFAULT_PORT: u16 = 8000;

/// Exclusive upper bound of the port-fallback range
pub const PORT_UPPER_BOUND: u16 = 10000;

/// Maximum accepted handshake request size (8KB is enough for any
/// reasonable upgrade request)
pub const MAX_HANDSHAKE_SIZE: usize = 8192;

/// Default fragment size handed to the downstream framing layer
pub const DEFAULT_FRAGMENT_SIZE: usize = 4096;

/// Server configuration
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use ws_bootstrap::Config;
///
/// let config = Config::builder()
///     .port(9001)
///     .timeout(Some(Duration::from_secs(5)))
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Bind address (default: `0.0.0.0`)
    pub host: IpAddr,
    /// Preferred port; fallback walks upward from here (default: 8000)
    pub port: u16,
    /// Exclusive upper bound of the fallback range (default: 10000)
    pub port_ceiling: u16,
    /// Read/write timeout applied to each accepted connection, and bound
    /// on the accept wait; `None` means the platform default, i.e. block
    /// indefinitely (default: `None`)
    pub timeout: Option<Duration>,
    /// Fragment size for the downstream framing layer; unused by the
    /// handshake core itself (default: 4096)
    pub fragment_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            port_ceiling: PORT_UPPER_BOUND,
            timeout: None,
            fragment_size: DEFAULT_FRAGMENT_SIZE,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }
}

/// Builder for server configuration
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    /// Set the bind address
    pub fn host(mut self, host: IpAddr) -> Self {
        self.config.host = host;
        self
    }

    /// Set the preferred port
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Set the exclusive upper bound of the fallback range
    pub fn port_ceiling(mut self, ceiling: u16) -> Self {
        self.config.port_ceiling = ceiling;
        self
    }

    /// Set the per-connection I/O timeout (also bounds the accept wait)
    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the fragment size handed to the framing layer
    pub fn fragment_size(mut self, size: usize) -> Self {
        self.config.fragment_size = size;
        self
    }

    /// Finalize the configuration
    pub fn build(self) -> Config {
        self.config
    }
}
