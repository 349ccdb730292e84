//! Listening-socket acquisition with port fallback
//!
//! Binding starts at the preferred port and walks upward until a bind
//! succeeds or the upper bound is reached. A failed attempt never leaves a
//! descriptor behind: `TcpListener::bind` only yields a socket on success,
//! and the retry loop owns nothing between attempts.

use std::net::{IpAddr, SocketAddr, TcpListener};

use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Bind a passive TCP socket on `host`, starting at `preferred_port` and
/// incrementing while `port < upper_bound`.
///
/// Returns the listener together with the port actually bound, which may
/// differ from the preference. Fails with [`Error::BindExhausted`] when no
/// port in the range is bindable; the error carries the last underlying
/// bind failure.
pub fn bind_with_fallback(
    host: IpAddr,
    preferred_port: u16,
    upper_bound: u16,
) -> Result<(TcpListener, u16)> {
    let mut last_error = String::from("empty port range");

    let mut port = preferred_port;
    while port < upper_bound {
        let addr = SocketAddr::new(host, port);
        debug!(%addr, "attempting to bind");

        match TcpListener::bind(addr) {
            Ok(listener) => {
                // Report the actual port, which differs from `port` when
                // the caller asked for an OS-assigned port (0)
                let bound = listener.local_addr().map(|a| a.port()).unwrap_or(port);
                debug!(%addr, port = bound, "listener bound");
                return Ok((listener, bound));
            }
            Err(err) => {
                warn!(%addr, error = %err, "bind failed, trying next port");
                last_error = err.to_string();
                port += 1;
            }
        }
    }

    Err(Error::BindExhausted { last_error })
}
