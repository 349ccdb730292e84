//! WebSocket opening handshake (server side)
//!
//! This module implements the RFC 6455 HTTP upgrade exchange over any
//! blocking stream:
//! - Bounded, line-oriented read of the raw upgrade request
//! - Request-line and `Sec-WebSocket-Key` extraction over the raw lines
//! - Accept-key derivation (Base64 of the raw SHA-1 digest)
//! - Byte-exact `101 Switching Protocols` response
//!
//! The raw header lines are kept in insertion order: header lookup is a
//! case-insensitive substring match over the stored lines, not a
//! normalized map.

use std::io::{Read, Write};

use base64::Engine;
use bytes::{BufMut, Bytes, BytesMut};
use sha1::{Digest, Sha1};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::{MAX_HANDSHAKE_SIZE, WS_GUID};

/// Chunk size for the request read loop
const READ_CHUNK_SIZE: usize = 1024;

/// Parsed WebSocket upgrade request
///
/// Holds the request path plus the full ordered sequence of raw header
/// lines as received, so callers can inspect headers this core ignores.
#[derive(Debug, Clone)]
pub struct HandshakeRequest {
    path: String,
    key: String,
    lines: Vec<String>,
}

impl HandshakeRequest {
    /// The request path, with any query string or fragment discarded
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The raw `Sec-WebSocket-Key` value, whitespace-trimmed
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The raw request and header lines, in the order received
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Look up a header by name.
    ///
    /// Returns the trimmed text after the first `:` of the first line that
    /// contains `name` case-insensitively, or `None` when no line matches
    /// (or the matching line carries no `:`).
    pub fn header(&self, name: &str) -> Option<&str> {
        let needle = name.to_ascii_lowercase();
        self.lines
            .iter()
            .find(|line| line.to_ascii_lowercase().contains(&needle))
            .and_then(|line| line.split_once(':'))
            .map(|(_, value)| value.trim())
    }
}

/// Parse the accumulated request text into a [`HandshakeRequest`]
///
/// `raw` is the header block with line terminators already normalized to
/// `\n`. Requires a `GET <uri> HTTP/<version>` request line (method match
/// case-insensitive) and a `Sec-WebSocket-Key:` header line; the raw text
/// is carried in the error when either is missing.
pub fn parse_request(raw: &str) -> Result<HandshakeRequest> {
    let lines: Vec<String> = raw
        .split('\n')
        .map(str::to_owned)
        .filter(|line| !line.is_empty())
        .collect();

    let uri = lines
        .iter()
        .find_map(|line| {
            let mut tokens = line.split_ascii_whitespace();
            match (tokens.next(), tokens.next(), tokens.next(), tokens.next()) {
                (Some(method), Some(uri), Some(version), None)
                    if method.eq_ignore_ascii_case("GET")
                        && version.len() > 5
                        && version
                            .get(..5)
                            .is_some_and(|scheme| scheme.eq_ignore_ascii_case("HTTP/")) =>
                {
                    Some(uri)
                }
                _ => None,
            }
        })
        .ok_or_else(|| Error::MalformedRequest {
            request: raw.to_owned(),
        })?;

    // Query string and fragment are out of scope for this core
    let path = uri
        .split(['?', '#'])
        .next()
        .unwrap_or(uri)
        .to_owned();

    let key = lines
        .iter()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            if name.trim().eq_ignore_ascii_case("sec-websocket-key") {
                Some(value.trim().to_owned())
            } else {
                None
            }
        })
        .ok_or_else(|| Error::MissingKey {
            request: raw.to_owned(),
        })?;

    Ok(HandshakeRequest { path, key, lines })
}

/// Derive the `Sec-WebSocket-Accept` token for a client key
///
/// Computes `Base64(SHA-1(key + GUID))` over the raw digest bytes. Pure;
/// the same key always yields the same token.
#[inline]
pub fn derive_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    let digest = hasher.finalize();
    base64::engine::general_purpose::STANDARD.encode(digest)
}

/// Build the `101 Switching Protocols` upgrade response
pub fn build_response(accept_key: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(160);

    buf.put_slice(b"HTTP/1.1 101 Switching Protocols\r\n");
    buf.put_slice(b"Upgrade: websocket\r\n");
    buf.put_slice(b"Connection: Upgrade\r\n");
    buf.put_slice(b"Sec-WebSocket-Accept: ");
    buf.put_slice(accept_key.as_bytes());
    buf.put_slice(b"\r\n");
    buf.put_slice(b"\r\n");

    buf.freeze()
}

/// Locate the end of the header block (`\r\n\r\n`).
///
/// Returns `(end_of_headers, start_of_body)` byte offsets.
fn find_header_end(buf: &[u8]) -> Option<(usize, usize)> {
    buf.windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|pos| (pos, pos + 4))
}

/// Perform the server-side handshake over a blocking stream.
///
/// Reads the upgrade request (bounded by [`MAX_HANDSHAKE_SIZE`]), parses
/// it, derives the accept token, and writes the 101 response. Returns the
/// parsed request plus any bytes the client sent after the header block;
/// those belong to the framing layer and must not be dropped.
pub fn negotiate<S>(stream: &mut S) -> Result<(HandshakeRequest, Option<Bytes>)>
where
    S: Read + Write,
{
    let mut buf = BytesMut::with_capacity(READ_CHUNK_SIZE);
    let mut chunk = [0u8; READ_CHUNK_SIZE];

    // Read until the blank line ending the header block, or end-of-input.
    // Reads are capped so the accumulated request never grows past
    // MAX_HANDSHAKE_SIZE.
    let (header_end, body_start) = loop {
        if let Some(bounds) = find_header_end(&buf) {
            break bounds;
        }
        if buf.len() >= MAX_HANDSHAKE_SIZE {
            warn!(bytes = buf.len(), "handshake request exceeds size bound");
            return Err(Error::MalformedRequest {
                request: String::from_utf8_lossy(&buf).into_owned(),
            });
        }
        let cap = READ_CHUNK_SIZE.min(MAX_HANDSHAKE_SIZE - buf.len());
        let n = stream.read(&mut chunk[..cap])?;
        if n == 0 {
            break (buf.len(), buf.len());
        }
        buf.put_slice(&chunk[..n]);
    };

    // Normalize CRLF to the buffer's internal newline before parsing
    let raw = String::from_utf8_lossy(&buf[..header_end]).replace("\r\n", "\n");
    debug!(bytes = header_end, "handshake request read");

    let request = parse_request(&raw)?;
    let accept_key = derive_accept_key(request.key());
    let response = build_response(&accept_key);

    stream
        .write_all(&response)
        .and_then(|()| stream.flush())
        .map_err(Error::WriteFailed)?;

    debug!(path = %request.path(), "handshake response sent");

    let leftover = if body_start < buf.len() {
        Some(buf.split_off(body_start).freeze())
    } else {
        None
    };

    Ok((request, leftover))
}
