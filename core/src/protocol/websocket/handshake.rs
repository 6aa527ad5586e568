/*
 * handshake.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Staffetta, a Nostr relay bouncer.
 *
 * Staffetta is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This file is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this file.  If not, see <http://www.gnu.org/licenses/>.
 */

//! WebSocket opening handshake (RFC 6455 §4), both directions: build
//! and parse the upgrade request, build and parse the upgrade response,
//! compute and verify Sec-WebSocket-Accept. The HTTP head is parsed in
//! place here; the handshake never needs a body.

use bytes::BytesMut;
use std::io;

use crate::base64;

/// Magic GUID appended to the key for Sec-WebSocket-Accept
/// (RFC 6455 §4.2.2).
const ACCEPT_MAGIC: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Compute Sec-WebSocket-Accept from the base64-encoded key:
/// base64(SHA-1(key || MAGIC)).
pub fn accept_key(key_base64: &str) -> String {
    use sha1::{Digest, Sha1};
    let mut hasher = Sha1::new();
    hasher.update(key_base64.as_bytes());
    hasher.update(ACCEPT_MAGIC);
    base64::encode(&hasher.finalize())
}

/// A parsed HTTP message head: start line plus headers. Shared by both
/// handshake directions; header names are matched case-insensitively.
#[derive(Debug)]
pub struct HttpHead {
    pub start_line: String,
    headers: Vec<(String, String)>,
}

impl HttpHead {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// True if `name` is a comma-separated header containing `token`
    /// (case-insensitive), e.g. `Connection: keep-alive, Upgrade`.
    pub fn header_has_token(&self, name: &str, token: &str) -> bool {
        match self.header(name) {
            Some(v) => v.split(',').any(|t| t.trim().eq_ignore_ascii_case(token)),
            None => false,
        }
    }
}

/// Upper bound on the handshake head; anything larger is hostile.
const MAX_HEAD: usize = 16 * 1024;

/// Try to split one complete HTTP head (terminated by CRLFCRLF) off the
/// front of `buf`. Returns None when more data is needed; bytes after
/// the head are left in the buffer (they are the first websocket
/// frames).
pub fn take_http_head(buf: &mut BytesMut) -> io::Result<Option<HttpHead>> {
    let end = match find_head_end(buf) {
        Some(n) => n,
        None => {
            if buf.len() > MAX_HEAD {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "handshake head too large",
                ));
            }
            return Ok(None);
        }
    };
    let head = buf.split_to(end + 4);
    let text = std::str::from_utf8(&head[..end])
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "handshake head not UTF-8"))?;
    let mut lines = text.split("\r\n");
    let start_line = lines
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "empty handshake head"))?
        .to_string();
    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        match line.find(':') {
            Some(colon) => headers.push((
                line[..colon].trim().to_string(),
                line[colon + 1..].trim().to_string(),
            )),
            // Tolerate malformed header lines: skip them.
            None => continue,
        }
    }
    Ok(Some(HttpHead {
        start_line,
        headers,
    }))
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Build the client-side upgrade request.
pub fn build_client_request(host: &str, port: u16, path: &str, key_base64: &str) -> Vec<u8> {
    let host_header = if port == 80 || port == 443 {
        host.to_string()
    } else {
        format!("{}:{}", host, port)
    };
    let mut req = Vec::new();
    req.extend_from_slice(b"GET ");
    req.extend_from_slice(path.as_bytes());
    req.extend_from_slice(b" HTTP/1.1\r\nHost: ");
    req.extend_from_slice(host_header.as_bytes());
    req.extend_from_slice(b"\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: ");
    req.extend_from_slice(key_base64.as_bytes());
    req.extend_from_slice(b"\r\nSec-WebSocket-Version: 13\r\n\r\n");
    req
}

/// Parse the status code out of a response start line
/// (`HTTP/1.1 101 Switching Protocols`). Zero when unparseable.
pub fn response_status(head: &HttpHead) -> u16 {
    head.start_line
        .split(' ')
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(0)
}

/// Verify the server's Sec-WebSocket-Accept against the key we sent.
pub fn verify_accept(head: &HttpHead, key_base64: &str) -> io::Result<()> {
    let expected = accept_key(key_base64);
    match head.header("Sec-WebSocket-Accept") {
        Some(got) if got == expected => Ok(()),
        Some(_) => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "Sec-WebSocket-Accept mismatch",
        )),
        None => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "missing Sec-WebSocket-Accept",
        )),
    }
}

/// Validate a client's upgrade request and extract its key. Errors name
/// what was missing; the server turns them into a 400.
pub fn validate_client_request(head: &HttpHead) -> io::Result<String> {
    let mut parts = head.start_line.split(' ');
    if parts.next() != Some("GET") {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "upgrade request must be GET",
        ));
    }
    if !head.header_has_token("Connection", "Upgrade") {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "missing Connection: Upgrade",
        ));
    }
    match head.header("Upgrade") {
        Some(v) if v.eq_ignore_ascii_case("websocket") => {}
        _ => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "missing Upgrade: websocket",
            ));
        }
    }
    match head.header("Sec-WebSocket-Version") {
        Some("13") => {}
        _ => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "unsupported Sec-WebSocket-Version",
            ));
        }
    }
    match head.header("Sec-WebSocket-Key") {
        Some(key) if !key.is_empty() => Ok(key.to_string()),
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "missing Sec-WebSocket-Key",
        )),
    }
}

/// Build the server's 101 response for an accepted upgrade.
pub fn build_server_accept(key_base64: &str) -> Vec<u8> {
    let mut resp = Vec::new();
    resp.extend_from_slice(b"HTTP/1.1 101 Switching Protocols\r\n");
    resp.extend_from_slice(b"Upgrade: websocket\r\nConnection: Upgrade\r\n");
    resp.extend_from_slice(b"Sec-WebSocket-Accept: ");
    resp.extend_from_slice(accept_key(key_base64).as_bytes());
    resp.extend_from_slice(b"\r\n\r\n");
    resp
}

/// Build a minimal error response for a request we will not upgrade.
pub fn build_server_reject(reason: &str) -> Vec<u8> {
    format!(
        "HTTP/1.1 400 Bad Request\r\nConnection: close\r\nContent-Type: text/plain\r\nContent-Length: {}\r\n\r\n{}",
        reason.len(),
        reason
    )
    .into_bytes()
}
