/*
 * client.rs
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

//! WebSocket client: connect to a ws:// or wss:// URL and perform the
//! opening handshake. A non-101 upgrade status is reported as its own
//! error variant because the reconnect policy branches on it: 5xx means
//! try again later, anything else in between means the URL will never
//! work and the dialer should give up.

use bytes::BytesMut;
use std::fmt;
use std::io;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use url::Url;

use crate::base64;
use crate::net;
use crate::protocol::websocket::connection::{WsConnection, WsStream};
use crate::protocol::websocket::handshake::{
    build_client_request, response_status, take_http_head, verify_accept,
};
use crate::protocol::websocket::Role;

/// Failure to establish a websocket connection.
#[derive(Debug)]
pub enum ConnectError {
    /// Transport-level failure: DNS, TCP, TLS, or a malformed reply.
    Io(io::Error),
    /// The server answered the upgrade with a status other than 101.
    Rejected(u16),
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectError::Io(e) => write!(f, "{}", e),
            ConnectError::Rejected(status) => write!(f, "upgrade rejected with status {}", status),
        }
    }
}

impl std::error::Error for ConnectError {}

impl From<io::Error> for ConnectError {
    fn from(e: io::Error) -> Self {
        ConnectError::Io(e)
    }
}

/// Connect to `url` (ws:// or wss://), perform the opening handshake,
/// and return the connection ready for `split()`.
pub async fn connect(url: &str) -> Result<WsConnection, ConnectError> {
    let url = Url::parse(url)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(ConnectError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            "URL scheme must be ws or wss",
        )));
    }
    let host = url
        .host_str()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "URL has no host"))?
        .to_string();
    let port = url
        .port()
        .unwrap_or(if url.scheme() == "wss" { 443 } else { 80 });
    let path = if url.path().is_empty() { "/" } else { url.path() };

    let tcp = TcpStream::connect((host.as_str(), port)).await?;
    let mut stream = if url.scheme() == "wss" {
        WsStream::Tls(Box::new(net::wrap_tls(&host, tcp).await?))
    } else {
        WsStream::Plain(tcp)
    };

    // 16 random bytes, base64-encoded, is the Sec-WebSocket-Key.
    let mut key_raw = [0u8; 16];
    getrandom::getrandom(&mut key_raw)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
    let key = base64::encode(&key_raw);

    let request = build_client_request(&host, port, path, &key);
    stream.write_all(&request).await?;
    stream.flush().await?;

    let mut buf = BytesMut::with_capacity(4096);
    let head = loop {
        let mut tmp = [0u8; 4096];
        let n = stream.read(&mut tmp).await?;
        if n == 0 {
            return Err(ConnectError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed during handshake",
            )));
        }
        buf.extend_from_slice(&tmp[..n]);
        if let Some(head) = take_http_head(&mut buf)? {
            break head;
        }
    };

    let status = response_status(&head);
    if status != 101 {
        return Err(ConnectError::Rejected(status));
    }
    verify_accept(&head, &key)?;

    // Bytes past the head are the server's first frames.
    Ok(WsConnection::new(stream, Role::Client, buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::websocket::handshake::{build_server_accept, validate_client_request};
    use crate::protocol::websocket::Message;
    use tokio::net::TcpListener;

    /// Minimal scripted upgrade endpoint: validate the request, answer
    /// with the canned response, then hand the socket to `after`.
    async fn scripted_server<F, Fut>(respond: F) -> std::net::SocketAddr
    where
        F: FnOnce(String) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Vec<u8>> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = BytesMut::new();
            let head = loop {
                let mut tmp = [0u8; 4096];
                let n = sock.read(&mut tmp).await.unwrap();
                buf.extend_from_slice(&tmp[..n]);
                if let Some(head) = take_http_head(&mut buf).unwrap() {
                    break head;
                }
            };
            let key = validate_client_request(&head).unwrap_or_default();
            let response = respond(key).await;
            sock.write_all(&response).await.unwrap();
            // Hold the socket open briefly so the client can finish.
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        });
        addr
    }

    #[tokio::test]
    async fn successful_upgrade() {
        let addr = scripted_server(|key| async move { build_server_accept(&key) }).await;
        let conn = connect(&format!("ws://{}", addr)).await.unwrap();
        drop(conn);
    }

    #[tokio::test]
    async fn rejected_status_is_surfaced() {
        let addr = scripted_server(|_key| async move {
            b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n".to_vec()
        })
        .await;
        match connect(&format!("ws://{}", addr)).await {
            Err(ConnectError::Rejected(404)) => {}
            other => panic!("expected Rejected(404), got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn server_error_status_is_surfaced() {
        let addr = scripted_server(|_key| async move {
            b"HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\n\r\n".to_vec()
        })
        .await;
        match connect(&format!("ws://{}", addr)).await {
            Err(ConnectError::Rejected(503)) => {}
            other => panic!("expected Rejected(503), got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn bad_accept_key_is_io_error() {
        let addr = scripted_server(|_key| async move {
            b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: bm90IHRoZSByaWdodCBrZXk=\r\n\r\n".to_vec()
        })
        .await;
        match connect(&format!("ws://{}", addr)).await {
            Err(ConnectError::Io(_)) => {}
            other => panic!("expected Io error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn frames_behind_the_101_are_not_lost() {
        let addr = scripted_server(|key| async move {
            let mut out = build_server_accept(&key);
            let mut frame = BytesMut::new();
            crate::protocol::websocket::frame::encode_frame(
                crate::protocol::websocket::frame::OP_TEXT,
                b"[\"EOSE\",\"s\"]",
                None,
                &mut frame,
            )
            .unwrap();
            out.extend_from_slice(&frame);
            out
        })
        .await;
        let conn = connect(&format!("ws://{}", addr)).await.unwrap();
        let (mut reader, _writer) = conn.split();
        assert_eq!(
            reader.next().await.unwrap(),
            Some(Message::Text("[\"EOSE\",\"s\"]".into()))
        );
    }

    #[tokio::test]
    async fn refused_connection_is_io_error() {
        // Bind then drop to get a port with nothing listening.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        match connect(&format!("ws://{}", addr)).await {
            Err(ConnectError::Io(_)) => {}
            other => panic!("expected Io error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn bad_scheme_rejected() {
        assert!(matches!(
            connect("https://example.com/").await,
            Err(ConnectError::Io(_))
        ));
    }
}
