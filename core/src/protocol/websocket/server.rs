/*
 * server.rs
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

//! Server side of the websocket handshake: read the client's upgrade
//! request off an accepted TCP stream, answer 101, and return the
//! connection. A request that is not a websocket upgrade gets a 400 and
//! the socket is dropped.

use bytes::BytesMut;
use std::io;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::protocol::websocket::connection::{WsConnection, WsStream};
use crate::protocol::websocket::handshake::{
    build_server_accept, build_server_reject, take_http_head, validate_client_request,
};
use crate::protocol::websocket::Role;

/// Perform the server-side upgrade on an accepted stream.
pub async fn accept(mut stream: TcpStream) -> io::Result<WsConnection> {
    let mut buf = BytesMut::with_capacity(4096);
    let head = loop {
        let mut tmp = [0u8; 4096];
        let n = stream.read(&mut tmp).await?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed during handshake",
            ));
        }
        buf.extend_from_slice(&tmp[..n]);
        if let Some(head) = take_http_head(&mut buf)? {
            break head;
        }
    };

    let key = match validate_client_request(&head) {
        Ok(key) => key,
        Err(e) => {
            let _ = stream.write_all(&build_server_reject(&e.to_string())).await;
            return Err(e);
        }
    };

    stream.write_all(&build_server_accept(&key)).await?;
    stream.flush().await?;

    // Bytes past the request head are the client's first frames.
    Ok(WsConnection::new(
        WsStream::Plain(stream),
        Role::Server,
        buf,
    ))
}
