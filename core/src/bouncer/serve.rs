/*
 * serve.rs
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

//! Accept loop: plain TCP listener, websocket upgrade, one session per
//! client. A session failure never reaches the accept loop; a request
//! that is not a websocket upgrade gets a 400 and is forgotten.

use std::io;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::bouncer::session::Session;
use crate::config::BouncerConfig;
use crate::protocol::websocket;

/// Bind the configured listen address and serve forever.
pub async fn serve(config: BouncerConfig) -> io::Result<()> {
    let listener = TcpListener::bind(&config.listen).await?;
    eprintln!("[bouncer] listening on {}", listener.local_addr()?);
    serve_on(listener, config).await
}

/// Serve on an already-bound listener. Split out so tests can bind an
/// ephemeral port first.
pub async fn serve_on(listener: TcpListener, config: BouncerConfig) -> io::Result<()> {
    let config = Arc::new(config);
    loop {
        let (stream, peer) = listener.accept().await?;
        let config = config.clone();
        tokio::spawn(async move {
            match websocket::accept(stream).await {
                Ok(conn) => {
                    eprintln!("[session] {} connected", peer);
                    let (reader, writer) = conn.split();
                    let session = Session::new(config, writer);
                    session.run(reader).await;
                    eprintln!("[session] {} closed", peer);
                }
                Err(e) => {
                    eprintln!("[session] {} rejected: {}", peer, e);
                }
            }
        });
    }
}
