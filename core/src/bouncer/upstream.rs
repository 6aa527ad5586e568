/*
 * upstream.rs
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

//! Relay worker: one task per configured upstream URL, for the life of
//! the session. Dial, register, read, and on failure redial after a
//! fixed delay (no jitter, no backoff growth; the upstream set is
//! small and static). A status between 102 and 499 on the upgrade means
//! the URL is misconfigured and retrying is pointless: the worker logs
//! and exits for good. The session's `destroyed` latch is checked
//! around every suspension point.

use std::sync::Arc;

use crate::bouncer::session::Session;
use crate::protocol::nostr::{scan_relay_frame, RelayFrame};
use crate::protocol::websocket::{connect, ConnectError, Message, WsReader};

/// Why the read loop ended.
enum ReadOutcome {
    /// A downstream write failed: the client is effectively gone, so
    /// reconnecting would be dialing on behalf of nobody.
    Stop,
    /// The upstream went away (EOF, error, close frame, garbage).
    Disconnected,
}

pub(crate) async fn run(session: Arc<Session>, url: String) {
    loop {
        if session.is_destroyed() {
            return;
        }
        match connect(&url).await {
            Ok(conn) => {
                let (mut reader, mut writer) = conn.split();
                if session.is_destroyed() {
                    let _ = writer.shutdown().await;
                    return;
                }
                eprintln!("[relay] {} joined", url);
                let id = match session.register_relay(writer).await {
                    Some(id) => id,
                    None => return,
                };
                let outcome = read_loop(&session, id, &mut reader).await;
                session.deregister_relay(id).await;
                match outcome {
                    ReadOutcome::Stop => {
                        eprintln!("[relay] {}: downstream gone, disconnecting", url);
                        return;
                    }
                    ReadOutcome::Disconnected => {}
                }
                if session.is_destroyed() {
                    return;
                }
                eprintln!(
                    "[relay] {} dropped, reconnecting in {}s",
                    url,
                    session.config().reconnect_delay.as_secs()
                );
            }
            Err(ConnectError::Rejected(status)) if status >= 500 => {
                eprintln!(
                    "[relay] {} answered {}, reconnecting in {}s",
                    url,
                    status,
                    session.config().reconnect_delay.as_secs()
                );
            }
            Err(ConnectError::Rejected(status)) => {
                eprintln!(
                    "[relay] {} answered unexpected status {}, giving up",
                    url, status
                );
                return;
            }
            Err(ConnectError::Io(e)) => {
                eprintln!(
                    "[relay] {} unreachable ({}), reconnecting in {}s",
                    url,
                    e,
                    session.config().reconnect_delay.as_secs()
                );
            }
        }
        tokio::select! {
            _ = session.shutdown_notified() => return,
            _ = tokio::time::sleep(session.config().reconnect_delay) => {}
        }
        if session.is_destroyed() {
            return;
        }
    }
}

async fn read_loop(session: &Arc<Session>, relay_id: u64, reader: &mut WsReader) -> ReadOutcome {
    loop {
        if session.is_destroyed() {
            return ReadOutcome::Disconnected;
        }
        let next = tokio::select! {
            _ = session.shutdown_notified() => return ReadOutcome::Disconnected,
            next = reader.next() => next,
        };
        match next {
            Ok(Some(Message::Text(text))) => match scan_relay_frame(&text) {
                Ok(RelayFrame::Event { subid, event_id }) => {
                    if session
                        .on_upstream_event(&subid, &event_id, &text)
                        .await
                        .is_err()
                    {
                        return ReadOutcome::Stop;
                    }
                }
                Ok(RelayFrame::Eose { subid }) => {
                    if session.on_upstream_eose(&subid, &text).await.is_err() {
                        return ReadOutcome::Stop;
                    }
                }
                // A relay that sends nothing-frames or undecodable
                // output is treated like one that hung up.
                Ok(RelayFrame::Empty) | Err(_) => return ReadOutcome::Disconnected,
                Ok(RelayFrame::Ignored) => {}
            },
            Ok(Some(Message::Ping(payload))) => session.relay_pong(relay_id, &payload).await,
            Ok(Some(Message::Close(_, _))) => return ReadOutcome::Disconnected,
            Ok(Some(_)) => {}
            Ok(None) | Err(_) => return ReadOutcome::Disconnected,
        }
    }
}
