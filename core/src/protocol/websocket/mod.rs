/*
 * mod.rs
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

//! WebSocket (RFC 6455), both roles. The bouncer is a server to its
//! downstream client and a client to every upstream relay, so the frame
//! codec and the handshake exist in both directions. Connections split
//! into a reader and a writer half so that independent tasks can pump
//! each side.

mod client;
mod connection;
mod frame;
mod handshake;
mod server;

pub use client::{connect, ConnectError};
pub use connection::{Message, WsConnection, WsReader, WsStream, WsWriter};
pub use frame::MAX_MESSAGE_SIZE;
pub use server::accept;

/// Which end of the websocket we are. Clients mask outbound frames and
/// require unmasked inbound; servers are the exact opposite (RFC 6455
/// §5.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}
