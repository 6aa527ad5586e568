/*
 * lib.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Staffetta, a Nostr relay bouncer.
 *
 * Staffetta is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Staffetta is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Staffetta.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Staffetta core: the session engine and protocol plumbing for a Nostr
//! relay bouncer. One downstream client websocket is fanned out to N
//! upstream relays; event streams are merged, deduplicated per
//! subscription, and one EOSE is synthesized from the fan.
//!
//! Protocol layers are our own: WebSocket client and server (RFC 6455)
//! and a push-model JSON parser. Relay frames are scanned for the few
//! fields the bouncer needs and otherwise forwarded verbatim.

pub mod base64;
pub mod bouncer;
pub mod config;
pub mod json;
pub mod net;
pub mod protocol;
