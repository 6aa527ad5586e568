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

//! Nostr frame layer (NIP-01 wire format). Frames are JSON arrays
//! tagged by their first element. The bouncer scans a frame for the few
//! fields it routes on (tag, subscription id, event id) and forwards
//! the original text verbatim; filters and event bodies are never
//! interpreted or re-serialized.

mod frames;

pub use frames::{
    closed_frame, eose_frame, notice_frame, ok_frame, scan_client_frame, scan_relay_frame,
    ClientFrame, RelayFrame,
};
