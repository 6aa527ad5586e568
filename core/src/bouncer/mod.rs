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

//! The bouncer engine: accept loop, per-client session, subscription
//! table, and the relay workers that keep one connection per configured
//! upstream. A session is the unit of isolation: nothing that happens
//! inside one can touch another, and no error here is fatal to the
//! process.

mod serve;
mod session;
mod subscriptions;
mod upstream;

pub use serve::{serve, serve_on};
pub use session::Session;
pub use subscriptions::{SeenOutcome, SubscriptionTable};
