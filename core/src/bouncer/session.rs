/*
 * session.rs
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

//! One session per downstream client. The session owns the downstream
//! writer (a single async lock totally orders every frame on the wire),
//! the subscription table, and the registry of upstream writer halves.
//! The dispatcher task drains the client socket; one relay worker task
//! per configured upstream feeds events back through the handlers here.
//!
//! There is deliberately no queue between upstream reads and downstream
//! writes: forwarding awaits the owner lock, so a slow client blocks
//! upstream reads and TCP backpressure does the rest.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::futures::Notified;
use tokio::sync::{Mutex, Notify};

use crate::bouncer::subscriptions::{SeenOutcome, SubscriptionTable};
use crate::bouncer::upstream;
use crate::config::BouncerConfig;
use crate::protocol::nostr::{
    closed_frame, eose_frame, notice_frame, ok_frame, scan_client_frame, ClientFrame,
};
use crate::protocol::websocket::{Message, WsReader, WsWriter};

pub struct Session {
    config: Arc<BouncerConfig>,
    /// Downstream write half. The lock is held for the duration of one
    /// frame so frames are never interleaved.
    owner: Mutex<WsWriter>,
    table: SubscriptionTable,
    /// Live upstream write halves, keyed by worker id. The lock is held
    /// across a whole broadcast; fan-out is serial by design.
    relays: Mutex<HashMap<u64, WsWriter>>,
    next_relay_id: AtomicU64,
    /// Set by the first REQ or EVENT; triggers upstream dial-out once.
    ready: AtomicBool,
    /// One-shot latch. Never goes back to false.
    destroyed: AtomicBool,
    shutdown: Notify,
}

impl Session {
    pub fn new(config: Arc<BouncerConfig>, owner: WsWriter) -> Arc<Self> {
        let seen_limit = config.seen_limit;
        Arc::new(Self {
            config,
            owner: Mutex::new(owner),
            table: SubscriptionTable::new(seen_limit),
            relays: Mutex::new(HashMap::new()),
            next_relay_id: AtomicU64::new(0),
            ready: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            shutdown: Notify::new(),
        })
    }

    /// Drain the downstream socket until it closes, then destroy the
    /// session. This is the dispatcher of client frames; frames it
    /// cannot make sense of are dropped without comment.
    pub async fn run(self: Arc<Self>, mut reader: WsReader) {
        loop {
            match reader.next().await {
                Ok(Some(Message::Text(text))) => self.dispatch(&text).await,
                Ok(Some(Message::Ping(payload))) => {
                    let mut owner = self.owner.lock().await;
                    let _ = owner.send_pong(&payload).await;
                }
                Ok(Some(Message::Close(_, _))) => break,
                // Binary frames and stray pongs mean nothing to us.
                Ok(Some(_)) => {}
                Ok(None) | Err(_) => break,
            }
        }
        self.destroy().await;
    }

    async fn dispatch(self: &Arc<Self>, text: &str) {
        match scan_client_frame(text) {
            Ok(ClientFrame::Req { subid }) => self.req(&subid, text).await,
            Ok(ClientFrame::Close { subid }) => self.close(&subid, text).await,
            Ok(ClientFrame::Event { event_id }) => self.event(event_id, text).await,
            Ok(ClientFrame::Ignored) | Err(_) => {}
        }
    }

    /// REQ: reset any state under this id, install the subscription,
    /// and pass the client's frame to every live upstream. The first
    /// REQ (or EVENT) of the session starts the upstream dial-out.
    async fn req(self: &Arc<Self>, subid: &str, raw: &str) {
        self.start_upstreams();
        self.table.install(subid, raw);
        self.broadcast(raw).await;
    }

    /// CLOSE: drop the subscription, acknowledge with CLOSED, and pass
    /// the frame upstream. All of it is idempotent; closing an unknown
    /// id still gets its ack and is still broadcast. The reset half of
    /// REQ goes through `SubscriptionTable::install` instead, which
    /// neither acknowledges nor broadcasts a close.
    async fn close(&self, subid: &str, raw: &str) {
        self.table.remove(subid);
        let _ = self.write_owner(&closed_frame(subid)).await;
        self.broadcast(raw).await;
    }

    /// EVENT: acknowledge optimistically and forward to every upstream.
    /// The bouncer does not validate events (that is the relays' job),
    /// but an object with no id cannot be acked, so it earns a NOTICE.
    async fn event(self: &Arc<Self>, event_id: Option<String>, raw: &str) {
        self.start_upstreams();
        match event_id {
            None => {
                let _ = self.write_owner(&notice_frame("invalid event object")).await;
            }
            Some(id) => {
                let _ = self.write_owner(&ok_frame(&id)).await;
                self.broadcast(raw).await;
            }
        }
    }

    /// Spawn one relay worker per configured upstream, exactly once per
    /// session.
    fn start_upstreams(self: &Arc<Self>) {
        if self.ready.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.destroyed.load(Ordering::SeqCst) {
            return;
        }
        for url in &self.config.relays {
            tokio::spawn(upstream::run(self.clone(), url.clone()));
        }
    }

    /// Serialized write to the downstream socket. Refused once the
    /// session is destroyed; an in-flight write racing the destruction
    /// fails harmlessly against the closed socket instead.
    pub(crate) async fn write_owner(&self, text: &str) -> io::Result<()> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "session destroyed",
            ));
        }
        let mut owner = self.owner.lock().await;
        owner.send_text(text).await
    }

    /// Write one frame to every live upstream. Write errors are left to
    /// the owning worker's read loop to notice; a relay that died keeps
    /// its slot until then.
    pub(crate) async fn broadcast(&self, text: &str) {
        let mut relays = self.relays.lock().await;
        for writer in relays.values_mut() {
            let _ = writer.send_text(text).await;
        }
    }

    /// Register a fresh upstream connection: replay the subscription
    /// registry on it, then expose it to broadcasts. Returns None when
    /// the session was destroyed first; the caller closes the handle.
    pub(crate) async fn register_relay(&self, mut writer: WsWriter) -> Option<u64> {
        let mut relays = self.relays.lock().await;
        if self.destroyed.load(Ordering::SeqCst) {
            let _ = writer.shutdown().await;
            return None;
        }
        for frame in self.table.replay_frames() {
            let _ = writer.send_text(&frame).await;
        }
        let id = self.next_relay_id.fetch_add(1, Ordering::SeqCst);
        relays.insert(id, writer);
        Some(id)
    }

    pub(crate) async fn deregister_relay(&self, id: u64) {
        self.relays.lock().await.remove(&id);
    }

    /// Answer an upstream ping on that relay's own writer.
    pub(crate) async fn relay_pong(&self, id: u64, payload: &[u8]) {
        let mut relays = self.relays.lock().await;
        if let Some(writer) = relays.get_mut(&id) {
            let _ = writer.send_pong(payload).await;
        }
    }

    /// One upstream EVENT frame. Dedup verdicts come from the table;
    /// crossing the dedup bound writes the forced EOSE before the event
    /// itself. An Err means the downstream write failed and the calling
    /// worker should stop for good.
    pub(crate) async fn on_upstream_event(
        &self,
        subid: &str,
        event_id: &str,
        raw: &str,
    ) -> io::Result<()> {
        match self.table.mark_seen(subid, event_id) {
            SeenOutcome::Duplicate => Ok(()),
            SeenOutcome::Forward { synthesize_eose } => {
                if synthesize_eose {
                    self.write_owner(&eose_frame(subid)).await?;
                }
                self.write_owner(raw).await
            }
        }
    }

    /// One upstream EOSE frame. The tally compares against the number
    /// of configured upstreams, not currently connected ones: a relay
    /// that never answers holds EOSE back until the dedup bound forces
    /// it.
    pub(crate) async fn on_upstream_eose(&self, subid: &str, raw: &str) -> io::Result<()> {
        if self.table.tally_eose(subid, self.config.relays.len()) {
            self.write_owner(raw).await
        } else {
            Ok(())
        }
    }

    /// Tear the session down: latch `destroyed`, wake every worker, and
    /// shut each registered upstream handle down exactly once. Workers
    /// observe the latch (or their socket dying) and exit; racing
    /// handlers finish against a dead socket.
    pub async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown.notify_waiters();
        let mut relays = self.relays.lock().await;
        for writer in relays.values_mut() {
            let _ = writer.shutdown().await;
        }
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub(crate) fn shutdown_notified(&self) -> Notified<'_> {
        self.shutdown.notified()
    }

    pub(crate) fn config(&self) -> &BouncerConfig {
        &self.config
    }
}
