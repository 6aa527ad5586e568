/*
 * subscriptions.rs
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

//! The subscription table: one component owns the three per-session
//! maps (subscription id to raw REQ frame, the per-subscription set of
//! forwarded event ids, and the per-subscription EOSE tally) behind a
//! single lock. Its operations are the only way to mutate them, so
//! their relative consistency is local to this file. The lock is never
//! held across I/O.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// Verdict on one upstream event for one subscription.
#[derive(Debug, PartialEq, Eq)]
pub enum SeenOutcome {
    /// Forward the frame downstream. When `synthesize_eose` is set the
    /// dedup set just crossed its bound with EOSE still pending: write
    /// `["EOSE", subid]` first, then the event.
    Forward { synthesize_eose: bool },
    /// Drop: unknown subscription, duplicate id, or a subscription
    /// whose dedup set is already gone because CLOSE raced ahead.
    Duplicate,
}

#[derive(Default)]
struct Tables {
    /// Subscription id → the client's original REQ frame, replayed
    /// verbatim to every late-joining relay.
    subs: HashMap<String, String>,
    /// Subscription id → event ids already forwarded downstream.
    seen: HashMap<String, HashSet<String>>,
    /// Subscription id → upstream EOSE count. Key present means no
    /// EOSE has been synthesized for this REQ yet.
    pending_eose: HashMap<String, usize>,
}

/// The per-session subscription registry.
pub struct SubscriptionTable {
    /// Dedup bound: once a subscription has this many distinct events,
    /// further history is treated as live and EOSE is forced.
    seen_limit: usize,
    inner: Mutex<Tables>,
}

impl SubscriptionTable {
    pub fn new(seen_limit: usize) -> Self {
        Self {
            seen_limit,
            inner: Mutex::new(Tables::default()),
        }
    }

    /// Install a subscription, resetting any prior state under the same
    /// id. Equivalent to `remove` followed by fresh entries in all
    /// three maps.
    pub fn install(&self, subid: &str, raw_req: &str) {
        let mut t = self.inner.lock().unwrap();
        t.subs.insert(subid.to_string(), raw_req.to_string());
        t.seen.insert(subid.to_string(), HashSet::new());
        t.pending_eose.insert(subid.to_string(), 0);
    }

    /// Drop a subscription from all three maps. Idempotent.
    pub fn remove(&self, subid: &str) {
        let mut t = self.inner.lock().unwrap();
        t.subs.remove(subid);
        t.seen.remove(subid);
        t.pending_eose.remove(subid);
    }

    /// Record one upstream event and decide its fate. An id is
    /// forwarded at most once per subscription; crossing the dedup
    /// bound while EOSE is still pending forces synthesis (the pending
    /// entry is consumed here).
    pub fn mark_seen(&self, subid: &str, event_id: &str) -> SeenOutcome {
        let mut t = self.inner.lock().unwrap();
        if !t.subs.contains_key(subid) {
            return SeenOutcome::Duplicate;
        }
        let crossed_bound = {
            let ids = match t.seen.get_mut(subid) {
                Some(ids) => ids,
                // CLOSE raced ahead of an in-flight event: drop it.
                None => return SeenOutcome::Duplicate,
            };
            if !ids.insert(event_id.to_string()) {
                return SeenOutcome::Duplicate;
            }
            ids.len() > self.seen_limit
        };
        let synthesize_eose = crossed_bound && t.pending_eose.remove(subid).is_some();
        SeenOutcome::Forward { synthesize_eose }
    }

    /// Record one upstream EOSE. Returns true when the tally reached
    /// `required` and the downstream EOSE should be written now; the
    /// pending entry is consumed. Absent entries (already synthesized,
    /// or the subscription is gone) tally nothing.
    pub fn tally_eose(&self, subid: &str, required: usize) -> bool {
        let mut t = self.inner.lock().unwrap();
        let count = match t.pending_eose.get_mut(subid) {
            Some(count) => count,
            None => return false,
        };
        *count += 1;
        if *count >= required {
            t.pending_eose.remove(subid);
            true
        } else {
            false
        }
    }

    /// The raw REQ frames of every live subscription, for replay on a
    /// fresh upstream connection.
    pub fn replay_frames(&self) -> Vec<String> {
        let t = self.inner.lock().unwrap();
        t.subs.values().cloned().collect()
    }

    /// Whether a subscription is live.
    pub fn contains(&self, subid: &str) -> bool {
        self.inner.lock().unwrap().subs.contains_key(subid)
    }

    #[cfg(test)]
    fn pending(&self, subid: &str) -> Option<usize> {
        self.inner.lock().unwrap().pending_eose.get(subid).copied()
    }

    #[cfg(test)]
    fn seen_count(&self, subid: &str) -> Option<usize> {
        self.inner.lock().unwrap().seen.get(subid).map(|s| s.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_within_subscription() {
        let t = SubscriptionTable::new(500);
        t.install("s", "[\"REQ\",\"s\",{}]");
        assert_eq!(
            t.mark_seen("s", "e1"),
            SeenOutcome::Forward {
                synthesize_eose: false
            }
        );
        assert_eq!(t.mark_seen("s", "e1"), SeenOutcome::Duplicate);
        assert_eq!(
            t.mark_seen("s", "e2"),
            SeenOutcome::Forward {
                synthesize_eose: false
            }
        );
    }

    #[test]
    fn unknown_subscription_drops() {
        let t = SubscriptionTable::new(500);
        assert_eq!(t.mark_seen("nope", "e1"), SeenOutcome::Duplicate);
    }

    #[test]
    fn events_after_close_drop() {
        let t = SubscriptionTable::new(500);
        t.install("s", "req");
        t.remove("s");
        assert_eq!(t.mark_seen("s", "e1"), SeenOutcome::Duplicate);
    }

    #[test]
    fn reinstall_resets_state() {
        // REQ; CLOSE; REQ must equal a single fresh REQ.
        let t = SubscriptionTable::new(500);
        t.install("s", "req1");
        assert!(matches!(t.mark_seen("s", "e1"), SeenOutcome::Forward { .. }));
        assert!(t.tally_eose("s", 2) == false);
        t.remove("s");
        t.install("s", "req2");
        // e1 forwards again: the dedup set was reset.
        assert!(matches!(t.mark_seen("s", "e1"), SeenOutcome::Forward { .. }));
        assert_eq!(t.pending("s"), Some(0));
        assert_eq!(t.replay_frames(), vec!["req2".to_string()]);
    }

    #[test]
    fn double_remove_is_noop() {
        let t = SubscriptionTable::new(500);
        t.install("s", "req");
        t.remove("s");
        t.remove("s");
        assert!(!t.contains("s"));
    }

    #[test]
    fn reinstall_without_close_also_resets() {
        let t = SubscriptionTable::new(500);
        t.install("s", "req1");
        assert!(matches!(t.mark_seen("s", "e1"), SeenOutcome::Forward { .. }));
        t.install("s", "req1");
        assert!(matches!(t.mark_seen("s", "e1"), SeenOutcome::Forward { .. }));
        assert_eq!(t.seen_count("s"), Some(1));
    }

    #[test]
    fn eose_tally_reaches_required() {
        let t = SubscriptionTable::new(500);
        t.install("s", "req");
        assert!(!t.tally_eose("s", 2));
        assert!(t.tally_eose("s", 2));
        // Consumed: further EOSEs tally nothing.
        assert!(!t.tally_eose("s", 2));
        assert_eq!(t.pending("s"), None);
    }

    #[test]
    fn eose_for_unknown_subscription_ignored() {
        let t = SubscriptionTable::new(500);
        assert!(!t.tally_eose("nope", 1));
    }

    #[test]
    fn seen_bound_forces_eose_once() {
        let limit = 5;
        let t = SubscriptionTable::new(limit);
        t.install("s", "req");
        for i in 0..limit {
            assert_eq!(
                t.mark_seen("s", &format!("e{}", i)),
                SeenOutcome::Forward {
                    synthesize_eose: false
                }
            );
        }
        // The (limit+1)th distinct event crosses the bound.
        assert_eq!(
            t.mark_seen("s", "e-overflow"),
            SeenOutcome::Forward {
                synthesize_eose: true
            }
        );
        assert_eq!(t.pending("s"), None);
        // Later events forward without another EOSE.
        assert_eq!(
            t.mark_seen("s", "e-later"),
            SeenOutcome::Forward {
                synthesize_eose: false
            }
        );
    }

    #[test]
    fn seen_bound_after_eose_already_synthesized() {
        let limit = 2;
        let t = SubscriptionTable::new(limit);
        t.install("s", "req");
        assert!(t.tally_eose("s", 1));
        for (i, expect_eose) in [(0, false), (1, false), (2, false), (3, false)] {
            assert_eq!(
                t.mark_seen("s", &format!("e{}", i)),
                SeenOutcome::Forward {
                    synthesize_eose: expect_eose
                }
            );
        }
    }

    #[test]
    fn replay_covers_all_live_subscriptions() {
        let t = SubscriptionTable::new(500);
        t.install("a", "req-a");
        t.install("b", "req-b");
        t.install("c", "req-c");
        t.remove("b");
        let mut frames = t.replay_frames();
        frames.sort();
        assert_eq!(frames, vec!["req-a".to_string(), "req-c".to_string()]);
    }
}
