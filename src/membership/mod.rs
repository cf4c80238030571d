// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Peer discovery and group membership.
//!
//! Two pieces of state live here, both plain reducers with no I/O of their
//! own so they can be driven identically from the real network thread or
//! from a test harness feeding synthetic datagrams:
//!
//! - [`IdAcquirer`]: the HELLO/DENY/CONFIRM handshake a joining peer runs to
//!   claim a collision-free 16-bit id.
//! - [`ChildTable`]: the set of other senders discovered on the group via
//!   COUNTNODE, each tracked as a [`Child`] record.

use std::collections::HashMap;

/// Outcome of feeding one event into [`IdAcquirer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionOutcome {
    /// Still acquiring: broadcast `HELLO{candidate}` and keep waiting.
    KeepTrying { candidate: u16 },
    /// Id claimed; move on to discovery.
    Acquired { peer_id: u16 },
    /// Ran out of attempts without a clean claim.
    Exhausted,
}

/// Drives the HELLO/DENY/CONFIRM id-claim handshake.
///
/// A peer proposes a random candidate id and broadcasts `HELLO`. Any peer
/// already holding that id responds `DENY`, forcing a new candidate. After
/// `max_attempts` HELLO broadcasts produce no `DENY`, the id is considered
/// acquired (bounding total retries per join attempt, see the design notes
/// on COUNTNODE convergence below).
#[derive(Debug)]
pub struct IdAcquirer {
    candidate: u16,
    attempts: u32,
    max_attempts: u32,
    acquired: bool,
}

impl IdAcquirer {
    #[must_use]
    pub fn new(initial_candidate: u16, max_attempts: u32) -> Self {
        Self {
            candidate: initial_candidate,
            attempts: 0,
            max_attempts,
            acquired: false,
        }
    }

    #[must_use]
    pub fn candidate(&self) -> u16 {
        self.candidate
    }

    /// A `DENY{peer_id}` arrived on the group. If it targets our current
    /// candidate, pick a new one (supplied by the caller's RNG) and restart
    /// the attempt counter.
    pub fn on_deny(&mut self, denied_peer_id: u16, next_candidate: u16) -> AcquisitionOutcome {
        if denied_peer_id != self.candidate || self.acquired {
            return AcquisitionOutcome::KeepTrying {
                candidate: self.candidate,
            };
        }
        self.candidate = next_candidate;
        self.attempts = 0;
        AcquisitionOutcome::KeepTrying {
            candidate: self.candidate,
        }
    }

    /// A HELLO retransmission interval elapsed with no `DENY` seen.
    pub fn on_hello_timeout(&mut self) -> AcquisitionOutcome {
        if self.acquired {
            return AcquisitionOutcome::Acquired {
                peer_id: self.candidate,
            };
        }
        self.attempts += 1;
        if self.attempts >= self.max_attempts {
            self.acquired = true;
            AcquisitionOutcome::Acquired {
                peer_id: self.candidate,
            }
        } else {
            AcquisitionOutcome::KeepTrying {
                candidate: self.candidate,
            }
        }
    }
}

/// Record of one other sender discovered on the group.
#[derive(Debug, Clone)]
pub struct Child {
    pub peer_id: u16,
    /// Set by the send path once this child has ACKed the buffer currently
    /// being sent; cleared at the start of every new `write`.
    pub ack_received: bool,
    /// Highest sequence id this child has fully ACKed, if any.
    pub last_acked_sequence_id: Option<u16>,
}

impl Child {
    #[must_use]
    fn new(peer_id: u16) -> Self {
        Self {
            peer_id,
            ack_received: false,
            last_acked_sequence_id: None,
        }
    }
}

/// Bound on silent COUNTNODE rounds before convergence is accepted (Section
/// 4.2): after the view stops changing for this many further broadcasts, the
/// peer commits to its current child set rather than retrying indefinitely.
pub const COUNTNODE_CONVERGENCE_ROUNDS: u32 = 10;

/// The set of children (other senders) known to this peer, plus the
/// COUNTNODE convergence counter.
#[derive(Debug, Default)]
pub struct ChildTable {
    children: HashMap<u16, Child>,
    silent_rounds: u32,
    last_seen_count: Option<usize>,
}

impl ChildTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.children.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    #[must_use]
    pub fn contains(&self, peer_id: u16) -> bool {
        self.children.contains_key(&peer_id)
    }

    #[must_use]
    pub fn get(&self, peer_id: u16) -> Option<&Child> {
        self.children.get(&peer_id)
    }

    #[must_use]
    pub fn get_mut(&mut self, peer_id: u16) -> Option<&mut Child> {
        self.children.get_mut(&peer_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Child> {
        self.children.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Child> {
        self.children.values_mut()
    }

    /// Process a `COUNTNODE{client_id, n_clients}` announcement. Adds
    /// `client_id` as a new child if unknown, and returns whether a new
    /// child was added (the caller re-broadcasts its own `COUNTNODE` on a
    /// change, so the rest of the group converges on the new membership).
    pub fn on_countnode(&mut self, client_id: u16, self_id: u16) -> bool {
        if client_id == self_id {
            return false;
        }
        if self.children.contains_key(&client_id) {
            false
        } else {
            self.children.insert(client_id, Child::new(client_id));
            true
        }
    }

    /// Record this peer's own id as a loopback child once id acquisition
    /// finishes. Every send on the multicast group loops back to this peer
    /// as well, so the local engine
    /// must wait for its own ACK the same way it waits for any other
    /// child's — otherwise a single-member group could never complete a
    /// `write()`.
    pub fn insert_self(&mut self, self_id: u16) {
        self.children.entry(self_id).or_insert_with(|| Child::new(self_id));
    }

    /// `EXIT{peer_id}` arrived: the child is leaving the group.
    pub fn remove(&mut self, peer_id: u16) -> Option<Child> {
        self.children.remove(&peer_id)
    }

    /// Clear every child's `ack_received` flag; called at the start of a
    /// new `write`.
    pub fn clear_ack_flags(&mut self) {
        for child in self.children.values_mut() {
            child.ack_received = false;
        }
    }

    #[must_use]
    pub fn all_acked(&self) -> bool {
        self.children.values().all(|c| c.ack_received)
    }

    /// Tick the convergence counter: `true` once `COUNTNODE_CONVERGENCE_ROUNDS`
    /// consecutive rounds have passed with no change in child count.
    pub fn tick_convergence(&mut self) -> bool {
        let count = self.children.len();
        if self.last_seen_count == Some(count) {
            self.silent_rounds += 1;
        } else {
            self.last_seen_count = Some(count);
            self.silent_rounds = 0;
        }
        self.silent_rounds >= COUNTNODE_CONVERGENCE_ROUNDS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquires_id_after_max_attempts_with_no_deny() {
        let mut acquirer = IdAcquirer::new(42, 10);
        let mut outcome = AcquisitionOutcome::KeepTrying { candidate: 42 };
        for _ in 0..10 {
            outcome = acquirer.on_hello_timeout();
        }
        assert_eq!(outcome, AcquisitionOutcome::Acquired { peer_id: 42 });
    }

    #[test]
    fn deny_on_current_candidate_resets_attempts() {
        let mut acquirer = IdAcquirer::new(7, 10);
        for _ in 0..9 {
            acquirer.on_hello_timeout();
        }
        let outcome = acquirer.on_deny(7, 99);
        assert_eq!(outcome, AcquisitionOutcome::KeepTrying { candidate: 99 });
        // attempts reset, so one more timeout shouldn't acquire yet.
        for _ in 0..9 {
            let o = acquirer.on_hello_timeout();
            assert_eq!(o, AcquisitionOutcome::KeepTrying { candidate: 99 });
        }
        assert_eq!(
            acquirer.on_hello_timeout(),
            AcquisitionOutcome::Acquired { peer_id: 99 }
        );
    }

    #[test]
    fn deny_on_stale_candidate_is_ignored() {
        let mut acquirer = IdAcquirer::new(7, 10);
        let outcome = acquirer.on_deny(123, 456);
        assert_eq!(outcome, AcquisitionOutcome::KeepTrying { candidate: 7 });
    }

    #[test]
    fn countnode_adds_new_child_once() {
        let mut table = ChildTable::new();
        assert!(table.on_countnode(5, 1));
        assert!(!table.on_countnode(5, 1));
        assert_eq!(table.len(), 1);
        assert!(!table.on_countnode(1, 1), "must not add self");
    }

    #[test]
    fn exit_removes_child() {
        let mut table = ChildTable::new();
        table.on_countnode(5, 1);
        assert!(table.remove(5).is_some());
        assert!(table.is_empty());
    }

    #[test]
    fn convergence_after_ten_silent_rounds() {
        let mut table = ChildTable::new();
        table.on_countnode(5, 1);
        for i in 0..COUNTNODE_CONVERGENCE_ROUNDS - 1 {
            assert!(!table.tick_convergence(), "round {i}");
        }
        assert!(table.tick_convergence());
    }

    #[test]
    fn clear_ack_flags_resets_all() {
        let mut table = ChildTable::new();
        table.on_countnode(5, 1);
        table.get_mut(5).unwrap().ack_received = true;
        assert!(table.all_acked());
        table.clear_ack_flags();
        assert!(!table.all_acked());
    }
}
