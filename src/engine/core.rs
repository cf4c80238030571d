// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pure protocol reducer: membership, reassembly, and the ACK/NACK/ACKREQ
//! state machine, with no socket or thread of its own.
//!
//! [`EngineCore::on_inbound`] and the periodic `on_*_timer` methods take one
//! event and return a list of [`Action`]s for the caller (the network thread
//! in production, a test harness in `tests/`) to carry out: datagrams to
//! send, repeat-queue entries to post to the writer, and reader-wake
//! notifications. Keeping all of this free of I/O is what lets the
//! loss/reorder/duplication scenarios run deterministically against
//! [`crate::transport::MockTransport`] instead of real sockets.

use std::collections::HashMap;

use crate::config::Config;
use crate::membership::{AcquisitionOutcome, ChildTable, IdAcquirer};
use crate::metrics::RspMetrics;
use crate::reassembly::SenderSlots;
use crate::send::{merge_ranges, RepeatRequest};
use crate::wire::{AckMsg, AckReqMsg, CountNodeMsg, DataHeader, Kind, NackMsg, NackRange, NodeMsg};

/// One outcome of feeding an event into [`EngineCore`].
#[derive(Debug, Clone)]
pub enum Action {
    /// Broadcast this encoded datagram to the multicast group.
    Send(Vec<u8>),
    /// Post a [`RepeatRequest`] to the writer's repeat queue.
    PushRepeat(RepeatRequest),
    /// A receive slot for `writer_id` transitioned to `ack_sent`; wake any
    /// reader blocked on it.
    Readable { writer_id: u16 },
    /// A new peer (`peer_id`) was added to the child table; wake any
    /// `accept()` caller.
    NewPeer { peer_id: u16 },
    /// Local id acquisition finished; the caller may now broadcast CONFIRM
    /// (already included as a `Send` action) and is a full group member.
    Acquired { peer_id: u16 },
}

/// Discovery/membership phase of a connection, driving what `on_*_timer`
/// does on each tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Acquiring,
    Converging,
    Member,
}

/// The full protocol state for one RSP connection: discovery, the per-sender
/// receive rings, and the local send/retransmit/rate-control state.
pub struct EngineCore {
    config: Config,
    metrics: std::sync::Arc<RspMetrics>,
    phase: Phase,
    self_id: Option<u16>,
    acquirer: IdAcquirer,
    known_ids: std::collections::HashSet<u16>,
    children: ChildTable,
    recv: HashMap<u16, SenderSlots>,
    send_seq: u16,
    sending: bool,
    n_datagrams_current: u16,
}

impl EngineCore {
    #[must_use]
    pub fn new(config: Config, metrics: std::sync::Arc<RspMetrics>) -> Self {
        let candidate = rand::random::<u16>();
        Self {
            acquirer: IdAcquirer::new(candidate, config.hello_attempts()),
            config,
            metrics,
            phase: Phase::Acquiring,
            self_id: None,
            known_ids: std::collections::HashSet::new(),
            children: ChildTable::new(),
            recv: HashMap::new(),
            send_seq: 0,
            sending: false,
            n_datagrams_current: 0,
        }
    }

    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    #[must_use]
    pub fn self_id(&self) -> Option<u16> {
        self.self_id
    }

    #[must_use]
    pub fn children(&self) -> &ChildTable {
        &self.children
    }

    #[must_use]
    pub fn recv_slots(&self, writer_id: u16) -> Option<&SenderSlots> {
        self.recv.get(&writer_id)
    }

    /// The slot index ready for the reader to consume from `writer_id`'s
    /// ring, if any (`ack_sent && !is_drained`).
    #[must_use]
    pub fn readable_slot(&self, writer_id: u16) -> Option<usize> {
        self.recv.get(&writer_id)?.readable()
    }

    /// Copy up to `out.len()` unread bytes from `writer_id`'s slot `idx`.
    pub fn consume(&mut self, writer_id: u16, idx: usize, out: &mut [u8]) -> usize {
        match self.recv.get_mut(&writer_id) {
            Some(slots) => slots.slot_mut(idx).consume(out),
            None => 0,
        }
    }

    #[must_use]
    pub fn is_sending(&self) -> bool {
        self.sending
    }

    #[must_use]
    pub fn send_sequence(&self) -> u16 {
        self.send_seq
    }

    /// Current HELLO candidate, for building the next HELLO broadcast.
    #[must_use]
    pub fn candidate(&self) -> u16 {
        self.acquirer.candidate()
    }

    /// HELLO retransmission interval elapsed with no DENY seen. Drives
    /// the id-acquisition handshake until `Phase::Member`.
    pub fn on_hello_timer(&mut self) -> Vec<Action> {
        match self.phase {
            Phase::Acquiring => match self.acquirer.on_hello_timeout() {
                AcquisitionOutcome::KeepTrying { candidate } => {
                    vec![Action::Send(NodeMsg { peer_id: candidate }.encode(Kind::Hello).to_vec())]
                }
                AcquisitionOutcome::Acquired { peer_id } => {
                    self.self_id = Some(peer_id);
                    self.known_ids.insert(peer_id);
                    self.phase = Phase::Converging;
                    self.recv.insert(peer_id, SenderSlots::new(self.config.n_buffers()));
                    self.children.insert_self(peer_id);
                    log::debug!("[RSP] acquired id {peer_id}");
                    vec![
                        Action::Send(NodeMsg { peer_id }.encode(Kind::Confirm).to_vec()),
                        Action::Acquired { peer_id },
                        Action::NewPeer { peer_id },
                    ]
                }
                AcquisitionOutcome::Exhausted => vec![],
            },
            Phase::Converging => {
                let Some(self_id) = self.self_id else { return vec![] };
                let converged = self.children.tick_convergence();
                let msg = CountNodeMsg {
                    client_id: self_id,
                    n_clients: self.children.len() as u32,
                }
                .encode()
                .to_vec();
                if converged {
                    self.phase = Phase::Member;
                    log::debug!("[RSP] {self_id} converged with {} peer(s)", self.children.len());
                }
                vec![Action::Send(msg)]
            }
            // Convergence is already settled; go quiet rather than keep
            // re-announcing COUNTNODE. `on_exit` still broadcasts one on
            // its own when a peer leaves, which is what wakes the rest of
            // the group back into `Converging`.
            Phase::Member => vec![],
        }
    }

    /// Dispatch one inbound datagram.
    pub fn on_inbound(&mut self, buf: &[u8]) -> Vec<Action> {
        let Some(kind) = crate::wire::peek_kind(buf) else {
            return vec![];
        };
        match kind {
            Kind::Hello => self.on_hello(buf),
            Kind::Deny => self.on_deny_wire(buf),
            Kind::Confirm => self.on_confirm(buf),
            Kind::Exit => self.on_exit(buf),
            Kind::CountNode => self.on_countnode(buf),
            Kind::Data => self.on_data(buf),
            Kind::Ack => self.on_ack(buf),
            Kind::Nack => self.on_nack(buf),
            Kind::AckReq => self.on_ackreq(buf),
        }
    }

    fn on_hello(&mut self, buf: &[u8]) -> Vec<Action> {
        let Some(msg) = NodeMsg::decode(buf) else { return vec![] };
        let collides = self.self_id == Some(msg.peer_id)
            || (self.phase == Phase::Acquiring && self.acquirer.candidate() == msg.peer_id)
            || self.known_ids.contains(&msg.peer_id);
        if collides {
            vec![Action::Send(NodeMsg { peer_id: msg.peer_id }.encode(Kind::Deny).to_vec())]
        } else {
            vec![]
        }
    }

    fn on_deny_wire(&mut self, buf: &[u8]) -> Vec<Action> {
        let Some(msg) = NodeMsg::decode(buf) else { return vec![] };
        if self.phase != Phase::Acquiring {
            return vec![];
        }
        let next = rand::random::<u16>();
        match self.acquirer.on_deny(msg.peer_id, next) {
            AcquisitionOutcome::KeepTrying { candidate } => {
                vec![Action::Send(NodeMsg { peer_id: candidate }.encode(Kind::Hello).to_vec())]
            }
            _ => vec![],
        }
    }

    fn on_confirm(&mut self, buf: &[u8]) -> Vec<Action> {
        let Some(msg) = NodeMsg::decode(buf) else { return vec![] };
        self.known_ids.insert(msg.peer_id);
        vec![]
    }

    fn on_exit(&mut self, buf: &[u8]) -> Vec<Action> {
        let Some(msg) = NodeMsg::decode(buf) else { return vec![] };
        self.children.remove(msg.peer_id);
        self.recv.remove(&msg.peer_id);
        self.known_ids.remove(&msg.peer_id);
        log::debug!("[RSP] peer {} left", msg.peer_id);
        let Some(self_id) = self.self_id else { return vec![] };
        let mut actions = vec![Action::Send(
            CountNodeMsg {
                client_id: self_id,
                n_clients: self.children.len() as u32,
            }
            .encode()
            .to_vec(),
        )];
        // A leaving child might have been the only one a send was still
        // waiting on; an empty or fully-acked remainder releases it.
        if self.sending && self.children.all_acked() {
            self.sending = false;
            actions.push(Action::PushRepeat(RepeatRequest::Done));
        }
        actions
    }

    fn on_countnode(&mut self, buf: &[u8]) -> Vec<Action> {
        let Some(msg) = CountNodeMsg::decode(buf) else { return vec![] };
        let Some(self_id) = self.self_id else { return vec![] };
        self.known_ids.insert(msg.client_id);
        let added = self.children.on_countnode(msg.client_id, self_id);
        if !added {
            return vec![];
        }
        log::debug!("[RSP] peer {} joined, {} known", msg.client_id, self.children.len());
        self.recv
            .entry(msg.client_id)
            .or_insert_with(|| SenderSlots::new(self.config.n_buffers()));
        vec![
            Action::NewPeer { peer_id: msg.client_id },
            Action::Send(
                CountNodeMsg {
                    client_id: self_id,
                    n_clients: self.children.len() as u32,
                }
                .encode()
                .to_vec(),
            ),
        ]
    }

    fn on_data(&mut self, buf: &[u8]) -> Vec<Action> {
        let Some(hdr) = DataHeader::decode(buf) else { return vec![] };
        let writer_id = hdr.writer_id();
        let sequence_id = hdr.sequence_id();
        let payload = &buf[crate::wire::DATA_HEADER_LEN..];

        let Some(slots) = self.recv.get_mut(&writer_id) else {
            self.metrics.add_datagrams_dropped(1);
            return vec![];
        };
        if slots.is_stale(sequence_id) {
            self.metrics.add_datagrams_dropped(1);
            return vec![];
        }
        let Some(idx) = slots.find_or_promote(sequence_id, self.config.ack_freq()) else {
            self.metrics.add_datagrams_dropped(1);
            return vec![];
        };

        let index = hdr.index();
        let slot = slots.slot_mut(idx);
        let placed = slot.place(index, payload, self.config.payload_size());
        if !placed {
            return vec![];
        }

        let mut actions = Vec::new();
        if let Some(range) = slot.early_missing_run(index) {
            if let Some(self_id) = self.self_id {
                self.metrics.add_early_nacks_sent(1);
                actions.push(Action::Send(
                    NackMsg {
                        reader_id: self_id,
                        writer_id,
                        sequence_id,
                        ranges: vec![range],
                    }
                    .encode(),
                ));
            }
        }
        actions
    }

    fn on_ack(&mut self, buf: &[u8]) -> Vec<Action> {
        let Some(msg) = AckMsg::decode(buf) else { return vec![] };
        if !self.sending || Some(msg.writer_id) != self.self_id || msg.sequence_id != self.send_seq {
            return vec![];
        }
        self.metrics.add_acks_received(1);
        if let Some(child) = self.children.get_mut(msg.reader_id) {
            child.ack_received = true;
        }
        if self.children.all_acked() {
            self.sending = false;
            vec![Action::PushRepeat(RepeatRequest::Done)]
        } else {
            vec![]
        }
    }

    fn on_nack(&mut self, buf: &[u8]) -> Vec<Action> {
        let Some(msg) = NackMsg::decode(buf) else { return vec![] };
        if !self.sending || Some(msg.writer_id) != self.self_id || msg.sequence_id != self.send_seq {
            return vec![];
        }
        self.metrics.add_nacks_received(1);
        merge_ranges(msg.ranges)
            .into_iter()
            .map(|r| Action::PushRepeat(RepeatRequest::Nack(r)))
            .collect()
    }

    fn on_ackreq(&mut self, buf: &[u8]) -> Vec<Action> {
        let Some(msg) = AckReqMsg::decode(buf) else { return vec![] };
        let Some(self_id) = self.self_id else { return vec![] };
        let Some(slots) = self.recv.get_mut(&msg.writer_id) else {
            return vec![];
        };

        let Some(idx) = slots.find(msg.sequence_id) else {
            self.metrics.add_nacks_sent(1);
            return vec![Action::Send(
                NackMsg {
                    reader_id: self_id,
                    writer_id: msg.writer_id,
                    sequence_id: msg.sequence_id,
                    ranges: vec![NackRange { start: 0, end: msg.last_datagram_id }],
                }
                .encode(),
            )];
        };

        if slots.slot(idx).ack_sent() {
            self.metrics.add_acks_sent(1);
            return vec![Action::Send(
                AckMsg {
                    reader_id: self_id,
                    writer_id: msg.writer_id,
                    sequence_id: msg.sequence_id,
                }
                .encode()
                .to_vec(),
            )];
        }

        let max_ranges = self.config.max_nack_ranges();
        let missing = slots.slot(idx).missing_ranges(msg.last_datagram_id, max_ranges);
        if missing.is_empty() {
            slots.complete_ack(idx);
            self.metrics.add_acks_sent(1);
            vec![
                Action::Readable { writer_id: msg.writer_id },
                Action::Send(
                    AckMsg {
                        reader_id: self_id,
                        writer_id: msg.writer_id,
                        sequence_id: msg.sequence_id,
                    }
                    .encode()
                    .to_vec(),
                ),
            ]
        } else {
            self.metrics.add_nacks_sent(1);
            vec![Action::Send(
                NackMsg {
                    reader_id: self_id,
                    writer_id: msg.writer_id,
                    sequence_id: msg.sequence_id,
                    ranges: missing,
                }
                .encode(),
            )]
        }
    }

    /// Begin a new `write()`: bump the send sequence, clear ACK tracking,
    /// and record how many fragments this write will carry.
    pub fn start_write(&mut self, n_datagrams: u16) -> u16 {
        self.send_seq = self.send_seq.wrapping_add(1);
        self.children.clear_ack_flags();
        self.sending = true;
        self.n_datagrams_current = n_datagrams;
        self.send_seq
    }

    #[must_use]
    pub fn n_datagrams_current(&self) -> u16 {
        self.n_datagrams_current
    }

    /// Build the `ACKREQ` for the write currently in flight.
    #[must_use]
    pub fn build_ackreq(&self) -> Option<Vec<u8>> {
        let self_id = self.self_id?;
        Some(
            AckReqMsg {
                writer_id: self_id,
                last_datagram_id: self.n_datagrams_current.saturating_sub(1),
                sequence_id: self.send_seq,
            }
            .encode()
            .to_vec(),
        )
    }

    /// No known peers left to wait for (e.g. the only other child left the
    /// group): the write can complete immediately.
    #[must_use]
    pub fn no_peers_to_ack(&self) -> bool {
        self.children.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::sync::Arc;

    fn core() -> EngineCore {
        EngineCore::new(Config::default_checked(), Arc::new(RspMetrics::new()))
    }

    fn acquire(core: &mut EngineCore) -> u16 {
        let mut id = None;
        for _ in 0..core.config.hello_attempts() {
            for action in core.on_hello_timer() {
                if let Action::Acquired { peer_id } = action {
                    id = Some(peer_id);
                }
            }
        }
        id.expect("should acquire within hello_attempts")
    }

    #[test]
    fn acquires_id_and_joins_member_phase() {
        let mut core = core();
        let id = acquire(&mut core);
        assert_eq!(core.self_id(), Some(id));
        assert_eq!(core.phase(), Phase::Converging);
    }

    #[test]
    fn hello_collision_with_candidate_triggers_deny() {
        let mut core = core();
        let candidate = core.candidate();
        let hello = NodeMsg { peer_id: candidate }.encode(Kind::Hello).to_vec();
        let actions = core.on_inbound(&hello);
        assert!(actions
            .iter()
            .any(|a| matches!(a, Action::Send(buf) if crate::wire::peek_kind(buf) == Some(Kind::Deny))));
    }

    #[test]
    fn countnode_from_new_peer_adds_child_and_rebroadcasts() {
        let mut core = core();
        acquire(&mut core);
        let msg = CountNodeMsg { client_id: 999, n_clients: 1 }.encode().to_vec();
        let actions = core.on_inbound(&msg);
        assert!(actions.iter().any(|a| matches!(a, Action::NewPeer { peer_id: 999 })));
        assert!(core.children().contains(999));
    }
}
