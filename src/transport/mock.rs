// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Deterministic in-memory [`Transport`] for the protocol test harness.
//!
//! Every [`MockTransport`] handed out by a [`MulticastBus`] behaves like a
//! socket joined to the same multicast group: a send from one is delivered
//! to every subscriber, including the sender (matching real multicast
//! loopback). A [`FaultPlan`] lets a test drop, duplicate, or delay
//! individual datagrams by their position in the bus's global send order,
//! so loss/reorder/duplication scenarios reproduce exactly across runs
//! instead of depending on OS scheduling.

use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};

use super::{DatagramSender, Inbound, SendRateLimiter, Transport};

/// Per-datagram fault injection, keyed by the bus-global send index (0-based,
/// counting every `send()` call across every subscriber).
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    /// Send indices whose datagram is silently dropped.
    pub drop: HashSet<u64>,
    /// Send indices whose datagram is delivered twice.
    pub duplicate: HashSet<u64>,
    /// Send indices delayed until `send_index + delay` more sends have
    /// happened on the bus, to model reordering.
    pub delay: HashMap<u64, u64>,
    /// `DATA` fragment indices to drop the first time they're sent,
    /// regardless of bus-global position. Unlike `drop`, this survives
    /// unpredictable interleaving with discovery chatter (HELLO/COUNTNODE
    /// keep running on their own timers in the background), so a test can
    /// target "lose fragment 3 of whatever sequence is currently being
    /// written" without having to predict the exact global send count.
    /// Consumed on first match so the retransmit succeeds.
    pub drop_data_index_once: HashSet<u16>,
}

impl FaultPlan {
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn dropping(indices: impl IntoIterator<Item = u64>) -> Self {
        Self {
            drop: indices.into_iter().collect(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn dropping_data_indices_once(indices: impl IntoIterator<Item = u16>) -> Self {
        Self {
            drop_data_index_once: indices.into_iter().collect(),
            ..Self::default()
        }
    }
}

struct Pending {
    deliver_at: u64,
    data: Vec<u8>,
    from: SocketAddr,
}

struct BusState {
    next_port: u16,
    counter: u64,
    subscribers: HashMap<SocketAddr, VecDeque<Inbound>>,
    /// Registered once each subscriber's [`MockTransport::register`] runs,
    /// so a delivery can raise a real `mio` readiness event instead of
    /// relying on the reactor's hello-timer poll to eventually drain the
    /// queue — the same contract a real socket's `READABLE` event gives it.
    wakers: HashMap<SocketAddr, Arc<mio::Waker>>,
    pending: Vec<Pending>,
    plan: FaultPlan,
}

/// Shared in-process stand-in for a multicast group.
pub struct MulticastBus {
    inner: Mutex<BusState>,
}

impl MulticastBus {
    #[must_use]
    pub fn new(plan: FaultPlan) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(BusState {
                next_port: 1,
                counter: 0,
                subscribers: HashMap::new(),
                wakers: HashMap::new(),
                pending: Vec::new(),
                plan,
            }),
        })
    }

    /// Create a new subscriber with a unique synthetic address and the
    /// given self-reported MTU, paced by the default rate bounds
    /// (10 kbps–100 Mbps, matching [`crate::config::ConfigBuilder`]'s
    /// defaults).
    #[must_use]
    pub fn subscribe(self: &Arc<Self>, mtu: usize) -> MockTransport {
        self.subscribe_with_rate(mtu, 10_000, 100_000_000)
    }

    /// Like [`Self::subscribe`], with an explicit rate ceiling for tests that
    /// exercise the pacing hook directly.
    #[must_use]
    pub fn subscribe_with_rate(self: &Arc<Self>, mtu: usize, min_rate_bps: u32, max_rate_bps: u32) -> MockTransport {
        let mut state = self.inner.lock().unwrap();
        let port = state.next_port;
        state.next_port += 1;
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), port);
        state.subscribers.insert(addr, VecDeque::new());
        MockTransport {
            bus: Arc::clone(self),
            addr,
            mtu,
            limiter: SendRateLimiter::new(max_rate_bps / 2, min_rate_bps, max_rate_bps),
        }
    }

    fn deliver_now(state: &mut BusState, from: SocketAddr, data: &[u8]) {
        for (addr, queue) in &mut state.subscribers {
            queue.push_back(Inbound {
                data: data.to_vec(),
                from,
            });
            if let Some(waker) = state.wakers.get(addr) {
                let _ = waker.wake();
            }
        }
    }

    fn flush_due(state: &mut BusState) {
        let counter = state.counter;
        let (due, rest): (Vec<Pending>, Vec<Pending>) =
            state.pending.drain(..).partition(|p| p.deliver_at <= counter);
        state.pending = rest;
        for p in due {
            Self::deliver_now(state, p.from, &p.data);
        }
    }

    fn matches_data_drop_once(plan: &mut FaultPlan, data: &[u8]) -> bool {
        if plan.drop_data_index_once.is_empty() {
            return false;
        }
        let Some(crate::wire::Kind::Data) = crate::wire::peek_kind(data) else {
            return false;
        };
        let Some(hdr) = crate::wire::DataHeader::decode(data) else {
            return false;
        };
        plan.drop_data_index_once.remove(&hdr.index())
    }

    fn send(&self, from: SocketAddr, data: &[u8]) {
        let mut state = self.inner.lock().unwrap();
        let idx = state.counter;
        state.counter += 1;

        if state.plan.drop.contains(&idx) || Self::matches_data_drop_once(&mut state.plan, data) {
            Self::flush_due(&mut state);
            return;
        }

        let copies = if state.plan.duplicate.contains(&idx) { 2 } else { 1 };

        if let Some(&delay) = state.plan.delay.get(&idx) {
            for _ in 0..copies {
                state.pending.push(Pending {
                    deliver_at: idx + delay,
                    data: data.to_vec(),
                    from,
                });
            }
        } else {
            for _ in 0..copies {
                Self::deliver_now(&mut state, from, data);
            }
        }

        Self::flush_due(&mut state);
    }

    fn recv(&self, addr: SocketAddr) -> Option<Inbound> {
        let mut state = self.inner.lock().unwrap();
        state.subscribers.get_mut(&addr).and_then(VecDeque::pop_front)
    }
}

/// One endpoint on a [`MulticastBus`].
pub struct MockTransport {
    bus: Arc<MulticastBus>,
    addr: SocketAddr,
    mtu: usize,
    limiter: Arc<SendRateLimiter>,
}

impl Transport for MockTransport {
    fn send(&mut self, buf: &[u8]) -> io::Result<()> {
        self.bus.send(self.addr, buf);
        Ok(())
    }

    fn recv(&mut self) -> io::Result<Option<Inbound>> {
        Ok(self.bus.recv(self.addr))
    }

    fn register(&mut self, registry: &mio::Registry, token: mio::Token) -> io::Result<()> {
        // No real fd backs this transport, but the reactor may now block
        // indefinitely on `poll` once discovery has converged, so a
        // delivery needs a way to raise a readiness event the same way a
        // socket's `READABLE` would. A `mio::Waker` registered under this
        // transport's own token gives the bus exactly that.
        let waker = Arc::new(mio::Waker::new(registry, token)?);
        self.bus.inner.lock().unwrap().wakers.insert(self.addr, waker);
        Ok(())
    }

    fn mtu(&self) -> usize {
        self.mtu
    }

    fn sender(&self) -> Arc<dyn DatagramSender> {
        Arc::new(MockSender {
            bus: Arc::clone(&self.bus),
            addr: self.addr,
            limiter: Arc::clone(&self.limiter),
        })
    }
}

/// Thread-safe sender handle for [`MockTransport`]: the bus is already
/// behind a `Mutex`, so sending concurrently with the owning transport's
/// `recv` is already safe.
struct MockSender {
    bus: Arc<MulticastBus>,
    addr: SocketAddr,
    limiter: Arc<SendRateLimiter>,
}

impl DatagramSender for MockSender {
    fn send(&self, buf: &[u8]) -> io::Result<()> {
        self.bus.send(self.addr, buf);
        Ok(())
    }

    fn wait_writable(&self, n_bytes: usize) {
        self.limiter.wait_writable(n_bytes);
    }

    fn adapt_send_rate(&self, delta_percent: i32) -> u32 {
        self.limiter.adapt_send_rate(delta_percent)
    }

    fn current_rate_bps(&self) -> u32 {
        self.limiter.current_rate_bps()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcasts_to_all_subscribers_including_sender() {
        let bus = MulticastBus::new(FaultPlan::none());
        let mut a = bus.subscribe(1500);
        let mut b = bus.subscribe(1500);

        a.send(b"hello").unwrap();

        assert!(a.recv().unwrap().is_some());
        assert!(b.recv().unwrap().is_some());
    }

    #[test]
    fn dropped_index_never_arrives() {
        let bus = MulticastBus::new(FaultPlan::dropping([0]));
        let mut a = bus.subscribe(1500);
        let mut b = bus.subscribe(1500);

        a.send(b"lost").unwrap();
        assert!(b.recv().unwrap().is_none());
        assert!(a.recv().unwrap().is_none());
    }

    #[test]
    fn duplicate_index_arrives_twice() {
        let mut plan = FaultPlan::none();
        plan.duplicate.insert(0);
        let bus = MulticastBus::new(plan);
        let mut a = bus.subscribe(1500);
        let mut b = bus.subscribe(1500);

        a.send(b"dup").unwrap();
        assert!(b.recv().unwrap().is_some());
        assert!(b.recv().unwrap().is_some());
        assert!(b.recv().unwrap().is_none());
    }

    #[test]
    fn delayed_index_arrives_after_later_sends() {
        let mut plan = FaultPlan::none();
        plan.delay.insert(0, 1);
        let bus = MulticastBus::new(plan);
        let mut a = bus.subscribe(1500);
        let mut b = bus.subscribe(1500);

        a.send(b"first").unwrap();
        assert!(b.recv().unwrap().is_none());
        a.send(b"second").unwrap();

        let m1 = b.recv().unwrap().unwrap();
        let m2 = b.recv().unwrap().unwrap();
        assert_eq!(m1.data, b"second");
        assert_eq!(m2.data, b"first");
    }

    #[test]
    fn drops_data_fragment_by_index_once_then_lets_retransmit_through() {
        let bus = MulticastBus::new(FaultPlan::dropping_data_indices_once([3]));
        let mut a = bus.subscribe(1500);
        let mut b = bus.subscribe(1500);

        let mut first = Vec::new();
        crate::wire::DataHeader::new(1, 1, 3, 4).encode_into(&mut first);
        first.extend_from_slice(b"data");
        a.send(&first).unwrap();
        assert!(b.recv().unwrap().is_none(), "first send of index 3 is dropped");

        a.send(&first).unwrap();
        assert!(b.recv().unwrap().is_some(), "retransmit of index 3 goes through");
    }

    #[test]
    fn drop_data_index_once_ignores_other_kinds() {
        let bus = MulticastBus::new(FaultPlan::dropping_data_indices_once([0]));
        let mut a = bus.subscribe(1500);
        let mut b = bus.subscribe(1500);

        a.send(&crate::wire::NodeMsg { peer_id: 1 }.encode(crate::wire::Kind::Hello))
            .unwrap();
        assert!(b.recv().unwrap().is_some(), "non-DATA kinds are unaffected");
    }
}
