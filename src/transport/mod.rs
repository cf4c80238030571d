// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport abstraction for the RSP engine.
//!
//! The engine drives everything through the [`Transport`] trait rather than
//! a concrete socket, so the same reactor and protocol state machine run
//! against a real multicast group in production and against an in-memory,
//! fault-injecting double in tests. This is what lets the loss/reorder/
//! duplication scenarios be deterministic instead of racing real sockets.

pub mod mock;
pub mod udp;

use std::io;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub use mock::MockTransport;
pub use udp::UdpMulticastTransport;

/// One inbound datagram together with where it came from. RSP doesn't use
/// the source address for anything other than diagnostics: membership and
/// loopback detection are driven entirely by peer ids carried in the
/// payload, since every node sends to and receives from the same multicast
/// group.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub data: Vec<u8>,
    pub from: std::net::SocketAddr,
}

/// Everything the engine needs from a datagram transport.
///
/// Implementors are not required to be thread-safe for `send`/`recv`/
/// `register`; the network thread owns its transport exclusively. Sending
/// from the application writer thread instead goes through the cheap,
/// thread-safe handle returned by [`Transport::sender`]
/// — a raw UDP (or in-memory bus) send doesn't need the single-owner
/// discipline that `recv`'s `mio` registration does.
pub trait Transport: Send {
    /// Send one datagram to the group. Must not block.
    fn send(&mut self, buf: &[u8]) -> io::Result<()>;

    /// Non-blocking receive. `Ok(None)` means nothing is available right
    /// now (the moral equivalent of `WouldBlock`), not an error.
    fn recv(&mut self) -> io::Result<Option<Inbound>>;

    /// Register this transport's readable interest with a `mio::Poll`
    /// instance under `token`. Called once, before the reactor's first
    /// poll.
    fn register(&mut self, registry: &mio::Registry, token: mio::Token) -> io::Result<()>;

    /// Maximum datagram payload this transport is prepared to carry
    /// without fragmentation at the IP layer.
    fn mtu(&self) -> usize;

    /// A cloneable, thread-safe handle the application writer thread can
    /// send datagrams through concurrently with the network thread's own
    /// `recv`/`register` use of this transport.
    fn sender(&self) -> std::sync::Arc<dyn DatagramSender>;
}

/// Thread-safe datagram sender, independent of the `recv`-side single-owner
/// discipline [`Transport`] otherwise requires.
pub trait DatagramSender: Send + Sync {
    fn send(&self, buf: &[u8]) -> io::Result<()>;

    /// Block until `n_bytes` worth of this sender's send-rate budget is
    /// available, then consume it. The fragmenter
    /// calls this once per fragment so a lowered [`Self::adapt_send_rate`]
    /// ceiling actually throttles the wire, not just the diagnostic counter.
    fn wait_writable(&self, n_bytes: usize);

    /// Apply a percentage adjustment from the stepped rate table to this
    /// sender's rate ceiling, clamped to the transport's configured bounds.
    /// Returns the resulting rate.
    fn adapt_send_rate(&self, delta_percent: i32) -> u32;

    /// This sender's current rate ceiling, in bits per second.
    fn current_rate_bps(&self) -> u32;
}

/// Token-bucket pacer shared by a transport's send handles, driving
/// [`DatagramSender::wait_writable`]/[`DatagramSender::adapt_send_rate`].
///
/// A classic token bucket: tokens (bytes) refill continuously at
/// `rate_bps`, capped at a one-second burst,
/// and a send that would overdraw the bucket waits out the deficit instead
/// of being rejected outright, since RSP's pacing hook is advisory rather
/// than a hard admission-control gate.
pub struct SendRateLimiter {
    inner: Mutex<LimiterState>,
    min_rate_bps: u32,
    max_rate_bps: u32,
}

struct LimiterState {
    rate_bps: u32,
    tokens: f64,
    capacity: f64,
    last_refill: Instant,
}

impl SendRateLimiter {
    #[must_use]
    pub fn new(initial_rate_bps: u32, min_rate_bps: u32, max_rate_bps: u32) -> Arc<Self> {
        let rate = initial_rate_bps.clamp(min_rate_bps, max_rate_bps);
        Arc::new(Self {
            inner: Mutex::new(LimiterState {
                rate_bps: rate,
                tokens: f64::from(rate),
                capacity: f64::from(rate),
                last_refill: Instant::now(),
            }),
            min_rate_bps,
            max_rate_bps,
        })
    }

    fn refill(state: &mut LimiterState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill);
        if elapsed.is_zero() {
            return;
        }
        let add = elapsed.as_secs_f64() * f64::from(state.rate_bps);
        state.tokens = (state.tokens + add).min(state.capacity);
        state.last_refill = now;
    }

    pub fn wait_writable(&self, n_bytes: usize) {
        let wait = {
            let mut state = self.inner.lock().unwrap();
            Self::refill(&mut state);
            let bytes = n_bytes as f64;
            if state.tokens >= bytes {
                state.tokens -= bytes;
                Duration::ZERO
            } else {
                let deficit = bytes - state.tokens;
                state.tokens = 0.0;
                Duration::from_secs_f64(deficit / f64::from(state.rate_bps.max(1)))
            }
        };
        if !wait.is_zero() {
            std::thread::sleep(wait);
        }
    }

    pub fn adapt_send_rate(&self, delta_percent: i32) -> u32 {
        let mut state = self.inner.lock().unwrap();
        Self::refill(&mut state);
        let change = (i64::from(state.rate_bps) * i64::from(delta_percent)) / 100;
        let new_rate = (i64::from(state.rate_bps) + change)
            .clamp(i64::from(self.min_rate_bps), i64::from(self.max_rate_bps)) as u32;
        state.rate_bps = new_rate;
        state.capacity = f64::from(new_rate);
        new_rate
    }

    #[must_use]
    pub fn current_rate_bps(&self) -> u32 {
        self.inner.lock().unwrap().rate_bps
    }
}
