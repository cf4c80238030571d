// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The background network thread and the state it shares with application
//! threads.
//!
//! [`NetworkThread`] owns the [`crate::transport::Transport`] and the `mio`
//! event loop exclusively: an `Arc<AtomicBool>` shutdown flag plus a
//! joined [`JoinHandle`], with a `Drop` impl as the fallback. [`Shared`] is
//! everything a `write`/`read`/`accept`/`close` call on the stream façade
//! needs to reach into — the [`EngineCore`] behind a lock, a repeat queue the
//! network thread fills and the writer drains, and the rate controller.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::config::Config;
use crate::congestion::RateController;
use crate::engine::core::{Action, EngineCore, Phase};
use crate::error::{RspError, RspResult};
use crate::metrics::RspMetrics;
use crate::send::{Fragmenter, RepeatRequest, RetransmitTracker};
use crate::transport::{DatagramSender, Transport};
use crate::wire::DataHeader;

pub(crate) const DATA_TOKEN: mio::Token = mio::Token(0);
pub(crate) const WAKE_TOKEN: mio::Token = mio::Token(1);

/// Protocol state and inter-thread plumbing shared between the network
/// thread and every `write`/`read`/`accept`/`close` caller.
pub struct Shared {
    core: Mutex<EngineCore>,
    cv: Condvar,
    config: Config,
    metrics: Arc<RspMetrics>,
    closed: AtomicBool,
    repeat_tx: crossbeam::channel::Sender<RepeatRequest>,
    repeat_rx: crossbeam::channel::Receiver<RepeatRequest>,
    rate: Mutex<RateController>,
    sender: Arc<dyn DatagramSender>,
    waker: mio::Waker,
    pending_peers: Mutex<VecDeque<u16>>,
    write_lock: Mutex<()>,
}

impl Shared {
    pub fn new(config: Config, sender: Arc<dyn DatagramSender>, waker: mio::Waker) -> Arc<Self> {
        let metrics = Arc::new(RspMetrics::new());
        let (repeat_tx, repeat_rx) = crossbeam::channel::bounded(256);
        Arc::new(Self {
            core: Mutex::new(EngineCore::new(config, Arc::clone(&metrics))),
            cv: Condvar::new(),
            config,
            metrics,
            closed: AtomicBool::new(false),
            repeat_tx,
            repeat_rx,
            rate: Mutex::new(RateController::new(
                config.max_rate_bps() / 2,
                config.min_rate_bps(),
                config.max_rate_bps(),
            )),
            sender,
            waker,
            pending_peers: Mutex::new(VecDeque::new()),
            write_lock: Mutex::new(()),
        })
    }

    #[must_use]
    pub fn metrics(&self) -> &RspMetrics {
        &self.metrics
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Current send-rate ceiling the rate controller has converged to, for
    /// diagnostics. Read from the transport's pacer rather than the
    /// `RateController`'s own tracked value, since that's the number that
    /// actually throttles the wire via [`DatagramSender::wait_writable`].
    #[must_use]
    pub fn current_rate_bps(&self) -> u32 {
        self.sender.current_rate_bps()
    }

    #[must_use]
    pub fn self_id(&self) -> Option<u16> {
        self.core.lock().self_id()
    }

    /// Block until a new peer has joined the group, or the connection closes.
    pub fn accept(&self) -> Option<u16> {
        let mut pending = self.pending_peers.lock();
        loop {
            if let Some(peer_id) = pending.pop_front() {
                return Some(peer_id);
            }
            if self.is_closed() {
                return None;
            }
            self.cv.wait_for(&mut pending, Duration::from_millis(200));
        }
    }

    /// Copy up to `out.len()` reassembled bytes from `writer_id`'s stream,
    /// blocking until a buffer is readable or the connection closes.
    pub fn read(&self, writer_id: u16, out: &mut [u8]) -> RspResult<usize> {
        let mut core = self.core.lock();
        loop {
            if let Some(idx) = core.readable_slot(writer_id) {
                let n = core.consume(writer_id, idx, out);
                self.metrics.add_bytes_read(n as u64);
                return Ok(n);
            }
            if self.is_closed() {
                return Err(RspError::LocalClose);
            }
            self.cv.wait_for(&mut core, Duration::from_millis(200));
        }
    }

    /// Send one application buffer and block until every currently-known
    /// peer has ACKed it, or a fatal error is declared.
    pub fn write(&self, buf: &[u8]) -> RspResult<usize> {
        let _write_guard = self.write_lock.lock();
        let n = buf.len().min(self.config.buffer_size());
        let buf = &buf[..n];
        let fragmenter = Fragmenter::new(self.config.payload_size());
        let n_datagrams = fragmenter.n_datagrams(buf.len());

        let (self_id, sequence_id, no_peers) = {
            let mut core = self.core.lock();
            let sequence_id = core.start_write(n_datagrams);
            (core.self_id(), sequence_id, core.no_peers_to_ack())
        };
        let Some(self_id) = self_id else {
            return Err(RspError::ProtocolViolation("write before id acquired".into()));
        };

        for (index, payload) in fragmenter.fragments(buf) {
            let mut datagram = Vec::with_capacity(crate::config::DATA_HEADER_LEN + payload.len());
            DataHeader::new(self_id, sequence_id, index, payload.len() as u16).encode_into(&mut datagram);
            datagram.extend_from_slice(payload);
            self.sender.wait_writable(datagram.len());
            self.sender.send(&datagram).map_err(RspError::TransportFailure)?;
            self.metrics.add_datagrams_sent(1);
        }
        self.metrics.add_bytes_written(buf.len() as u64);

        if no_peers {
            let (step, _) = self.rate.lock().on_round_result(0, u64::from(n_datagrams.max(1)));
            self.sender.adapt_send_rate(step.delta_percent());
            return Ok(buf.len());
        }

        let ackreq = self.core.lock().build_ackreq();
        if let Some(ackreq) = ackreq {
            self.sender.send(&ackreq).map_err(RspError::TransportFailure)?;
            self.metrics.add_ackreqs_sent(1);
        }
        let _ = self.waker.wake();

        let mut tracker = RetransmitTracker::new();
        loop {
            match self.repeat_rx.recv_timeout(Duration::from_millis(20)) {
                Ok(RepeatRequest::Done) => break,
                Ok(RepeatRequest::Nack(range)) => {
                    tracker.on_progress();
                    tracker.push_nack(range);
                    for range in tracker.drain() {
                        for (index, payload) in fragmenter.fragments(buf) {
                            if index < range.start || index > range.end {
                                continue;
                            }
                            let mut datagram =
                                Vec::with_capacity(crate::config::DATA_HEADER_LEN + payload.len());
                            DataHeader::new(self_id, sequence_id, index, payload.len() as u16)
                                .encode_into(&mut datagram);
                            datagram.extend_from_slice(payload);
                            self.sender.wait_writable(datagram.len());
                            self.sender.send(&datagram).map_err(RspError::TransportFailure)?;
                            self.metrics.add_datagrams_retransmitted(1);
                        }
                    }
                }
                Ok(RepeatRequest::AckReq) => {
                    tracker.on_progress();
                    let ackreq = self.core.lock().build_ackreq();
                    if let Some(ackreq) = ackreq {
                        self.sender.send(&ackreq).map_err(RspError::TransportFailure)?;
                        self.metrics.add_ackreqs_sent(1);
                    }
                }
                Err(crossbeam::channel::RecvTimeoutError::Timeout) => {
                    if self.is_closed() {
                        return Err(RspError::LocalClose);
                    }
                    if self.core.lock().no_peers_to_ack() {
                        break;
                    }
                    self.metrics.add_write_timeouts(1);
                    if tracker.on_timeout(self.config.fatal_timeout_threshold()) {
                        return Err(RspError::Unreachable);
                    }
                }
                Err(crossbeam::channel::RecvTimeoutError::Disconnected) => {
                    return Err(RspError::LocalClose);
                }
            }
        }

        let errors = tracker.errors();
        let (step, _) = self.rate.lock().on_round_result(errors, u64::from(n_datagrams.max(1)));
        self.sender.adapt_send_rate(step.delta_percent());
        Ok(buf.len())
    }

    /// Graceful shutdown: broadcast `EXIT`, mark closed, and wake every
    /// blocked caller.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(self_id) = self.self_id() {
            let exit = crate::wire::NodeMsg { peer_id: self_id }
                .encode(crate::wire::Kind::Exit)
                .to_vec();
            let _ = self.sender.send(&exit);
        }
        let _ = self.waker.wake();
        self.cv.notify_all();
    }

    fn push_action(&self, action: Action, transport: &mut dyn Transport) {
        match action {
            Action::Send(buf) => {
                if let Err(e) = transport.send(&buf) {
                    log::warn!("[RSP] send failed: {e}");
                }
            }
            Action::PushRepeat(req) => {
                if self.repeat_tx.try_send(req).is_err() {
                    log::debug!("[RSP] repeat queue full, dropping request");
                }
            }
            Action::Readable { .. } => {
                self.cv.notify_all();
            }
            Action::NewPeer { peer_id } => {
                self.pending_peers.lock().push_back(peer_id);
                self.cv.notify_all();
            }
            Action::Acquired { .. } => {
                self.cv.notify_all();
            }
        }
    }

    fn dispatch(&self, transport: &mut dyn Transport, actions: Vec<Action>) {
        for action in actions {
            self.push_action(action, transport);
        }
    }
}

/// Background thread driving [`EngineCore`] against a [`Transport`].
pub struct NetworkThread {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl NetworkThread {
    /// Register `transport` on `poll` under the data token and spawn the
    /// reactor thread. `poll`'s registry must already carry the waker
    /// registration under `WAKE_TOKEN` that produced `shared`'s `mio::Waker`.
    pub fn spawn(
        shared: Arc<Shared>,
        mut transport: Box<dyn Transport>,
        mut poll: mio::Poll,
    ) -> io::Result<Self> {
        transport.register(poll.registry(), DATA_TOKEN)?;
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = Arc::clone(&shutdown);

        let handle = thread::spawn(move || {
            run(shared, transport, poll, shutdown_clone);
        });

        Ok(Self {
            shutdown,
            handle: Some(handle),
        })
    }

    pub fn stop(mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for NetworkThread {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Reactor body: block on the readiness set with a timeout that tightens
/// to 10 ms while a send is outstanding, falls back to the hello interval
/// while still acquiring/converging, and drops to an indefinite block once
/// the connection has converged and gone idle. Dispatches `DATA` events
/// through the core and drives `HELLO`/`COUNTNODE`/`ACKREQ` on timeout.
fn run(shared: Arc<Shared>, mut transport: Box<dyn Transport>, mut poll: mio::Poll, shutdown: Arc<AtomicBool>) {
    let mut events = mio::Events::with_capacity(128);
    let hello_interval = Duration::from_millis(shared.config.hello_interval_ms());
    let fast_poll = Duration::from_millis(10);

    loop {
        if shutdown.load(Ordering::Acquire) {
            break;
        }

        let timeout = {
            let core = shared.core.lock();
            if core.is_sending() {
                Some(fast_poll)
            } else if core.phase() == Phase::Member {
                // Discovery has converged and there's nothing outstanding
                // to repeat; block until a real readiness event (inbound
                // datagram, close waker) wakes us instead of polling on a
                // timer forever.
                None
            } else {
                Some(hello_interval)
            }
        };

        match poll.poll(&mut events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                log::warn!("[RSP] poll failed: {e}");
                continue;
            }
        }

        if shutdown.load(Ordering::Acquire) {
            break;
        }

        if events.is_empty() {
            let actions = {
                let mut core = shared.core.lock();
                if core.is_sending() {
                    let _ = shared.repeat_tx.try_send(RepeatRequest::AckReq);
                    Vec::new()
                } else {
                    core.on_hello_timer()
                }
            };
            shared.dispatch(transport.as_mut(), actions);
        }

        // Drain unconditionally rather than only on a `DATA_TOKEN` event:
        // a transport that can't raise a real readiness event for its
        // backing queue (the in-memory test double, in particular) still
        // needs its `recv` polled on every wakeup, and doing so
        // unconditionally is harmless for a socket-backed transport too
        // since `recv` is non-blocking either way.
        loop {
            match transport.recv() {
                Ok(Some(inbound)) => {
                    let actions = shared.core.lock().on_inbound(&inbound.data);
                    shared.dispatch(transport.as_mut(), actions);
                }
                Ok(None) => break,
                Err(e) => {
                    log::warn!("[RSP] recv failed: {e}");
                    break;
                }
            }
        }
    }
}
