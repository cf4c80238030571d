// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Public stream façade: `listen` / `accept` / `read` / `write` / `close`
//! mapped onto the [`crate::engine`] reactor, the thin adapter layer Section
//! 1 scopes out of the core but that every embedder needs to actually use
//! it.

use std::sync::Arc;

use crate::config::Config;
use crate::engine::reactor::{NetworkThread, Shared, WAKE_TOKEN};
use crate::error::RspResult;
use crate::metrics::MetricsSnapshot;
use crate::transport::{Transport, UdpMulticastTransport};

/// Build and spawn a [`Connection`] over any [`Transport`], sharing the
/// wiring between [`Connection::listen`] (a real multicast socket) and
/// [`Connection::listen_on`] (an injected transport, e.g. the in-memory bus
/// used by the test harness).
fn spawn(config: Config, transport: Box<dyn Transport>) -> RspResult<Connection> {
    let sender = transport.sender();
    let poll = mio::Poll::new()?;
    let waker = mio::Waker::new(poll.registry(), WAKE_TOKEN)?;
    let shared = Shared::new(config, sender, waker);
    let network = NetworkThread::spawn(Arc::clone(&shared), transport, poll)?;
    Ok(Connection {
        shared,
        network: Some(network),
    })
}

/// A joined RSP group member: can `write` to every known peer and `accept`
/// per-sender [`Stream`]s to `read` from.
pub struct Connection {
    shared: Arc<Shared>,
    network: Option<NetworkThread>,
}

impl Connection {
    /// Bind a UDP multicast transport per `config`, start the id-acquisition
    /// handshake, and spawn the network thread. Returns once the socket is
    /// bound and joined; discovery continues in the background, so an
    /// immediate `write` may find zero known peers.
    pub fn listen(config: Config) -> RspResult<Self> {
        let transport = UdpMulticastTransport::bind(
            config.group_addr(),
            config.group_port(),
            config.mtu(),
            config.min_rate_bps(),
            config.max_rate_bps(),
        )?;
        spawn(config, Box::new(transport))
    }

    /// Like [`Connection::listen`], but drives the core over a caller-supplied
    /// [`Transport`] instead of binding a real multicast socket. Lets the
    /// protocol state machine be exercised deterministically against the
    /// in-memory, fault-injecting double in [`crate::transport::mock`]
    /// instead of racing real sockets.
    pub fn listen_on(config: Config, transport: Box<dyn Transport>) -> RspResult<Self> {
        spawn(config, transport)
    }

    /// This peer's acquired id, once discovery has completed.
    #[must_use]
    pub fn self_id(&self) -> Option<u16> {
        self.shared.self_id()
    }

    /// Block until a new peer joins the group.
    #[must_use]
    pub fn accept(&self) -> Option<Stream> {
        self.shared.accept().map(|writer_id| Stream {
            shared: Arc::clone(&self.shared),
            writer_id,
        })
    }

    /// Send one application message, clamped to `config.buffer_size()`.
    /// Blocks until every currently-known peer has ACKed it.
    pub fn write(&self, buf: &[u8]) -> RspResult<usize> {
        self.shared.write(buf)
    }

    /// Snapshot of the ambient counters.
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics().snapshot()
    }

    /// Current send-rate ceiling the rate controller has converged to.
    #[must_use]
    pub fn current_rate_bps(&self) -> u32 {
        self.shared.current_rate_bps()
    }

    /// Graceful shutdown: broadcast `EXIT`, stop the network thread, and
    /// unblock every caller still parked in `read`/`write`/`accept`.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.shared.close();
        if let Some(network) = self.network.take() {
            network.stop();
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A byte stream reassembled from one other sender's `write` calls.
pub struct Stream {
    shared: Arc<Shared>,
    writer_id: u16,
}

impl Stream {
    /// The peer id this stream reassembles data from.
    #[must_use]
    pub fn peer_id(&self) -> u16 {
        self.writer_id
    }

    /// Copy up to `buf.len()` bytes from the current reassembled buffer,
    /// blocking until one is ready.
    pub fn read(&self, buf: &mut [u8]) -> RspResult<usize> {
        self.shared.read(self.writer_id, buf)
    }
}
