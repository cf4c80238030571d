// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # RSP - Reliable Stream Protocol over UDP multicast
//!
//! A connection-oriented, ordered, reliable byte-stream abstraction
//! delivered to a *group* of receivers over a single IP multicast group. A
//! sender transmits a payload exactly once on the wire; every joined
//! receiver independently reconstructs the same byte stream, recovering
//! lost packets through negative acknowledgements and confirming delivery
//! through positive acknowledgements so the sender can release buffers and
//! adapt its send rate.
//!
//! ## Quick start
//!
//! ```no_run
//! use rsp::{Config, Connection};
//!
//! # fn main() -> rsp::RspResult<()> {
//! let conn = Connection::listen(Config::default_checked())?;
//! conn.write(b"hello group")?;
//! if let Some(stream) = conn.accept() {
//!     let mut buf = [0u8; 11];
//!     stream.read(&mut buf)?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`config`] - tunables (MTU, ack frequency, HELLO/COUNTNODE timing, rate bounds).
//! - [`wire`] - datagram encode/decode for every RSP message kind.
//! - [`membership`] - the HELLO/DENY/CONFIRM id handshake and the child table.
//! - [`reassembly`] - the per-sender ring of receive slots.
//! - [`send`] - fragmentation, NACK-range merging, and retransmit bookkeeping.
//! - [`congestion`] - the stepped AIMD rate controller.
//! - [`transport`] - the `Transport` abstraction, its UDP multicast
//!   implementation, and the in-memory fault-injecting double used by tests.
//! - [`engine`] - the pure protocol reducer ([`engine::EngineCore`]) and the
//!   background network thread that drives it.
//! - [`connection`] - the public `listen`/`accept`/`read`/`write`/`close` façade.
//! - [`metrics`] - ambient per-connection counters.
//! - [`error`] - the [`RspError`] taxonomy.

pub mod config;
pub mod congestion;
pub mod connection;
pub mod engine;
pub mod error;
pub mod membership;
pub mod metrics;
pub mod reassembly;
pub mod send;
pub mod transport;
pub mod wire;

pub use config::{Config, ConfigBuilder};
pub use connection::{Connection, Stream};
pub use error::{RspError, RspResult};
pub use metrics::{MetricsSnapshot, RspMetrics};
