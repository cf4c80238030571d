// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared harness for the end-to-end protocol scenarios: a
//! [`rsp::transport::mock::MulticastBus`] stands in for the real multicast
//! group so loss/reorder/leave scenarios are exercised against real
//! background network threads without racing actual sockets.

#![allow(dead_code)] // not every scenario test uses every helper

use std::sync::Arc;
use std::time::{Duration, Instant};

use rsp::config::{Config, ConfigBuilder};
use rsp::connection::Connection;
use rsp::transport::mock::MulticastBus;

/// Discovery timing tuned for fast, deterministic tests: a few HELLO
/// attempts at a short interval rather than the production defaults (10
/// attempts at 100 ms), so a join settles in low tens of milliseconds.
pub fn test_config() -> ConfigBuilder {
    init_logging();
    Config::builder()
        .hello_attempts(4)
        .hello_interval_ms(5)
        .fatal_timeout_threshold(400)
}

/// Initialize `env_logger` once per test binary, so `RUST_LOG=rsp=debug
/// cargo test -- --nocapture` surfaces the background network threads'
/// `log::debug!`/`log::warn!` output. Safe to call repeatedly.
fn init_logging() {
    let _ = env_logger::try_init();
}

/// Join `bus` with a fresh [`Connection`] built from `config`.
pub fn join(bus: &Arc<MulticastBus>, mtu: usize, config: Config) -> Connection {
    let transport = bus.subscribe(mtu);
    Connection::listen_on(config, Box::new(transport)).expect("listen_on should bind to the mock transport")
}

/// Poll `pred` until it's true or `timeout` elapses, sleeping briefly
/// between checks. Returns whether `pred` ultimately succeeded.
pub fn wait_until<F: FnMut() -> bool>(timeout: Duration, mut pred: F) -> bool {
    let start = Instant::now();
    loop {
        if pred() {
            return true;
        }
        if start.elapsed() >= timeout {
            return pred();
        }
        std::thread::sleep(Duration::from_millis(2));
    }
}

/// Block until `conn` has completed id acquisition, panicking if it takes
/// longer than `timeout` (a real protocol bug, not scenario flakiness).
pub fn wait_self_id(conn: &Connection, timeout: Duration) -> u16 {
    let start = Instant::now();
    loop {
        if let Some(id) = conn.self_id() {
            return id;
        }
        assert!(start.elapsed() < timeout, "timed out waiting for id acquisition");
        std::thread::sleep(Duration::from_millis(2));
    }
}
