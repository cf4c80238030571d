// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Two peers join the same group over a lossless bus. A writes 32 KiB of
//! `0xAA`; B reads all of it back byte-identical,
//! and A's `write` reports the full length once B (and A's own loopback
//! child) have ACKed.

mod common;

use std::time::Duration;

use rsp::transport::mock::{FaultPlan, MulticastBus};

#[test]
fn two_peers_exchange_a_full_buffer_without_loss() {
    let bus = MulticastBus::new(FaultPlan::none());
    let config = common::test_config().mtu(1500).ack_freq(44).build().unwrap();
    let buffer_size = config.buffer_size();

    let a = common::join(&bus, 1500, config);
    let b = common::join(&bus, 1500, config);

    let a_id = common::wait_self_id(&a, Duration::from_millis(500));
    common::wait_self_id(&b, Duration::from_millis(500));

    let payload = vec![0xAAu8; 32 * 1024];
    assert!(payload.len() <= buffer_size, "fixture assumes one buffer holds 32 KiB");

    let n = a.write(&payload).expect("write to a two-member group should complete");
    assert_eq!(n, payload.len());

    let stream = b
        .accept()
        .expect("b should learn about a through COUNTNODE discovery");
    assert_eq!(stream.peer_id(), a_id);

    let mut received = vec![0u8; payload.len()];
    let mut total = 0;
    while total < received.len() {
        let got = stream.read(&mut received[total..]).expect("read should not error mid-stream");
        assert!(got > 0, "read returned zero before the full buffer was consumed");
        total += got;
    }
    assert!(received.iter().all(|&b| b == 0xAA));
}
