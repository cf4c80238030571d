// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The stepped rate controller backs off after a write loses fragments to
//! injected drops, then probes back up once a
//! subsequent write goes through clean.

mod common;

use std::time::Duration;

use rsp::transport::mock::{FaultPlan, MulticastBus};

#[test]
fn rate_backs_off_under_loss_then_recovers() {
    let bus = MulticastBus::new(FaultPlan::dropping_data_indices_once([10, 30]));
    let config = common::test_config().mtu(200).ack_freq(50).build().unwrap();
    let buffer_size = config.buffer_size();

    let a = common::join(&bus, 200, config);
    let b = common::join(&bus, 200, config);

    common::wait_self_id(&a, Duration::from_millis(500));
    common::wait_self_id(&b, Duration::from_millis(500));
    let stream = b.accept().expect("b should discover a");
    std::thread::sleep(Duration::from_millis(80));

    let initial_rate = a.current_rate_bps();
    assert_eq!(initial_rate, config.max_rate_bps() / 2, "starts at half the max ceiling");

    // A full buffer (50 fragments at this mtu/ack_freq) with two fragments
    // dropped once: a real, if small, loss event the controller must react to.
    let payload = vec![0x11u8; buffer_size];
    let n = a.write(&payload).expect("write should recover the dropped fragments and complete");
    assert_eq!(n, buffer_size);

    let rate_after_loss = a.current_rate_bps();
    assert!(
        rate_after_loss < initial_rate,
        "rate should back off after a lossy round: {rate_after_loss} vs {initial_rate}"
    );

    // Drain so the reader doesn't backpressure the recovery write below.
    let mut received = vec![0u8; buffer_size];
    let mut total = 0;
    while total < received.len() {
        total += stream.read(&mut received[total..]).unwrap();
    }

    // The drop set was consumed by the first write, so this one is clean.
    let payload2 = vec![0x22u8; buffer_size];
    let n2 = a.write(&payload2).expect("clean write should complete");
    assert_eq!(n2, buffer_size);

    let rate_after_recovery = a.current_rate_bps();
    assert!(
        rate_after_recovery > rate_after_loss,
        "a clean round should probe the rate back up: {rate_after_recovery} vs {rate_after_loss}"
    );
}
