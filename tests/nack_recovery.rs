// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! A three-peer group where two `DATA` fragments of a single write are
//! dropped once. The NACK round-trip (early NACK or the
//! ACKREQ-driven gap report) must recover them without the write stalling or
//! corrupting the reassembled buffer.

mod common;

use std::time::Duration;

use rsp::transport::mock::{FaultPlan, MulticastBus};

#[test]
fn dropped_fragments_are_recovered_via_nack() {
    let bus = MulticastBus::new(FaultPlan::dropping_data_indices_once([3, 5]));
    let config = common::test_config().mtu(200).ack_freq(20).build().unwrap();
    let payload_size = config.payload_size();

    let a = common::join(&bus, 200, config);
    let b = common::join(&bus, 200, config);
    let c = common::join(&bus, 200, config);

    let a_id = common::wait_self_id(&a, Duration::from_millis(500));
    common::wait_self_id(&b, Duration::from_millis(500));
    common::wait_self_id(&c, Duration::from_millis(500));

    let stream_b = b.accept().expect("b should discover a");
    let stream_c = c.accept().expect("c should discover a");
    std::thread::sleep(Duration::from_millis(120));

    // Ten fragments' worth of distinguishable bytes; fragments 3 and 5 are
    // each dropped exactly once by the bus, forcing a real NACK round trip.
    let payload: Vec<u8> = (0..payload_size * 10).map(|i| (i % 251) as u8).collect();

    let n = a.write(&payload).expect("write should recover both dropped fragments via NACK");
    assert_eq!(n, payload.len());

    for stream in [&stream_b, &stream_c] {
        assert_eq!(stream.peer_id(), a_id);
        let mut received = vec![0u8; payload.len()];
        let mut total = 0;
        while total < received.len() {
            let got = stream.read(&mut received[total..]).expect("read should not error");
            assert!(got > 0);
            total += got;
        }
        assert_eq!(received, payload, "reassembled buffer must match exactly after recovery");
    }
}
