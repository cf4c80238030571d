// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! A receiver that stops reading backs up its 4-slot ring. A fifth write
//! to that receiver must block rather than corrupt or
//! silently drop state, and must complete as soon as the reader frees a slot.

mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rsp::transport::mock::{FaultPlan, MulticastBus};

#[test]
fn fifth_write_blocks_until_reader_drains_a_slot_then_completes() {
    let bus = MulticastBus::new(FaultPlan::none());
    let config = common::test_config().build().unwrap();

    let a = Arc::new(common::join(&bus, 1500, config));
    let b = common::join(&bus, 1500, config);

    common::wait_self_id(&a, Duration::from_millis(500));
    common::wait_self_id(&b, Duration::from_millis(500));

    let stream = b.accept().expect("b should discover a");
    // Give a's side of discovery (the other direction of the COUNTNODE
    // exchange) a moment to land too, so the writes below actually wait on
    // a real child instead of short-circuiting through `no_peers_to_ack`.
    thread::sleep(Duration::from_millis(80));

    for i in 0..4u8 {
        let msg = format!("msg{i}");
        let n = a.write(msg.as_bytes()).expect("filling the ring should not block");
        assert_eq!(n, msg.len());
    }

    let (tx, rx) = std::sync::mpsc::channel();
    let a_clone = Arc::clone(&a);
    let writer = thread::spawn(move || {
        let result = a_clone.write(b"msg4");
        tx.send(()).ok();
        result
    });

    // The fifth write must not have completed yet: the ring is still full
    // of un-drained slots and there is nowhere to place its fragment.
    assert!(
        rx.recv_timeout(Duration::from_millis(150)).is_err(),
        "fifth write completed despite a full, undrained ring"
    );

    let mut buf = [0u8; 4];
    let n = stream.read(&mut buf).expect("draining the oldest slot should succeed");
    assert_eq!(n, 4);
    assert_eq!(&buf, b"msg0");

    let result = writer.join().unwrap();
    assert_eq!(
        result.expect("fifth write should complete once a slot frees up"),
        4
    );

    for expected in ["msg1", "msg2", "msg3", "msg4"] {
        let mut buf = [0u8; 4];
        let n = stream.read(&mut buf).expect("remaining buffers should be readable in order");
        assert_eq!(n, 4);
        assert_eq!(&buf, expected.as_bytes());
    }
}
