// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! A joining peer's first couple of HELLO candidates collide with ids
//! already claimed on the group. An adversary thread plays
//! the role of the existing holders, answering the first two distinct
//! candidates it observes with DENY before going quiet, and the join must
//! still converge on a fresh, undenied id rather than stalling.

mod common;

use std::collections::HashSet;
use std::sync::mpsc;
use std::time::Duration;

use rsp::transport::mock::{FaultPlan, MulticastBus};
use rsp::transport::Transport;
use rsp::wire::{peek_kind, Kind, NodeMsg};

#[test]
fn join_recovers_from_repeated_id_collisions() {
    let bus = MulticastBus::new(FaultPlan::none());

    let mut adversary = bus.subscribe(1500);
    let (tx, rx) = mpsc::channel::<u16>();
    let handle = std::thread::spawn(move || {
        let mut denied = HashSet::new();
        let deadline = std::time::Instant::now() + Duration::from_millis(800);
        while denied.len() < 2 && std::time::Instant::now() < deadline {
            match adversary.recv().unwrap() {
                Some(inbound) if peek_kind(&inbound.data) == Some(Kind::Hello) => {
                    let Some(msg) = NodeMsg::decode(&inbound.data) else { continue };
                    if denied.insert(msg.peer_id) {
                        tx.send(msg.peer_id).unwrap();
                        adversary
                            .send(&NodeMsg { peer_id: msg.peer_id }.encode(Kind::Deny))
                            .unwrap();
                    }
                }
                _ => std::thread::sleep(Duration::from_millis(1)),
            }
        }
    });

    let conn = common::join(&bus, 1500, common::test_config().build().unwrap());
    let self_id = common::wait_self_id(&conn, Duration::from_millis(1500));

    handle.join().unwrap();
    let denied: HashSet<u16> = rx.try_iter().collect();

    assert!(!denied.is_empty(), "adversary should have observed at least one HELLO");
    assert!(
        !denied.contains(&self_id),
        "final id {self_id} must not be one of the denied candidates {denied:?}"
    );
}
