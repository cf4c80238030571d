// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Ambient observability counters for an RSP connection.
//!
//! Thread-safe atomic counters, updated from both the network thread and the
//! application writer/reader threads without any lock. Never influences
//! protocol behavior; purely for diagnostics.

use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters for one RSP connection.
#[derive(Debug, Default)]
pub struct RspMetrics {
    bytes_written: AtomicU64,
    bytes_read: AtomicU64,
    datagrams_sent: AtomicU64,
    datagrams_retransmitted: AtomicU64,
    acks_sent: AtomicU64,
    acks_received: AtomicU64,
    nacks_sent: AtomicU64,
    nacks_received: AtomicU64,
    ackreqs_sent: AtomicU64,
    write_timeouts: AtomicU64,
    datagrams_dropped: AtomicU64,
    early_nacks_sent: AtomicU64,
}

/// Point-in-time snapshot of [`RspMetrics`], suitable for printing or export.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub bytes_written: u64,
    pub bytes_read: u64,
    pub datagrams_sent: u64,
    pub datagrams_retransmitted: u64,
    pub acks_sent: u64,
    pub acks_received: u64,
    pub nacks_sent: u64,
    pub nacks_received: u64,
    pub ackreqs_sent: u64,
    pub write_timeouts: u64,
    pub datagrams_dropped: u64,
    pub early_nacks_sent: u64,
}

macro_rules! counter_methods {
    ($($field:ident => $inc:ident),+ $(,)?) => {
        $(
            #[inline]
            pub fn $inc(&self, n: u64) {
                self.$field.fetch_add(n, Ordering::Relaxed);
            }
        )+
    };
}

impl RspMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    counter_methods!(
        bytes_written => add_bytes_written,
        bytes_read => add_bytes_read,
        datagrams_sent => add_datagrams_sent,
        datagrams_retransmitted => add_datagrams_retransmitted,
        acks_sent => add_acks_sent,
        acks_received => add_acks_received,
        nacks_sent => add_nacks_sent,
        nacks_received => add_nacks_received,
        ackreqs_sent => add_ackreqs_sent,
        write_timeouts => add_write_timeouts,
        datagrams_dropped => add_datagrams_dropped,
        early_nacks_sent => add_early_nacks_sent,
    );

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            datagrams_sent: self.datagrams_sent.load(Ordering::Relaxed),
            datagrams_retransmitted: self.datagrams_retransmitted.load(Ordering::Relaxed),
            acks_sent: self.acks_sent.load(Ordering::Relaxed),
            acks_received: self.acks_received.load(Ordering::Relaxed),
            nacks_sent: self.nacks_sent.load(Ordering::Relaxed),
            nacks_received: self.nacks_received.load(Ordering::Relaxed),
            ackreqs_sent: self.ackreqs_sent.load(Ordering::Relaxed),
            write_timeouts: self.write_timeouts.load(Ordering::Relaxed),
            datagrams_dropped: self.datagrams_dropped.load(Ordering::Relaxed),
            early_nacks_sent: self.early_nacks_sent.load(Ordering::Relaxed),
        }
    }
}
