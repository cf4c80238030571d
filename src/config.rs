// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RSP tunable configuration — single source of truth for every constant
//! named in the protocol design, with validation at construction time
//! instead of scattering magic numbers across the crate.

use crate::error::RspError;
use std::net::Ipv4Addr;

/// Default multicast group RSP connections join absent an explicit address.
/// Chosen from the administratively-scoped block (RFC 2365).
pub const DEFAULT_GROUP_ADDR: Ipv4Addr = Ipv4Addr::new(239, 255, 7, 1);

/// Default UDP port for the multicast group.
pub const DEFAULT_GROUP_PORT: u16 = 7890;

/// Default UDP MTU used to size fragments when the transport doesn't report one.
pub const DEFAULT_MTU: usize = 1500;

/// Default number of fragments per buffer (yields ~64 KiB buffers at the
/// default MTU).
pub const DEFAULT_ACK_FREQ: usize = 44;

/// Fixed ring depth of receive slots per sender. Not configurable: the
/// protocol's receiver backpressure behavior is defined in terms of
/// exactly 4 slots.
pub const N_BUFFERS: usize = 4;

/// Number of HELLO attempts before a peer declares its id acquired.
pub const DEFAULT_HELLO_ATTEMPTS: u32 = 10;

/// Interval between HELLO / COUNTNODE broadcasts during discovery.
pub const DEFAULT_HELLO_INTERVAL_MS: u64 = 100;

/// Consecutive event-loop timeouts during a send after which the connection
/// is declared unreachable.
pub const DEFAULT_FATAL_TIMEOUT_THRESHOLD: u32 = 1000;

/// Env var override for multicast interface auto-discovery (testing/debugging).
pub const ENV_MULTICAST_IF: &str = "RSP_MULTICAST_IF";

/// Size (in bytes) of the fixed `DATA` datagram header.
pub const DATA_HEADER_LEN: usize = crate::wire::DATA_HEADER_LEN;

/// Runtime-tunable configuration for an RSP connection.
///
/// Constructed via [`Config::builder`]; invalid combinations are rejected by
/// [`ConfigBuilder::build`] rather than discovered later as a panic.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    group_addr: Ipv4Addr,
    group_port: u16,
    mtu: usize,
    ack_freq: usize,
    hello_attempts: u32,
    hello_interval_ms: u64,
    fatal_timeout_threshold: u32,
    min_rate_bps: u32,
    max_rate_bps: u32,
}

impl Config {
    /// Start building a config from defaults.
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Default configuration (panics never: defaults are known-valid).
    #[must_use]
    pub fn default_checked() -> Self {
        Self::builder().build().expect("default config is valid")
    }

    #[must_use]
    pub fn group_addr(&self) -> Ipv4Addr {
        self.group_addr
    }

    #[must_use]
    pub fn group_port(&self) -> u16 {
        self.group_port
    }

    #[must_use]
    pub fn mtu(&self) -> usize {
        self.mtu
    }

    #[must_use]
    pub fn ack_freq(&self) -> usize {
        self.ack_freq
    }

    /// Maximum payload carried by one fragment datagram.
    #[must_use]
    pub fn payload_size(&self) -> usize {
        self.mtu - DATA_HEADER_LEN
    }

    /// Maximum size of one application write (one "buffer").
    #[must_use]
    pub fn buffer_size(&self) -> usize {
        self.payload_size() * self.ack_freq
    }

    #[must_use]
    pub fn n_buffers(&self) -> usize {
        N_BUFFERS
    }

    #[must_use]
    pub fn hello_attempts(&self) -> u32 {
        self.hello_attempts
    }

    #[must_use]
    pub fn hello_interval_ms(&self) -> u64 {
        self.hello_interval_ms
    }

    #[must_use]
    pub fn fatal_timeout_threshold(&self) -> u32 {
        self.fatal_timeout_threshold
    }

    #[must_use]
    pub fn min_rate_bps(&self) -> u32 {
        self.min_rate_bps
    }

    #[must_use]
    pub fn max_rate_bps(&self) -> u32 {
        self.max_rate_bps
    }

    /// Maximum number of NACK ranges that fit in one NACK datagram at this MTU.
    #[must_use]
    pub fn max_nack_ranges(&self) -> usize {
        crate::wire::max_nack_ranges(self.mtu)
    }
}

/// Builder for [`Config`].
#[derive(Debug, Clone, Copy)]
pub struct ConfigBuilder {
    group_addr: Ipv4Addr,
    group_port: u16,
    mtu: usize,
    ack_freq: usize,
    hello_attempts: u32,
    hello_interval_ms: u64,
    fatal_timeout_threshold: u32,
    min_rate_bps: u32,
    max_rate_bps: u32,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self {
            group_addr: DEFAULT_GROUP_ADDR,
            group_port: DEFAULT_GROUP_PORT,
            mtu: DEFAULT_MTU,
            ack_freq: DEFAULT_ACK_FREQ,
            hello_attempts: DEFAULT_HELLO_ATTEMPTS,
            hello_interval_ms: DEFAULT_HELLO_INTERVAL_MS,
            fatal_timeout_threshold: DEFAULT_FATAL_TIMEOUT_THRESHOLD,
            min_rate_bps: 10_000,
            max_rate_bps: 100_000_000,
        }
    }
}

impl ConfigBuilder {
    #[must_use]
    pub fn group(mut self, addr: Ipv4Addr, port: u16) -> Self {
        self.group_addr = addr;
        self.group_port = port;
        self
    }

    #[must_use]
    pub fn mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    #[must_use]
    pub fn ack_freq(mut self, ack_freq: usize) -> Self {
        self.ack_freq = ack_freq;
        self
    }

    #[must_use]
    pub fn hello_attempts(mut self, n: u32) -> Self {
        self.hello_attempts = n;
        self
    }

    #[must_use]
    pub fn hello_interval_ms(mut self, ms: u64) -> Self {
        self.hello_interval_ms = ms;
        self
    }

    #[must_use]
    pub fn fatal_timeout_threshold(mut self, n: u32) -> Self {
        self.fatal_timeout_threshold = n;
        self
    }

    #[must_use]
    pub fn rate_bounds(mut self, min_bps: u32, max_bps: u32) -> Self {
        self.min_rate_bps = min_bps;
        self.max_rate_bps = max_bps;
        self
    }

    /// Validate and freeze the configuration.
    pub fn build(self) -> Result<Config, RspError> {
        if self.mtu <= DATA_HEADER_LEN {
            return Err(RspError::ConfigInvalid(format!(
                "mtu ({}) must be greater than the datagram header ({DATA_HEADER_LEN})",
                self.mtu
            )));
        }
        if self.ack_freq == 0 {
            return Err(RspError::ConfigInvalid(
                "ack_freq must be greater than zero".into(),
            ));
        }
        if self.ack_freq > u16::MAX as usize {
            return Err(RspError::ConfigInvalid(
                "ack_freq must fit a 16-bit datagram index".into(),
            ));
        }
        if self.hello_attempts == 0 {
            return Err(RspError::ConfigInvalid(
                "hello_attempts must be greater than zero".into(),
            ));
        }
        if self.min_rate_bps == 0 || self.min_rate_bps > self.max_rate_bps {
            return Err(RspError::ConfigInvalid(
                "min_rate_bps must be nonzero and <= max_rate_bps".into(),
            ));
        }

        Ok(Config {
            group_addr: self.group_addr,
            group_port: self.group_port,
            mtu: self.mtu,
            ack_freq: self.ack_freq,
            hello_attempts: self.hello_attempts,
            hello_interval_ms: self.hello_interval_ms,
            fatal_timeout_threshold: self.fatal_timeout_threshold,
            min_rate_bps: self.min_rate_bps,
            max_rate_bps: self.max_rate_bps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = Config::builder().build().unwrap();
        assert_eq!(cfg.n_buffers(), 4);
        assert!(cfg.buffer_size() > 0);
    }

    #[test]
    fn rejects_zero_ack_freq() {
        let err = Config::builder().ack_freq(0).build().unwrap_err();
        assert!(matches!(err, RspError::ConfigInvalid(_)));
    }

    #[test]
    fn rejects_mtu_smaller_than_header() {
        let err = Config::builder().mtu(4).build().unwrap_err();
        assert!(matches!(err, RspError::ConfigInvalid(_)));
    }

    #[test]
    fn payload_and_buffer_size_match_spec_formula() {
        let cfg = Config::builder().mtu(1500).ack_freq(10).build().unwrap();
        assert_eq!(cfg.payload_size(), 1500 - DATA_HEADER_LEN);
        assert_eq!(cfg.buffer_size(), cfg.payload_size() * 10);
    }
}
