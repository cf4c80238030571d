// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types for the RSP reliable stream protocol.

use std::fmt;
use std::io;

/// Result type for RSP operations.
pub type RspResult<T> = Result<T, RspError>;

/// Errors that can occur while operating an RSP connection.
#[derive(Debug)]
pub enum RspError {
    /// The underlying UDP socket failed (bind, join, send, recv).
    TransportFailure(io::Error),

    /// The send path saw `fatal_timeout_threshold` consecutive event-loop
    /// timeouts while waiting for ACKs and gave up.
    Unreachable,

    /// A datagram referenced a sender or state that discovery should already
    /// have established, or the datagram header was malformed.
    ProtocolViolation(String),

    /// All receive slots for a sender were busy with other sequences.
    ///
    /// Not surfaced as a hard error to callers: the datagram is dropped and
    /// the next ACKREQ round drives retransmission.
    ResourceExhaustion,

    /// The connection was closed locally via `close()`.
    LocalClose,

    /// A `Config` was constructed with an invalid combination of tunables.
    ConfigInvalid(String),
}

impl fmt::Display for RspError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TransportFailure(e) => write!(f, "transport failure: {e}"),
            Self::Unreachable => write!(f, "peer unreachable: too many consecutive timeouts"),
            Self::ProtocolViolation(msg) => write!(f, "protocol violation: {msg}"),
            Self::ResourceExhaustion => write!(f, "all receive slots busy"),
            Self::LocalClose => write!(f, "connection closed locally"),
            Self::ConfigInvalid(msg) => write!(f, "invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for RspError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::TransportFailure(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for RspError {
    fn from(e: io::Error) -> Self {
        Self::TransportFailure(e)
    }
}
