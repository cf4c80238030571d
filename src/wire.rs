// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RSP wire datagrams.
//!
//! Every datagram starts with a 16-bit little-endian `type` tag. Payloads
//! are small, fixed-layout structures that fit in a single UDP MTU; the
//! encode/decode pair for each message is a plain little-endian pack, not a
//! general serialization format.

use std::convert::TryInto;

/// Datagram kind tag (first 2 bytes of every RSP datagram).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Kind {
    Hello = 0x01,
    Deny = 0x02,
    Confirm = 0x03,
    Exit = 0x04,
    CountNode = 0x05,
    Data = 0x10,
    Ack = 0x11,
    Nack = 0x12,
    AckReq = 0x13,
}

impl Kind {
    #[must_use]
    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            0x01 => Some(Self::Hello),
            0x02 => Some(Self::Deny),
            0x03 => Some(Self::Confirm),
            0x04 => Some(Self::Exit),
            0x05 => Some(Self::CountNode),
            0x10 => Some(Self::Data),
            0x11 => Some(Self::Ack),
            0x12 => Some(Self::Nack),
            0x13 => Some(Self::AckReq),
            _ => None,
        }
    }
}

fn read_u16(buf: &[u8], off: usize) -> Option<u16> {
    Some(u16::from_le_bytes(buf.get(off..off + 2)?.try_into().ok()?))
}

fn read_u32(buf: &[u8], off: usize) -> Option<u32> {
    Some(u32::from_le_bytes(buf.get(off..off + 4)?.try_into().ok()?))
}

/// `HELLO` / `DENY` / `CONFIRM` / `EXIT` all share this body: a single peer id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeMsg {
    pub peer_id: u16,
}

impl NodeMsg {
    pub fn encode(&self, kind: Kind) -> [u8; 4] {
        let mut buf = [0u8; 4];
        buf[0..2].copy_from_slice(&(kind as u16).to_le_bytes());
        buf[2..4].copy_from_slice(&self.peer_id.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        Some(Self {
            peer_id: read_u16(buf, 2)?,
        })
    }
}

/// `COUNTNODE` body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountNodeMsg {
    pub client_id: u16,
    pub n_clients: u32,
}

impl CountNodeMsg {
    pub fn encode(&self) -> [u8; 8] {
        let mut buf = [0u8; 8];
        buf[0..2].copy_from_slice(&(Kind::CountNode as u16).to_le_bytes());
        buf[2..4].copy_from_slice(&self.client_id.to_le_bytes());
        buf[4..8].copy_from_slice(&self.n_clients.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        Some(Self {
            client_id: read_u16(buf, 2)?,
            n_clients: read_u32(buf, 4)?,
        })
    }
}

/// Fixed header of a `DATA` datagram; the payload bytes follow immediately.
pub const DATA_HEADER_LEN: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataHeader {
    /// `(peer_id << 16) | sequence_id`.
    pub write_seq_id: u32,
    /// `(index << 16) | length`.
    pub data_id_length: u32,
}

impl DataHeader {
    #[must_use]
    pub fn writer_id(&self) -> u16 {
        (self.write_seq_id >> 16) as u16
    }

    #[must_use]
    pub fn sequence_id(&self) -> u16 {
        (self.write_seq_id & 0xFFFF) as u16
    }

    #[must_use]
    pub fn index(&self) -> u16 {
        (self.data_id_length >> 16) as u16
    }

    #[must_use]
    pub fn length(&self) -> u16 {
        (self.data_id_length & 0xFFFF) as u16
    }

    pub fn new(writer_id: u16, sequence_id: u16, index: u16, length: u16) -> Self {
        Self {
            write_seq_id: (u32::from(writer_id) << 16) | u32::from(sequence_id),
            data_id_length: (u32::from(index) << 16) | u32::from(length),
        }
    }

    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&(Kind::Data as u16).to_le_bytes());
        buf.extend_from_slice(&self.write_seq_id.to_le_bytes());
        buf.extend_from_slice(&self.data_id_length.to_le_bytes());
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        Some(Self {
            write_seq_id: read_u32(buf, 2)?,
            data_id_length: read_u32(buf, 6)?,
        })
    }
}

/// `ACK` body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckMsg {
    pub reader_id: u16,
    pub writer_id: u16,
    pub sequence_id: u16,
}

impl AckMsg {
    pub fn encode(&self) -> [u8; 8] {
        let mut buf = [0u8; 8];
        buf[0..2].copy_from_slice(&(Kind::Ack as u16).to_le_bytes());
        buf[2..4].copy_from_slice(&self.reader_id.to_le_bytes());
        buf[4..6].copy_from_slice(&self.writer_id.to_le_bytes());
        buf[6..8].copy_from_slice(&self.sequence_id.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        Some(Self {
            reader_id: read_u16(buf, 2)?,
            writer_id: read_u16(buf, 4)?,
            sequence_id: read_u16(buf, 6)?,
        })
    }
}

/// `ACKREQ` body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckReqMsg {
    pub writer_id: u16,
    pub last_datagram_id: u16,
    pub sequence_id: u16,
}

impl AckReqMsg {
    pub fn encode(&self) -> [u8; 8] {
        let mut buf = [0u8; 8];
        buf[0..2].copy_from_slice(&(Kind::AckReq as u16).to_le_bytes());
        buf[2..4].copy_from_slice(&self.writer_id.to_le_bytes());
        buf[4..6].copy_from_slice(&self.last_datagram_id.to_le_bytes());
        buf[6..8].copy_from_slice(&self.sequence_id.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        Some(Self {
            writer_id: read_u16(buf, 2)?,
            last_datagram_id: read_u16(buf, 4)?,
            sequence_id: read_u16(buf, 6)?,
        })
    }
}

/// One contiguous missing-fragment run, inclusive on both ends, as carried by
/// a `NACK` datagram: `(start << 16) | end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NackRange {
    pub start: u16,
    pub end: u16,
}

impl NackRange {
    #[must_use]
    pub fn encode_u32(self) -> u32 {
        (u32::from(self.start) << 16) | u32::from(self.end)
    }

    #[must_use]
    pub fn decode_u32(v: u32) -> Self {
        Self {
            start: (v >> 16) as u16,
            end: (v & 0xFFFF) as u16,
        }
    }
}

/// `NACK` body: fixed header followed by `count` `NackRange`s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NackMsg {
    pub reader_id: u16,
    pub writer_id: u16,
    pub sequence_id: u16,
    pub ranges: Vec<NackRange>,
}

/// Fixed portion of a NACK datagram, before the range list.
pub const NACK_HEADER_LEN: usize = 10;

impl NackMsg {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(NACK_HEADER_LEN + self.ranges.len() * 4);
        buf.extend_from_slice(&(Kind::Nack as u16).to_le_bytes());
        buf.extend_from_slice(&self.reader_id.to_le_bytes());
        buf.extend_from_slice(&self.writer_id.to_le_bytes());
        buf.extend_from_slice(&self.sequence_id.to_le_bytes());
        let count: u16 = self.ranges.len() as u16;
        buf.extend_from_slice(&count.to_le_bytes());
        for r in &self.ranges {
            buf.extend_from_slice(&r.encode_u32().to_le_bytes());
        }
        buf
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        let reader_id = read_u16(buf, 2)?;
        let writer_id = read_u16(buf, 4)?;
        let sequence_id = read_u16(buf, 6)?;
        let count = read_u16(buf, 8)? as usize;
        let mut ranges = Vec::with_capacity(count);
        for i in 0..count {
            let off = NACK_HEADER_LEN + i * 4;
            let v = read_u32(buf, off)?;
            ranges.push(NackRange::decode_u32(v));
        }
        Some(Self {
            reader_id,
            writer_id,
            sequence_id,
            ranges,
        })
    }
}

/// Peek the 16-bit kind tag without fully decoding the datagram.
pub fn peek_kind(buf: &[u8]) -> Option<Kind> {
    Kind::from_u16(read_u16(buf, 0)?)
}

/// Maximum number of NACK ranges that fit in one datagram for a given MTU.
#[must_use]
pub fn max_nack_ranges(mtu: usize) -> usize {
    mtu.saturating_sub(NACK_HEADER_LEN) / 4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_msg_roundtrip() {
        let msg = NodeMsg { peer_id: 0xBEEF };
        let buf = msg.encode(Kind::Hello);
        assert_eq!(peek_kind(&buf), Some(Kind::Hello));
        assert_eq!(NodeMsg::decode(&buf), Some(msg));
    }

    #[test]
    fn data_header_packs_index_and_length() {
        let hdr = DataHeader::new(7, 42, 3, 1200);
        assert_eq!(hdr.writer_id(), 7);
        assert_eq!(hdr.sequence_id(), 42);
        assert_eq!(hdr.index(), 3);
        assert_eq!(hdr.length(), 1200);
    }

    #[test]
    fn nack_roundtrip_with_ranges() {
        let msg = NackMsg {
            reader_id: 1,
            writer_id: 2,
            sequence_id: 9,
            ranges: vec![NackRange { start: 3, end: 5 }, NackRange { start: 9, end: 9 }],
        };
        let buf = msg.encode();
        assert_eq!(peek_kind(&buf), Some(Kind::Nack));
        assert_eq!(NackMsg::decode(&buf), Some(msg));
    }

    #[test]
    fn max_nack_ranges_fits_mtu() {
        assert_eq!(max_nack_ranges(1500), (1500 - NACK_HEADER_LEN) / 4);
    }
}
