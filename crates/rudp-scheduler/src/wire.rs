//! # Datagram Framing
//!
//! Frames the packer writes around application payloads. Payload bytes are
//! opaque; only the envelope is defined here.
//!
//! ## Datagram
//!
//! ```text
//! +--------+--------+--------+--------+----------------------------
//! |  0x84  |   Sequence (24-bit LE)   | Record frames ...
//! +--------+--------+--------+--------+----------------------------
//! ```
//!
//! ## Record frame
//!
//! ```text
//! +--------+----------------------+----------------------+-----------
//! |0 0 0 0 0 0 P P| PacketId (VarInt)  | Length (VarInt)  | Payload
//! +--------+----------------------+----------------------+-----------
//! ```
//!
//! `PP` is the record's [`Priority`] in its `repr(u8)` form.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;

use crate::priority::Priority;
use crate::queue::PacketId;

// ─── Constants ───────────────────────────────────────────────────────────────

/// First byte of every scheduler datagram.
pub const DATAGRAM_FRAME_ID: u8 = 0x84;

/// Frame id + 24-bit sequence.
pub const DATAGRAM_HEADER_LEN: usize = 4;

/// Datagram sequence numbers wrap at 2^24.
pub const SEQUENCE_MASK: u32 = 0x00FF_FFFF;

const PRIORITY_BITS: u8 = 0x03;

// ─── VarInt (QUIC-style, RFC 9000 §16) ──────────────────────────────────────

/// A 62-bit variable-length integer encoded in 1, 2, 4, or 8 bytes.
///
/// - `0x00..0x3F` → 1 byte, prefix `00`
/// - `0x40..0x3FFF` → 2 bytes, prefix `01`
/// - `0x4000..0x3FFF_FFFF` → 4 bytes, prefix `10`
/// - larger → 8 bytes, prefix `11`
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VarInt(u64);

impl VarInt {
    /// Maximum representable value: 2^62 - 1.
    pub const MAX: u64 = (1 << 62) - 1;

    /// Returns `None` if the value exceeds 62 bits.
    #[inline]
    pub fn new(val: u64) -> Option<Self> {
        (val <= Self::MAX).then_some(VarInt(val))
    }

    /// Clamp into range. Lengths and ids produced by this crate never exceed it.
    #[inline]
    pub fn saturating(val: u64) -> Self {
        VarInt(val.min(Self::MAX))
    }

    #[inline]
    pub fn value(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn encoded_len(self) -> usize {
        Self::len_of(self.0)
    }

    /// Encoded size of a raw value without constructing a `VarInt`.
    #[inline]
    pub fn len_of(val: u64) -> usize {
        if val < 0x40 {
            1
        } else if val < 0x4000 {
            2
        } else if val < 0x4000_0000 {
            4
        } else {
            8
        }
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        match self.encoded_len() {
            1 => buf.put_u8(self.0 as u8),
            2 => buf.put_u16(0x4000 | self.0 as u16),
            4 => buf.put_u32(0x8000_0000 | self.0 as u32),
            _ => buf.put_u64(0xC000_0000_0000_0000 | self.0),
        }
    }

    /// Returns `None` if the buffer is too short.
    pub fn decode(buf: &mut impl Buf) -> Option<Self> {
        if !buf.has_remaining() {
            return None;
        }
        let first = buf.chunk()[0];
        let len = 1usize << (first >> 6);
        if buf.remaining() < len {
            return None;
        }
        let val = match len {
            1 => {
                buf.advance(1);
                (first & 0x3F) as u64
            }
            2 => (buf.get_u16() & 0x3FFF) as u64,
            4 => (buf.get_u32() & 0x3FFF_FFFF) as u64,
            _ => buf.get_u64() & 0x3FFF_FFFF_FFFF_FFFF,
        };
        Some(VarInt(val))
    }
}

impl fmt::Debug for VarInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VarInt({})", self.0)
    }
}

// ─── Datagram Header ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatagramHeader {
    /// 24-bit datagram sequence number.
    pub sequence: u32,
}

impl DatagramHeader {
    pub fn new(sequence: u32) -> Self {
        DatagramHeader {
            sequence: sequence & SEQUENCE_MASK,
        }
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u8(DATAGRAM_FRAME_ID);
        let seq = self.sequence & SEQUENCE_MASK;
        buf.put_u8(seq as u8);
        buf.put_u8((seq >> 8) as u8);
        buf.put_u8((seq >> 16) as u8);
    }

    pub fn decode(buf: &mut impl Buf) -> Option<Self> {
        if buf.remaining() < DATAGRAM_HEADER_LEN || buf.get_u8() != DATAGRAM_FRAME_ID {
            return None;
        }
        let b0 = buf.get_u8() as u32;
        let b1 = buf.get_u8() as u32;
        let b2 = buf.get_u8() as u32;
        Some(DatagramHeader {
            sequence: b0 | (b1 << 8) | (b2 << 16),
        })
    }
}

// ─── Record Header ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub priority: Priority,
    pub id: PacketId,
    pub payload_len: usize,
}

impl RecordHeader {
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.priority as u8 & PRIORITY_BITS);
        VarInt::saturating(self.id.value()).encode(buf);
        VarInt::saturating(self.payload_len as u64).encode(buf);
    }

    pub fn decode(buf: &mut impl Buf) -> Option<Self> {
        if !buf.has_remaining() {
            return None;
        }
        let flags = buf.get_u8();
        if flags & !PRIORITY_BITS != 0 {
            return None;
        }
        let id = VarInt::decode(buf)?.value();
        let payload_len = usize::try_from(VarInt::decode(buf)?.value()).ok()?;
        Some(RecordHeader {
            priority: Priority::from_bits(flags),
            id: PacketId(id),
            payload_len,
        })
    }

    pub fn encoded_len(&self) -> usize {
        Self::encoded_len_for(self.id, self.payload_len)
    }

    /// Header size for a record with this id and payload length.
    #[inline]
    pub fn encoded_len_for(id: PacketId, payload_len: usize) -> usize {
        1 + VarInt::len_of(id.value()) + VarInt::len_of(payload_len as u64)
    }
}

/// Append one record frame.
pub fn encode_record(buf: &mut BytesMut, priority: Priority, id: PacketId, payload: &[u8]) {
    RecordHeader {
        priority,
        id,
        payload_len: payload.len(),
    }
    .encode(buf);
    buf.put_slice(payload);
}

// ─── Reader ─────────────────────────────────────────────────────────────────

/// A record frame read back out of a datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedRecord {
    pub id: PacketId,
    pub priority: Priority,
    pub payload: Bytes,
}

/// Iterates the records of one datagram. Yields nothing further once a frame
/// is malformed; check [`is_malformed`](Self::is_malformed) afterwards.
pub struct DatagramReader {
    header: DatagramHeader,
    buf: Bytes,
    malformed: bool,
}

impl DatagramReader {
    /// Returns `None` if the datagram header is missing or wrong.
    pub fn new(mut buf: Bytes) -> Option<Self> {
        let header = DatagramHeader::decode(&mut buf)?;
        Some(DatagramReader {
            header,
            buf,
            malformed: false,
        })
    }

    pub fn header(&self) -> DatagramHeader {
        self.header
    }

    pub fn is_malformed(&self) -> bool {
        self.malformed
    }
}

impl Iterator for DatagramReader {
    type Item = DecodedRecord;

    fn next(&mut self) -> Option<DecodedRecord> {
        if self.malformed || !self.buf.has_remaining() {
            return None;
        }
        let header = match RecordHeader::decode(&mut self.buf) {
            Some(h) if h.payload_len <= self.buf.remaining() => h,
            _ => {
                self.malformed = true;
                return None;
            }
        };
        let payload = self.buf.split_to(header.payload_len);
        Some(DecodedRecord {
            id: header.id,
            priority: header.priority,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ─── VarInt ─────────────────────────────────────────────────────────

    #[test]
    fn varint_length_boundaries() {
        assert_eq!(VarInt::len_of(0x3F), 1);
        assert_eq!(VarInt::len_of(0x40), 2);
        assert_eq!(VarInt::len_of(0x3FFF), 2);
        assert_eq!(VarInt::len_of(0x4000), 4);
        assert_eq!(VarInt::len_of(0x4000_0000), 8);
        assert!(VarInt::new(VarInt::MAX + 1).is_none());
    }

    #[test]
    fn varint_truncated_buffer() {
        let mut buf = BytesMut::new();
        VarInt::saturating(0x1234).encode(&mut buf);
        let mut short = buf.freeze().slice(0..1);
        assert!(VarInt::decode(&mut short).is_none());
    }

    // ─── Datagram Header ────────────────────────────────────────────────

    #[test]
    fn datagram_header_little_endian_sequence() {
        let mut buf = BytesMut::new();
        DatagramHeader::new(0x0A0B0C).encode(&mut buf);
        assert_eq!(&buf[..], &[DATAGRAM_FRAME_ID, 0x0C, 0x0B, 0x0A]);
        let hdr = DatagramHeader::decode(&mut buf.freeze()).unwrap();
        assert_eq!(hdr.sequence, 0x0A0B0C);
    }

    #[test]
    fn datagram_sequence_wraps_at_24_bits() {
        assert_eq!(DatagramHeader::new(SEQUENCE_MASK + 1).sequence, 0);
    }

    #[test]
    fn wrong_frame_id_rejected() {
        let mut buf = Bytes::from_static(&[0x00, 1, 2, 3]);
        assert!(DatagramHeader::decode(&mut buf).is_none());
    }

    // ─── Records ────────────────────────────────────────────────────────

    #[test]
    fn reader_yields_records_in_order() {
        let mut buf = BytesMut::new();
        DatagramHeader::new(5).encode(&mut buf);
        encode_record(&mut buf, Priority::High, PacketId(1), b"alpha");
        encode_record(&mut buf, Priority::Low, PacketId(300), b"");
        encode_record(&mut buf, Priority::Medium, PacketId(2), b"gamma");

        let reader = DatagramReader::new(buf.freeze()).unwrap();
        assert_eq!(reader.header().sequence, 5);
        let records: Vec<_> = reader.collect();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].payload, &b"alpha"[..]);
        assert_eq!(records[1].id, PacketId(300));
        assert_eq!(records[1].priority, Priority::Low);
        assert!(records[1].payload.is_empty());
        assert_eq!(records[2].priority, Priority::Medium);
    }

    #[test]
    fn record_header_len_matches_encoding() {
        let hdr = RecordHeader {
            priority: Priority::Immediate,
            id: PacketId(70_000),
            payload_len: 1200,
        };
        let mut buf = BytesMut::new();
        hdr.encode(&mut buf);
        assert_eq!(buf.len(), hdr.encoded_len());
    }

    #[test]
    fn truncated_payload_marks_malformed() {
        let mut buf = BytesMut::new();
        DatagramHeader::new(0).encode(&mut buf);
        encode_record(&mut buf, Priority::High, PacketId(1), b"payload");
        let truncated = buf.freeze().slice(..DATAGRAM_HEADER_LEN + 5);
        let mut reader = DatagramReader::new(truncated).unwrap();
        assert!(reader.next().is_none());
        assert!(reader.is_malformed());
    }

    #[test]
    fn reserved_flag_bits_rejected() {
        let mut buf = Bytes::from_static(&[0x80, 0x01, 0x00]);
        assert!(RecordHeader::decode(&mut buf).is_none());
    }
}
