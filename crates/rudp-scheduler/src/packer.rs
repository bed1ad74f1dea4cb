//! # Datagram Packer
//!
//! Greedily fills datagrams with selected records, up to the configured
//! maximum datagram size (the path MTU estimate). Selection order is kept
//! across datagram boundaries. A datagram only carries records for one
//! destination; a destination change closes the current datagram.
//!
//! A record too large for an empty datagram is rejected on its own with
//! [`PackError::RecordTooLarge`]; it is never truncated and never stalls the
//! rest of the batch.

use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::error::PackError;
use crate::queue::{PacketId, PacketRecord};
use crate::wire::{encode_record, DatagramHeader, DATAGRAM_HEADER_LEN, SEQUENCE_MASK};

// ─── Datagram ────────────────────────────────────────────────────────────────

/// One serialized datagram, ready for the transport.
#[derive(Debug, Clone)]
pub struct Datagram {
    /// 24-bit datagram sequence number.
    pub sequence: u32,
    pub destination: SocketAddr,
    /// Header + record frames.
    pub data: Bytes,
    /// Records carried, in order.
    pub packet_ids: Vec<PacketId>,
}

impl Datagram {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packet_ids.is_empty()
    }
}

/// Result of packing one selection.
#[derive(Debug, Default)]
pub struct PackOutcome {
    /// Datagrams in production order.
    pub datagrams: Vec<Datagram>,
    /// Records that could not be packed, with the reason.
    pub rejected: Vec<(PacketRecord, PackError)>,
}

impl PackOutcome {
    /// Number of records that made it into a datagram.
    pub fn packed_records(&self) -> usize {
        self.datagrams.iter().map(|d| d.packet_ids.len()).sum()
    }
}

// ─── DatagramPacker ──────────────────────────────────────────────────────────

struct Builder {
    sequence: u32,
    destination: SocketAddr,
    buf: BytesMut,
    packet_ids: Vec<PacketId>,
}

impl Builder {
    fn finish(self) -> Datagram {
        Datagram {
            sequence: self.sequence,
            destination: self.destination,
            data: self.buf.freeze(),
            packet_ids: self.packet_ids,
        }
    }
}

/// Serializes records into datagrams. Cloning shares the sequence counter,
/// so the immediate path and the tick path number datagrams consistently.
#[derive(Debug, Clone)]
pub struct DatagramPacker {
    max_datagram_bytes: usize,
    sequence: Arc<AtomicU32>,
}

impl DatagramPacker {
    pub fn new(max_datagram_bytes: usize) -> Self {
        DatagramPacker {
            max_datagram_bytes,
            sequence: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn max_datagram_bytes(&self) -> usize {
        self.max_datagram_bytes
    }

    /// Largest record frame that fits in an otherwise empty datagram.
    pub fn max_record_bytes(&self) -> usize {
        self.max_datagram_bytes.saturating_sub(DATAGRAM_HEADER_LEN)
    }

    pub fn fits(&self, record: &PacketRecord) -> bool {
        record.encoded_len() <= self.max_record_bytes()
    }

    /// Sequence number the next datagram will carry.
    pub fn next_sequence(&self) -> u32 {
        self.sequence.load(Ordering::Relaxed) & SEQUENCE_MASK
    }

    /// Pack `records` in order. Records are consumed: each ends up in
    /// exactly one datagram or in `rejected`.
    pub fn pack(&self, records: impl IntoIterator<Item = PacketRecord>) -> PackOutcome {
        let mut outcome = PackOutcome::default();
        let mut current: Option<Builder> = None;

        for record in records {
            let size = record.encoded_len();
            if size > self.max_record_bytes() {
                let error = PackError::RecordTooLarge {
                    id: record.id,
                    size: size + DATAGRAM_HEADER_LEN,
                    max: self.max_datagram_bytes,
                };
                outcome.rejected.push((record, error));
                continue;
            }

            let full = current.as_ref().is_some_and(|b| {
                b.destination != record.destination || b.buf.len() + size > self.max_datagram_bytes
            });
            if full {
                if let Some(done) = current.take() {
                    outcome.datagrams.push(done.finish());
                }
            }

            let builder = current.get_or_insert_with(|| self.start(record.destination));
            encode_record(&mut builder.buf, record.priority, record.id, &record.payload);
            builder.packet_ids.push(record.id);
        }

        if let Some(done) = current {
            outcome.datagrams.push(done.finish());
        }
        outcome
    }

    fn start(&self, destination: SocketAddr) -> Builder {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) & SEQUENCE_MASK;
        let mut buf = BytesMut::with_capacity(self.max_datagram_bytes);
        DatagramHeader::new(sequence).encode(&mut buf);
        Builder {
            sequence,
            destination,
            buf,
            packet_ids: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::priority::Priority;
    use crate::wire::DatagramReader;

    const MTU: usize = 400;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn record(id: u64, len: usize) -> PacketRecord {
        PacketRecord::new(PacketId(id), Priority::High, addr(9000), Bytes::from(vec![id as u8; len]))
    }

    // ─── Packing ────────────────────────────────────────────────────────

    #[test]
    fn small_records_share_one_datagram() {
        let packer = DatagramPacker::new(MTU);
        let outcome = packer.pack((0..5).map(|i| record(i, 20)));
        assert_eq!(outcome.datagrams.len(), 1);
        assert_eq!(outcome.datagrams[0].packet_ids.len(), 5);
        assert!(outcome.rejected.is_empty());
    }

    #[test]
    fn overflow_starts_new_datagram_and_keeps_order() {
        let packer = DatagramPacker::new(MTU);
        // Each frame is 4 + 150 bytes; two fit in 400, the third does not.
        let outcome = packer.pack((0..5).map(|i| record(i, 150)));
        assert_eq!(outcome.datagrams.len(), 3);
        let order: Vec<u64> = outcome
            .datagrams
            .iter()
            .flat_map(|d| d.packet_ids.iter().map(|id| id.value()))
            .collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
        for d in &outcome.datagrams {
            assert!(d.len() <= MTU);
        }
    }

    #[test]
    fn exact_fit_is_allowed() {
        let packer = DatagramPacker::new(MTU);
        // 4 header + 1 flags + 1 id + 2 length varint = 8 bytes of overhead.
        let outcome = packer.pack([record(1, MTU - 8)]);
        assert_eq!(outcome.datagrams.len(), 1);
        assert_eq!(outcome.datagrams[0].len(), MTU);
    }

    #[test]
    fn oversized_record_is_rejected_alone() {
        let packer = DatagramPacker::new(MTU);
        let outcome = packer.pack([record(1, 10), record(2, MTU), record(3, 10)]);
        assert_eq!(outcome.rejected.len(), 1);
        assert_eq!(outcome.rejected[0].0.id, PacketId(2));
        assert!(matches!(
            outcome.rejected[0].1,
            PackError::RecordTooLarge { id: PacketId(2), .. }
        ));
        assert_eq!(outcome.packed_records(), 2);
    }

    #[test]
    fn destination_change_splits_datagrams() {
        let packer = DatagramPacker::new(MTU);
        let mut other = record(2, 10);
        other.destination = addr(9001);
        let outcome = packer.pack([record(1, 10), other, record(3, 10)]);
        assert_eq!(outcome.datagrams.len(), 3);
        assert_eq!(outcome.datagrams[1].destination, addr(9001));
    }

    #[test]
    fn sequences_increase_across_calls_and_clones() {
        let packer = DatagramPacker::new(MTU);
        let clone = packer.clone();
        let a = packer.pack([record(1, 10)]);
        let b = clone.pack([record(2, 10)]);
        assert_eq!(a.datagrams[0].sequence, 0);
        assert_eq!(b.datagrams[0].sequence, 1);
        assert_eq!(packer.next_sequence(), 2);
    }

    #[test]
    fn empty_selection_produces_nothing() {
        let packer = DatagramPacker::new(MTU);
        let outcome = packer.pack(Vec::new());
        assert!(outcome.datagrams.is_empty());
        assert_eq!(packer.next_sequence(), 0);
    }

    #[test]
    fn packed_datagram_decodes() {
        let packer = DatagramPacker::new(MTU);
        let outcome = packer.pack([record(7, 12), record(8, 0)]);
        let reader = DatagramReader::new(outcome.datagrams[0].data.clone()).unwrap();
        let ids: Vec<PacketId> = reader.map(|r| r.id).collect();
        assert_eq!(ids, vec![PacketId(7), PacketId(8)]);
    }
}
