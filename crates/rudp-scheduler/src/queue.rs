//! # Priority Queue Set
//!
//! Four FIFO queues, one per [`Priority`], backed by a single slab so that
//! enqueue is O(1) amortized and cancellation by [`PacketId`] is O(1).
//!
//! Cancelled records leave a stale slot behind in their class queue; stale
//! slots are skipped (and discarded) the next time the head of that queue is
//! read. Lengths are tracked separately so they never count stale slots.

use bytes::Bytes;
use quanta::Instant;
use serde::Serialize;
use slab::Slab;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::net::SocketAddr;

use crate::priority::Priority;
use crate::wire::{RecordHeader, VarInt};

// ─── PacketId ────────────────────────────────────────────────────────────────

/// Identifier assigned at enqueue, used for cancellation and ack correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct PacketId(pub u64);

impl PacketId {
    #[inline]
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Monotonic id generator. Ids fit a wire [`VarInt`].
pub struct PacketIdGenerator {
    next: u64,
}

impl PacketIdGenerator {
    pub fn new() -> Self {
        PacketIdGenerator { next: 0 }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> PacketId {
        let id = self.next;
        self.next = self.next.wrapping_add(1);
        if self.next > VarInt::MAX {
            self.next = 0;
        }
        PacketId(id)
    }

    pub fn current(&self) -> u64 {
        self.next
    }
}

impl Default for PacketIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

// ─── PacketRecord ────────────────────────────────────────────────────────────

/// A pending outbound packet.
#[derive(Debug, Clone)]
pub struct PacketRecord {
    pub id: PacketId,
    pub priority: Priority,
    /// Where the packet goes. The address is owned by the connection layer.
    pub destination: SocketAddr,
    pub payload: Bytes,
    pub enqueued_at: Instant,
}

impl PacketRecord {
    pub fn new(id: PacketId, priority: Priority, destination: SocketAddr, payload: Bytes) -> Self {
        PacketRecord {
            id,
            priority,
            destination,
            payload,
            enqueued_at: Instant::now(),
        }
    }

    /// Bytes this record occupies inside a datagram (frame header + payload).
    pub fn encoded_len(&self) -> usize {
        RecordHeader::encoded_len_for(self.id, self.payload.len()) + self.payload.len()
    }
}

// ─── PriorityQueueSet ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct Slot {
    id: PacketId,
    key: usize,
}

/// One FIFO per priority class. Insertion order within a class is never
/// changed.
pub struct PriorityQueueSet {
    records: Slab<PacketRecord>,
    queues: [VecDeque<Slot>; Priority::COUNT],
    lens: [usize; Priority::COUNT],
    bytes: [usize; Priority::COUNT],
    index: HashMap<PacketId, usize>,
}

impl PriorityQueueSet {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Pre-allocate room for `capacity` records across all classes.
    pub fn with_capacity(capacity: usize) -> Self {
        PriorityQueueSet {
            records: Slab::with_capacity(capacity),
            queues: Default::default(),
            lens: [0; Priority::COUNT],
            bytes: [0; Priority::COUNT],
            index: HashMap::with_capacity(capacity),
        }
    }

    /// Append a record to the tail of its class queue.
    pub fn enqueue(&mut self, record: PacketRecord) {
        let rank = record.priority.rank();
        let id = record.id;
        self.bytes[rank] += record.encoded_len();
        let key = self.records.insert(record);
        self.index.insert(id, key);
        self.queues[rank].push_back(Slot { id, key });
        self.lens[rank] += 1;
    }

    /// Classes holding at least one record, highest priority first.
    pub fn peek_nonempty_classes(&self) -> Vec<Priority> {
        Priority::ALL
            .into_iter()
            .filter(|p| self.lens[p.rank()] > 0)
            .collect()
    }

    /// Remove up to `count` records from the head of `priority`'s queue.
    pub fn dequeue(&mut self, priority: Priority, count: usize) -> Vec<PacketRecord> {
        self.dequeue_while(priority, count, |_| true)
    }

    /// Like [`dequeue`](Self::dequeue), but stops at the first head record
    /// `accept` rejects. The rejected record stays queued.
    pub fn dequeue_while(
        &mut self,
        priority: Priority,
        count: usize,
        mut accept: impl FnMut(&PacketRecord) -> bool,
    ) -> Vec<PacketRecord> {
        let rank = priority.rank();
        let mut out = Vec::with_capacity(count.min(self.lens[rank]));

        while out.len() < count {
            let Some(key) = self.head_key(rank) else {
                break;
            };
            if !accept(&self.records[key]) {
                break;
            }
            self.queues[rank].pop_front();
            let record = self.take(key);
            out.push(record);
        }
        out
    }

    /// Remove a still-queued record. Returns `None` if it was already
    /// dequeued or never existed.
    pub fn cancel(&mut self, id: PacketId) -> Option<PacketRecord> {
        let key = self.index.get(&id).copied()?;
        Some(self.take(key))
    }

    pub fn contains(&self, id: PacketId) -> bool {
        self.index.contains_key(&id)
    }

    /// Drain every queue, highest priority first, FIFO within each class.
    pub fn drain_all(&mut self) -> Vec<PacketRecord> {
        let mut out = Vec::with_capacity(self.len());
        for priority in Priority::ALL {
            let n = self.lens[priority.rank()];
            out.extend(self.dequeue(priority, n));
        }
        out
    }

    /// Number of live records in one class.
    pub fn len_of(&self, priority: Priority) -> usize {
        self.lens[priority.rank()]
    }

    /// Encoded bytes waiting in one class.
    pub fn bytes_of(&self, priority: Priority) -> usize {
        self.bytes[priority.rank()]
    }

    /// Live record count per buffered class, in `Priority::BUFFERED` order.
    pub fn buffered_backlog(&self) -> [usize; 3] {
        Priority::BUFFERED.map(|p| self.lens[p.rank()])
    }

    pub fn len(&self) -> usize {
        self.lens.iter().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ─── Internal Helpers ────────────────────────────────────────────────

    /// Slab key of the first live record in a class, discarding stale slots.
    fn head_key(&mut self, rank: usize) -> Option<usize> {
        while let Some(slot) = self.queues[rank].front().copied() {
            match self.records.get(slot.key) {
                Some(record) if record.id == slot.id => return Some(slot.key),
                _ => {
                    self.queues[rank].pop_front();
                }
            }
        }
        None
    }

    fn take(&mut self, key: usize) -> PacketRecord {
        let record = self.records.remove(key);
        let rank = record.priority.rank();
        self.index.remove(&record.id);
        self.lens[rank] -= 1;
        self.bytes[rank] -= record.encoded_len();
        record
    }
}

impl Default for PriorityQueueSet {
    fn default() -> Self {
        Self::new()
    }
}
