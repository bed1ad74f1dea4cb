//! # Scheduler Statistics
//!
//! Counters kept by the send scheduler, serializable for JSON export.

use serde::Serialize;

use crate::priority::Priority;

// ─── Per-Class Counters ─────────────────────────────────────────────────────

/// One counter per priority class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClassCounters {
    pub immediate: u64,
    pub high: u64,
    pub medium: u64,
    pub low: u64,
}

impl ClassCounters {
    pub fn add(&mut self, priority: Priority, n: u64) {
        *self.slot_mut(priority) += n;
    }

    pub fn get(&self, priority: Priority) -> u64 {
        match priority {
            Priority::Immediate => self.immediate,
            Priority::High => self.high,
            Priority::Medium => self.medium,
            Priority::Low => self.low,
        }
    }

    pub fn total(&self) -> u64 {
        self.immediate + self.high + self.medium + self.low
    }

    fn slot_mut(&mut self, priority: Priority) -> &mut u64 {
        match priority {
            Priority::Immediate => &mut self.immediate,
            Priority::High => &mut self.high,
            Priority::Medium => &mut self.medium,
            Priority::Low => &mut self.low,
        }
    }
}

// ─── Scheduler Stats ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerStats {
    /// Records accepted by the enqueue entry points.
    pub enqueued: ClassCounters,
    /// Records serialized into a datagram.
    pub packed: ClassCounters,
    /// Records removed by `cancel` or by teardown.
    pub cancelled: ClassCounters,
    /// Records the packer refused.
    pub dropped: ClassCounters,
    /// Ticks that ran a flush.
    pub ticks: u64,
    /// Ticks skipped because of the send-rate ceiling.
    pub ticks_throttled: u64,
    /// Inline dispatches on the immediate path.
    pub immediate_dispatches: u64,
    /// Datagrams accepted by the transport.
    pub datagrams_sent: u64,
    /// Bytes accepted by the transport.
    pub bytes_sent: u64,
    /// Datagrams the transport refused.
    pub transport_failures: u64,
    /// Slots granted by the starvation guard.
    pub guaranteed_slots: u64,
}

impl SchedulerStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records enqueued but not yet packed, cancelled or dropped.
    pub fn outstanding(&self) -> u64 {
        self.enqueued
            .total()
            .saturating_sub(self.packed.total() + self.cancelled.total() + self.dropped.total())
    }

    /// Average records per datagram.
    pub fn aggregation_ratio(&self) -> f64 {
        let datagrams = self.datagrams_sent + self.transport_failures;
        if datagrams == 0 {
            0.0
        } else {
            self.packed.total() as f64 / datagrams as f64
        }
    }
}
