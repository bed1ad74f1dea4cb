//! # Priority Classes
//!
//! The four delivery classes of the send scheduler and the weights that
//! turn "for every 2 of priority P, 1 of priority P+1" into per-tick slots.
//!
//! ```text
//! IMMEDIATE  — sent inline, never buffered
//! HIGH       — weight 4  ┐
//! MEDIUM     — weight 2  ├ buffered, flushed every tick
//! LOW        — weight 1  ┘
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

// ─── Priority ────────────────────────────────────────────────────────────────

/// Delivery priority of an outbound packet.
///
/// Total order: `Immediate > High > Medium > Low`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Priority {
    /// Only sent when the higher classes leave room (1 per 2 MEDIUM).
    Low = 0,
    /// 1 per 2 HIGH.
    #[default]
    Medium = 1,
    /// Buffered, but served first at every tick.
    High = 2,
    /// Triggers a send on the caller's stack. Never aggregated with the tick.
    Immediate = 3,
}

impl Priority {
    /// All classes, highest first.
    pub const ALL: [Priority; 4] = [
        Priority::Immediate,
        Priority::High,
        Priority::Medium,
        Priority::Low,
    ];

    /// The classes that wait for a tick, in service order.
    pub const BUFFERED: [Priority; 3] = [Priority::High, Priority::Medium, Priority::Low];

    /// Number of priority classes.
    pub const COUNT: usize = 4;

    pub fn is_immediate(self) -> bool {
        self == Priority::Immediate
    }

    /// Dense index with `Immediate` at 0 and `Low` at 3.
    #[inline]
    pub fn rank(self) -> usize {
        Priority::Immediate as usize - self as usize
    }

    /// Index into `BUFFERED`, `None` for `Immediate`.
    #[inline]
    pub fn buffered_index(self) -> Option<usize> {
        match self {
            Priority::Immediate => None,
            other => Some(other.rank() - 1),
        }
    }

    /// Decode from the 2-bit wire representation.
    pub fn from_bits(bits: u8) -> Priority {
        match bits & 0x03 {
            0 => Priority::Low,
            1 => Priority::Medium,
            2 => Priority::High,
            _ => Priority::Immediate,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Immediate => "immediate",
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Weights ─────────────────────────────────────────────────────────────────

/// Relative service weights of the buffered classes.
///
/// The defaults compound the documented 2:1 steps: HIGH:MEDIUM = 2:1 and
/// MEDIUM:LOW = 2:1, hence HIGH:LOW = 4:1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityWeights {
    pub high: u32,
    pub medium: u32,
    pub low: u32,
}

impl Default for PriorityWeights {
    fn default() -> Self {
        PriorityWeights {
            high: 4,
            medium: 2,
            low: 1,
        }
    }
}

impl PriorityWeights {
    /// Weights in `Priority::BUFFERED` order.
    pub fn as_array(&self) -> [u32; 3] {
        [self.high, self.medium, self.low]
    }

    /// Weight of a buffered class. `Immediate` has no weight.
    pub fn weight(&self, priority: Priority) -> Option<u32> {
        priority.buffered_index().map(|i| self.as_array()[i])
    }

    pub fn total(&self) -> u64 {
        self.high as u64 + self.medium as u64 + self.low as u64
    }
}
