//! # rudp-scheduler
//!
//! Priority-aware send scheduler for a reliable-UDP layer.
//!
//! Outbound packets are tagged IMMEDIATE, HIGH, MEDIUM or LOW. IMMEDIATE
//! packets are packed and sent on the caller's thread; the rest are
//! coalesced into MTU-bounded datagrams on a fixed tick (10 ms by default),
//! with a 4:2:1 weighted split between HIGH, MEDIUM and LOW and per-class
//! service debt so LOW traffic is never starved.
//!
//! ## Crate structure
//!
//! - [`priority`] — Priority classes and weights
//! - [`queue`] — Per-class FIFO queue set, packet ids and records
//! - [`aggregation`] — Per-tick slot allocation
//! - [`starvation`] — Service debt and guaranteed slots
//! - [`packer`] — Greedy MTU-bounded datagram packing
//! - [`wire`] — Datagram and record framing, VarInt
//! - [`scheduler`] — Tick state machine and immediate path
//! - [`runtime`] — Timer thread driving the scheduler
//! - [`transport`] — Datagram transport trait and UDP implementation
//! - [`config`] — TOML configuration
//! - [`stats`] — Scheduler counters
//! - [`error`] — Error types

pub mod aggregation;
pub mod config;
pub mod error;
pub mod packer;
pub mod priority;
pub mod queue;
pub mod runtime;
pub mod scheduler;
pub mod starvation;
pub mod stats;
pub mod transport;
pub mod wire;

pub use error::{QueueError, TransportError};
pub use priority::Priority;
pub use queue::PacketId;
pub use runtime::SchedulerRuntime;
pub use scheduler::{SchedulerHandle, TickScheduler};
