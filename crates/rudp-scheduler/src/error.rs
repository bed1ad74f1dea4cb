//! Error types surfaced by the scheduler and its collaborators.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use crate::queue::PacketId;

// ── Enqueue ─────────────────────────────────────────────────────────

/// Returned synchronously from the enqueue entry points.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("scheduler is closed")]
    Closed,
    #[error("payload of {size} bytes cannot fit a {max}-byte datagram")]
    PayloadTooLarge { size: usize, max: usize },
}

// ── Packing ─────────────────────────────────────────────────────────

/// A single record the packer refused. The rest of the batch is unaffected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PackError {
    #[error("record {id} serializes to {size} bytes, datagram limit is {max}")]
    RecordTooLarge { id: PacketId, size: usize, max: usize },
}

// ── Transport ───────────────────────────────────────────────────────

/// Failure reported by the datagram transport. Never retried here.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
    #[error("destination {0} is unreachable")]
    Unreachable(SocketAddr),
    #[error("short write: {written} of {len} bytes")]
    ShortWrite { written: usize, len: usize },
}

// ── Configuration ───────────────────────────────────────────────────

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unsupported config version {0}")]
    UnsupportedVersion(u32),
    #[error("max_datagram_bytes {value} outside [{min}, {max}]")]
    DatagramSize { value: usize, min: usize, max: usize },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("invalid config TOML: {0}")]
    Toml(String),
}
