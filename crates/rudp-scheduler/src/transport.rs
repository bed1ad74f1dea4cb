//! # Datagram Transport
//!
//! The unreliable datagram service the scheduler hands finished datagrams
//! to. Errors are surfaced to the caller as-is; retry policy belongs to the
//! reliability layer above.

use bytes::Bytes;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::error::TransportError;

pub trait DatagramTransport: Send + Sync {
    /// Send one datagram. Ownership of the bytes passes to the transport.
    fn send_datagram(&self, datagram: Bytes, destination: SocketAddr) -> Result<(), TransportError>;
}

// ─── UDP ────────────────────────────────────────────────────────────────────

/// `DatagramTransport` over a plain UDP socket.
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    pub fn bind(addr: impl ToSocketAddrs) -> io::Result<Self> {
        Ok(UdpTransport {
            socket: UdpSocket::bind(addr)?,
        })
    }

    pub fn from_socket(socket: UdpSocket) -> Self {
        UdpTransport { socket }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl DatagramTransport for UdpTransport {
    fn send_datagram(&self, datagram: Bytes, destination: SocketAddr) -> Result<(), TransportError> {
        let written = self.socket.send_to(&datagram, destination)?;
        if written != datagram.len() {
            return Err(TransportError::ShortWrite {
                written,
                len: datagram.len(),
            });
        }
        Ok(())
    }
}

// ─── In-Memory ──────────────────────────────────────────────────────────────

/// Captures datagrams instead of sending them. Failures can be injected for
/// the next `n` sends.
#[derive(Default)]
pub struct MemoryTransport {
    sent: Mutex<Vec<(SocketAddr, Bytes)>>,
    fail_next: AtomicUsize,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` sends fail with `TransportError::Unreachable`.
    pub fn fail_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::Relaxed);
    }

    /// Everything sent so far, in order.
    pub fn sent(&self) -> Vec<(SocketAddr, Bytes)> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Take and clear the captured datagrams.
    pub fn take(&self) -> Vec<(SocketAddr, Bytes)> {
        std::mem::take(&mut *self.sent.lock().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl DatagramTransport for MemoryTransport {
    fn send_datagram(&self, datagram: Bytes, destination: SocketAddr) -> Result<(), TransportError> {
        let failing = self
            .fail_next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(TransportError::Unreachable(destination));
        }
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((destination, datagram));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn udp_transport_delivers_datagram() {
        let rx = UdpSocket::bind("127.0.0.1:0").unwrap();
        rx.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let tx = UdpTransport::bind("127.0.0.1:0").unwrap();

        tx.send_datagram(Bytes::from_static(b"datagram"), rx.local_addr().unwrap())
            .unwrap();

        let mut buf = [0u8; 64];
        let (n, from) = rx.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"datagram");
        assert_eq!(from, tx.local_addr().unwrap());
    }

    #[test]
    fn memory_transport_injected_failures() {
        let t = MemoryTransport::new();
        let dest: SocketAddr = "127.0.0.1:1".parse().unwrap();
        t.fail_next(1);
        assert!(matches!(
            t.send_datagram(Bytes::from_static(b"a"), dest),
            Err(TransportError::Unreachable(_))
        ));
        t.send_datagram(Bytes::from_static(b"b"), dest).unwrap();
        assert_eq!(t.sent_count(), 1);
        assert_eq!(t.take()[0].1, &b"b"[..]);
        assert_eq!(t.sent_count(), 0);
    }
}
