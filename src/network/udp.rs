//! UDP datagram transport
//!
//! Connectionless and best-effort: no retransmission, no reordering, no
//! reconnection. A failed send is reported to the caller and the session
//! carries on. Receives block for at most the configured timeout and then
//! return [`Received::Timeout`] so the caller can poll its stop signal.

use socket2::{Domain, Protocol, Socket, Type};
use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::error::NetworkError;
use crate::network::Endpoint;

/// Result of one receive call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Received {
    /// `len` bytes were written to the buffer
    Datagram { len: usize, from: SocketAddr },
    /// Nothing arrived within the timeout
    Timeout,
}

/// UDP socket with per-call failure semantics
pub struct UdpTransport {
    socket: UdpSocket,
    local_addr: SocketAddr,
    stats: Counters,
}

#[derive(Default)]
struct Counters {
    packets_sent: AtomicU64,
    bytes_sent: AtomicU64,
    send_failures: AtomicU64,
    packets_received: AtomicU64,
    bytes_received: AtomicU64,
}

impl UdpTransport {
    /// Bind a socket on `addr` with the given receive timeout
    ///
    /// Bind failure is fatal to the session that asked for it.
    pub fn bind(addr: SocketAddr, receive_timeout: Duration) -> Result<Self, NetworkError> {
        let bind_failed = |e: std::io::Error| NetworkError::BindFailed {
            addr: addr.to_string(),
            reason: e.to_string(),
        };

        let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))
            .map_err(|e| NetworkError::SocketSetup(e.to_string()))?;

        socket.bind(&addr.into()).map_err(bind_failed)?;

        socket
            .set_read_timeout(Some(receive_timeout))
            .map_err(|e| NetworkError::SocketSetup(e.to_string()))?;

        let socket: UdpSocket = socket.into();
        let local_addr = socket
            .local_addr()
            .map_err(|e| NetworkError::SocketSetup(e.to_string()))?;

        tracing::debug!("UDP socket bound on {}", local_addr);

        Ok(Self {
            socket,
            local_addr,
            stats: Counters::default(),
        })
    }

    /// Socket for sending to `peer` from an ephemeral local port
    pub fn for_peer(peer: &Endpoint) -> Result<Self, NetworkError> {
        let wildcard = match peer.ip() {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        Self::bind(SocketAddr::new(wildcard, 0), Duration::from_secs(1))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Fire-and-forget send of one datagram
    pub fn send(&self, endpoint: &Endpoint, payload: &[u8]) -> Result<(), NetworkError> {
        match self.socket.send_to(payload, endpoint.socket_addr()) {
            Ok(sent) => {
                if sent < payload.len() {
                    tracing::warn!("Partial send: {}/{}", sent, payload.len());
                }
                self.stats.packets_sent.fetch_add(1, Ordering::Relaxed);
                self.stats.bytes_sent.fetch_add(sent as u64, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.stats.send_failures.fetch_add(1, Ordering::Relaxed);
                Err(NetworkError::SendFailed(format!("{}: {}", endpoint, e)))
            }
        }
    }

    /// Block up to the receive timeout for one datagram
    ///
    /// Datagrams larger than `buf` are truncated by the OS; callers that
    /// validate length should pass a buffer one byte larger than the largest
    /// valid payload.
    pub fn receive(&self, buf: &mut [u8]) -> Result<Received, NetworkError> {
        match self.socket.recv_from(buf) {
            Ok((len, from)) => {
                self.stats.packets_received.fetch_add(1, Ordering::Relaxed);
                self.stats.bytes_received.fetch_add(len as u64, Ordering::Relaxed);
                Ok(Received::Datagram { len, from })
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted) => {
                Ok(Received::Timeout)
            }
            Err(e) => Err(NetworkError::ReceiveFailed(e.to_string())),
        }
    }

    pub fn stats(&self) -> TransportStats {
        TransportStats {
            packets_sent: self.stats.packets_sent.load(Ordering::Relaxed),
            bytes_sent: self.stats.bytes_sent.load(Ordering::Relaxed),
            send_failures: self.stats.send_failures.load(Ordering::Relaxed),
            packets_received: self.stats.packets_received.load(Ordering::Relaxed),
            bytes_received: self.stats.bytes_received.load(Ordering::Relaxed),
        }
    }
}

/// Transport statistics snapshot
#[derive(Debug, Clone, Default)]
pub struct TransportStats {
    pub packets_sent: u64,
    pub bytes_sent: u64,
    pub send_failures: u64,
    pub packets_received: u64,
    pub bytes_received: u64,
}
