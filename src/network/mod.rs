//! Network subsystem for UDP audio transport

pub mod udp;

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use crate::constants::DEFAULT_UDP_PORT;
use crate::error::NetworkError;

pub use udp::{Received, TransportStats, UdpTransport};

/// Peer address of a relay session; fixed for the session's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint {
    ip: IpAddr,
    port: u16,
}

impl Endpoint {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip(), addr.port())
    }
}

/// Accepts `ip:port`, `[v6]:port`, or a bare IP (default port)
impl FromStr for Endpoint {
    type Err = NetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(addr) = s.parse::<SocketAddr>() {
            return Ok(addr.into());
        }
        s.parse::<IpAddr>()
            .map(|ip| Self::new(ip, DEFAULT_UDP_PORT))
            .map_err(|_| NetworkError::InvalidEndpoint(s.to_string()))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.socket_addr())
    }
}
