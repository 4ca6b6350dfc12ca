//! Single host and port probes.
//!
//! Probes do not apply timeouts themselves; the probe pool bounds every probe
//! with the configured per-probe timeout.

use async_trait::async_trait;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use surge_ping::SurgeError;
use tokio::net::TcpStream;
use tracing::{trace, warn};

/// Port a TCP ping connects to when ICMP is unavailable
pub const TCP_PING_PORT: u16 = 4840;

const PING_PAYLOAD: [u8; 56] = [0; 56];

/// Outcome of one probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// Host responded or port accepted the connection
    Open,
    /// Target answered negatively or is unreachable
    Closed,
    /// No answer within the probe timeout
    TimedOut,
}

impl ProbeResult {
    pub fn is_open(&self) -> bool {
        matches!(self, ProbeResult::Open)
    }
}

/// Checks whether a host is alive.
#[async_trait]
pub trait HostProbe: Send + Sync {
    async fn probe(&self, addr: IpAddr) -> ProbeResult;
}

/// Checks whether a TCP port accepts connections.
#[async_trait]
pub trait PortProbe: Send + Sync {
    async fn probe(&self, addr: SocketAddr) -> ProbeResult;
}

/// ICMP echo probe.
///
/// Falls back to [`TcpPingProbe`] once the process is found to lack the
/// permission to open ICMP sockets.
pub struct IcmpProbe {
    icmp_available: AtomicBool,
    fallback: TcpPingProbe,
}

impl IcmpProbe {
    pub fn new() -> Self {
        Self {
            icmp_available: AtomicBool::new(true),
            fallback: TcpPingProbe::default(),
        }
    }
}

impl Default for IcmpProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HostProbe for IcmpProbe {
    async fn probe(&self, addr: IpAddr) -> ProbeResult {
        if self.icmp_available.load(Ordering::Relaxed) {
            match surge_ping::ping(addr, &PING_PAYLOAD).await {
                Ok(_) => return ProbeResult::Open,
                Err(SurgeError::IOError(e)) if e.kind() == io::ErrorKind::PermissionDenied => {
                    if self.icmp_available.swap(false, Ordering::Relaxed) {
                        warn!(error = %e, "ICMP not permitted, falling back to TCP ping");
                    }
                }
                Err(SurgeError::Timeout { .. }) => return ProbeResult::TimedOut,
                Err(e) => {
                    trace!(address = %addr, error = %e, "Ping failed");
                    return ProbeResult::Closed;
                }
            }
        }
        self.fallback.probe(addr).await
    }
}

/// Treats a host as alive if a TCP connect gets any answer, accepted or
/// refused.
#[derive(Debug, Clone)]
pub struct TcpPingProbe {
    port: u16,
}

impl TcpPingProbe {
    pub fn new(port: u16) -> Self {
        Self { port }
    }
}

impl Default for TcpPingProbe {
    fn default() -> Self {
        Self::new(TCP_PING_PORT)
    }
}

#[async_trait]
impl HostProbe for TcpPingProbe {
    async fn probe(&self, addr: IpAddr) -> ProbeResult {
        match TcpStream::connect(SocketAddr::new(addr, self.port)).await {
            Ok(_) => ProbeResult::Open,
            Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => ProbeResult::Open,
            Err(_) => ProbeResult::Closed,
        }
    }
}

/// TCP connect port probe.
#[derive(Debug, Clone, Default)]
pub struct TcpConnectProbe;

#[async_trait]
impl PortProbe for TcpConnectProbe {
    async fn probe(&self, addr: SocketAddr) -> ProbeResult {
        match TcpStream::connect(addr).await {
            Ok(_) => ProbeResult::Open,
            Err(e) => {
                trace!(address = %addr, error = %e, "Port closed");
                ProbeResult::Closed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_connect_probe_finds_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        assert_eq!(TcpConnectProbe.probe(addr).await, ProbeResult::Open);

        drop(listener);
        assert_eq!(TcpConnectProbe.probe(addr).await, ProbeResult::Closed);
    }

    #[tokio::test]
    async fn test_tcp_ping_counts_refused_as_alive() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let probe = TcpPingProbe::new(port);
        assert!(probe.probe("127.0.0.1".parse().unwrap()).await.is_open());
    }
}
