//! # uascout net
//!
//! Network primitives of the discovery engine:
//!
//! - **Ranges**: IPv4 address ranges and TCP port ranges, parsed from and
//!   formatted to their compact string forms
//! - **Environment**: local interfaces, gateways, container detection and DNS
//! - **Probes**: ICMP / TCP host probes and TCP connect port probes
//! - **Scanners**: bounded, cancellable network and port scans

pub mod address;
pub mod interfaces;
pub mod pool;
pub mod port;
pub mod probe;
pub mod scanner;

pub use address::AddressRange;
pub use interfaces::{NetInterface, NetworkInfo, SystemNetwork, CONTAINER_HOST_NAME};
pub use pool::{ProbePoolConfig, ScanCounters, ScanObserver, ScanOutcome};
pub use port::PortRange;
pub use probe::{HostProbe, IcmpProbe, PortProbe, ProbeResult, TcpConnectProbe, TcpPingProbe};
pub use scanner::{NetworkScanner, PortScanner};
