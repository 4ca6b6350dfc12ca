//! Local network environment: interfaces, gateways, container detection and
//! name resolution.

use anyhow::{Context, Result};
use async_trait::async_trait;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use pnet::datalink;
use pnet::ipnetwork::IpNetwork;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use tracing::{debug, warn};

/// Host name of the container host as seen from inside a container
pub const CONTAINER_HOST_NAME: &str = "host.docker.internal";

/// IPv4 configuration of a local interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetInterface {
    pub name: String,
    pub address: Ipv4Addr,
    pub prefix_len: u8,
    /// Default gateway reachable through this interface
    pub gateway: Option<Ipv4Addr>,
}

/// Access to the local network environment.
#[async_trait]
pub trait NetworkInfo: Send + Sync {
    /// Returns the active, non loopback IPv4 interfaces.
    fn interfaces(&self) -> Vec<NetInterface>;

    /// Returns true when running inside a container.
    fn is_container(&self) -> bool;

    /// Resolves a host name or address literal.
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>>;

    /// Resolves the host name of an address, if it has one.
    async fn reverse_lookup(&self, addr: IpAddr) -> Option<String>;
}

/// `NetworkInfo` backed by the operating system.
pub struct SystemNetwork {
    resolver: TokioAsyncResolver,
    container: bool,
}

impl SystemNetwork {
    /// Creates a system network using the system resolver configuration,
    /// or public defaults when it cannot be read.
    pub fn new() -> Self {
        let resolver = TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|e| {
            warn!(error = %e, "Failed to read system resolver configuration, using defaults");
            TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
        });
        let container = detect_container();
        debug!(container, "System network created");
        Self {
            resolver,
            container,
        }
    }
}

impl Default for SystemNetwork {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NetworkInfo for SystemNetwork {
    fn interfaces(&self) -> Vec<NetInterface> {
        let gateways = std::fs::read_to_string("/proc/net/route")
            .map(|table| parse_route_table(&table))
            .unwrap_or_default();

        datalink::interfaces()
            .into_iter()
            .filter(|i| i.is_up() && !i.is_loopback())
            .flat_map(|i| {
                let gateway = gateways.get(&i.name).copied();
                let name = i.name.clone();
                i.ips
                    .into_iter()
                    .filter_map(move |ip| match ip {
                        IpNetwork::V4(net) => Some(NetInterface {
                            name: name.clone(),
                            address: net.ip(),
                            prefix_len: net.prefix(),
                            gateway,
                        }),
                        IpNetwork::V6(_) => None,
                    })
            })
            .collect()
    }

    fn is_container(&self) -> bool {
        self.container
    }

    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>> {
        if let Ok(addr) = host.parse::<IpAddr>() {
            return Ok(vec![addr]);
        }
        let lookup = self
            .resolver
            .lookup_ip(host)
            .await
            .with_context(|| format!("Failed to resolve {}", host))?;
        Ok(lookup.iter().collect())
    }

    async fn reverse_lookup(&self, addr: IpAddr) -> Option<String> {
        let lookup = self.resolver.reverse_lookup(addr).await.ok()?;
        lookup
            .iter()
            .next()
            .map(|name| name.to_string().trim_end_matches('.').to_string())
    }
}

/// Reads the default gateway per interface from `/proc/net/route` content.
pub fn parse_route_table(table: &str) -> HashMap<String, Ipv4Addr> {
    let mut gateways = HashMap::new();
    for line in table.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 3 {
            continue;
        }
        let (iface, destination, gateway) = (fields[0], fields[1], fields[2]);
        if destination != "00000000" {
            continue;
        }
        let Ok(raw) = u32::from_str_radix(gateway, 16) else {
            continue;
        };
        if raw == 0 {
            continue;
        }
        gateways
            .entry(iface.to_string())
            .or_insert_with(|| Ipv4Addr::from(raw.to_ne_bytes()));
    }
    gateways
}

fn detect_container() -> bool {
    if Path::new("/.dockerenv").exists() {
        return true;
    }
    std::fs::read_to_string("/proc/1/cgroup")
        .map(|cgroup| {
            cgroup.contains("docker") || cgroup.contains("kubepods") || cgroup.contains("containerd")
        })
        .unwrap_or(false)
}
