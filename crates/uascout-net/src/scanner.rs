//! Network and port scanners built on the probe pool.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::address::AddressRange;
use crate::pool::{run_probes, ProbePoolConfig, ScanObserver, ScanOutcome};
use crate::port::PortRange;
use crate::probe::{HostProbe, PortProbe};

/// Finds responsive hosts in a set of address ranges.
pub struct NetworkScanner {
    probe: Arc<dyn HostProbe>,
    config: ProbePoolConfig,
}

impl NetworkScanner {
    pub fn new(probe: Arc<dyn HostProbe>, max_probes: usize, timeout: Duration) -> Self {
        Self {
            probe,
            config: ProbePoolConfig::fixed(max_probes, timeout),
        }
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.config = self.config.with_progress_interval(interval);
        self
    }

    /// Probes every address of `ranges` and returns those that responded.
    pub async fn scan(
        &self,
        ranges: &[AddressRange],
        observer: &dyn ScanObserver<IpAddr>,
        token: &CancellationToken,
    ) -> ScanOutcome<Vec<IpAddr>> {
        let total = AddressRange::total(ranges);
        info!(
            ranges = %AddressRange::format(ranges),
            total,
            max_probes = self.config.max_probes,
            "Network scan started"
        );

        let targets = ranges.iter().flat_map(AddressRange::iter).map(IpAddr::V4);
        let probe = self.probe.clone();
        let outcome = run_probes(
            targets,
            total,
            &self.config,
            move |addr| {
                let probe = probe.clone();
                async move { probe.probe(addr).await }
            },
            observer,
            token,
        )
        .await;

        match &outcome {
            ScanOutcome::Completed(found) => {
                info!(found = found.len(), total, "Network scan finished")
            }
            ScanOutcome::Cancelled => debug!("Network scan cancelled"),
        }
        outcome
    }
}

/// Finds open TCP ports on a set of hosts.
pub struct PortScanner {
    probe: Arc<dyn PortProbe>,
    config: ProbePoolConfig,
}

impl PortScanner {
    /// Creates a scanner that keeps at most `max_probes` connects in flight
    /// and adapts down to `min_percent` of that when probes time out.
    pub fn new(
        probe: Arc<dyn PortProbe>,
        max_probes: usize,
        min_percent: u32,
        timeout: Duration,
    ) -> Self {
        Self {
            probe,
            config: ProbePoolConfig::adaptive(max_probes, min_percent, timeout),
        }
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.config = self.config.with_progress_interval(interval);
        self
    }

    /// Probes every port of `ports` on every address and returns the open
    /// socket addresses.
    pub async fn scan(
        &self,
        addresses: &[IpAddr],
        ports: &[PortRange],
        observer: &dyn ScanObserver<SocketAddr>,
        token: &CancellationToken,
    ) -> ScanOutcome<Vec<SocketAddr>> {
        let total = addresses.len() as u64 * PortRange::total(ports);
        info!(
            addresses = addresses.len(),
            ports = %PortRange::format(ports),
            total,
            "Port scan started"
        );

        let targets = addresses.iter().flat_map(move |&addr| {
            ports
                .iter()
                .flat_map(PortRange::iter)
                .map(move |port| SocketAddr::new(addr, port))
        });
        let probe = self.probe.clone();
        let outcome = run_probes(
            targets,
            total,
            &self.config,
            move |addr| {
                let probe = probe.clone();
                async move { probe.probe(addr).await }
            },
            observer,
            token,
        )
        .await;

        match &outcome {
            ScanOutcome::Completed(found) => info!(open = found.len(), total, "Port scan finished"),
            ScanOutcome::Cancelled => debug!("Port scan cancelled"),
        }
        outcome
    }
}
