//! Execution of a single discovery request.
//!
//! Runs the network scan, the port scan and endpoint discovery of a request in
//! sequence and publishes the merged registrations as one result batch.

use chrono::Utc;
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uascout_core::{ApplicationRegistrationModel, DiscoveryResultInfoModel, DiscoveryResultModel};
use uascout_net::{
    HostProbe, NetworkInfo, NetworkScanner, PortProbe, PortScanner, ScanOutcome,
    CONTAINER_HOST_NAME,
};
use url::Url;

use crate::error::{DiscoveryError, Result};
use crate::handlers::{DiscoveryResultHandler, DiscoveryTarget, EndpointDiscovery};
use crate::progress::{NetworkScanReport, PortScanReport, ProgressReporter};
use crate::request::DiscoveryRequest;

/// Port assumed for discovery urls that do not name one
pub const DEFAULT_OPCUA_PORT: u16 = 4840;

const OPCUA_TCP_SCHEME: &str = "opc.tcp";

/// Identity a discovery runs on behalf of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscovererIdentity {
    pub discoverer_id: String,
    pub site_id: Option<String>,
}

impl DiscovererIdentity {
    pub fn new(discoverer_id: impl Into<String>) -> Self {
        Self {
            discoverer_id: discoverer_id.into(),
            site_id: None,
        }
    }

    pub fn with_site(mut self, site_id: impl Into<String>) -> Self {
        self.site_id = Some(site_id.into());
        self
    }
}

/// Executes discovery requests.
pub(crate) struct DiscoveryRunner {
    pub(crate) identity: DiscovererIdentity,
    pub(crate) network: Arc<dyn NetworkInfo>,
    pub(crate) endpoints: Arc<dyn EndpointDiscovery>,
    pub(crate) results: Arc<dyn DiscoveryResultHandler>,
    pub(crate) host_probe: Arc<dyn HostProbe>,
    pub(crate) port_probe: Arc<dyn PortProbe>,
    pub(crate) progress_interval: Duration,
}

impl DiscoveryRunner {
    /// Runs a request to completion.
    ///
    /// Returns the number of published endpoint records, or `Cancelled` when
    /// the request token fired before results were published.
    pub(crate) async fn execute(
        &self,
        request: &DiscoveryRequest,
        reporter: &ProgressReporter,
    ) -> Result<ScanOutcome<usize>> {
        let token = request.token();
        let config = request.configuration();

        let mut targets = self.resolve_discovery_urls(config.discovery_urls()).await;
        if token.is_cancelled() {
            return Ok(ScanOutcome::Cancelled);
        }

        if request.mode().is_scanning() {
            let ScanOutcome::Completed(addresses) = self.scan_network(request, reporter).await
            else {
                return Ok(ScanOutcome::Cancelled);
            };
            let ScanOutcome::Completed(open) = self.scan_ports(request, addresses, reporter).await
            else {
                return Ok(ScanOutcome::Cancelled);
            };
            let ScanOutcome::Completed(()) = self.add_scan_targets(&mut targets, open, token).await
            else {
                return Ok(ScanOutcome::Cancelled);
            };
        }

        let ScanOutcome::Completed(registrations) = self
            .discover_servers(request, &targets, reporter)
            .await
        else {
            return Ok(ScanOutcome::Cancelled);
        };

        let published = self.publish(request, registrations).await?;
        Ok(ScanOutcome::Completed(published))
    }

    /// Resolves declared discovery urls to targets. Urls that fail to parse
    /// or resolve are skipped.
    async fn resolve_discovery_urls(&self, urls: &[String]) -> Vec<DiscoveryTarget> {
        let mut targets: Vec<DiscoveryTarget> = Vec::new();
        for raw in urls {
            let url = match Url::parse(raw.trim()) {
                Ok(url) => url,
                Err(e) => {
                    warn!(url = %raw, error = %e, "Skipping invalid discovery url");
                    continue;
                }
            };
            let Some(host) = url.host_str() else {
                warn!(url = %raw, "Skipping discovery url without host");
                continue;
            };
            let host = host.trim_start_matches('[').trim_end_matches(']').to_string();
            let port = url.port().unwrap_or(DEFAULT_OPCUA_PORT);

            match self.resolve_host(&host).await {
                Some(ip) => {
                    if !targets.iter().any(|t| t.url == url) {
                        targets.push(DiscoveryTarget {
                            url,
                            address: SocketAddr::new(ip, port),
                        });
                    }
                }
                None => warn!(url = %raw, "Skipping discovery url, host did not resolve"),
            }
        }
        targets
    }

    /// Resolves a host, preferring IPv4 addresses. Inside a container
    /// `localhost` means the container host first.
    async fn resolve_host(&self, host: &str) -> Option<IpAddr> {
        let mut names = vec![host];
        if host.eq_ignore_ascii_case("localhost") && self.network.is_container() {
            names.insert(0, CONTAINER_HOST_NAME);
        }
        for name in names {
            match self.network.resolve(name).await {
                Ok(addrs) => {
                    if let Some(ip) = addrs.iter().find(|a| a.is_ipv4()).or(addrs.first()) {
                        return Some(*ip);
                    }
                }
                Err(e) => debug!(host = name, error = %e, "Failed to resolve host"),
            }
        }
        None
    }

    async fn scan_network(
        &self,
        request: &DiscoveryRequest,
        reporter: &ProgressReporter,
    ) -> ScanOutcome<Vec<IpAddr>> {
        let scanner = NetworkScanner::new(
            self.host_probe.clone(),
            request.max_network_probes(),
            request.network_probe_timeout(),
        )
        .with_progress_interval(self.progress_interval);

        reporter.network_scan_started(request.max_network_probes(), request.total_addresses());
        let outcome = scanner
            .scan(
                request.address_ranges(),
                &NetworkScanReport(reporter),
                request.token(),
            )
            .await;

        match outcome {
            ScanOutcome::Completed(mut addresses) => {
                reporter.network_scan_finished(request.total_addresses(), addresses.len());

                let mut extra = vec![IpAddr::V4(Ipv4Addr::LOCALHOST)];
                extra.extend(request.container_host().map(IpAddr::V4));
                for addr in extra {
                    if !addresses.contains(&addr) {
                        addresses.push(addr);
                    }
                }
                ScanOutcome::Completed(addresses)
            }
            ScanOutcome::Cancelled => ScanOutcome::Cancelled,
        }
    }

    async fn scan_ports(
        &self,
        request: &DiscoveryRequest,
        addresses: Vec<IpAddr>,
        reporter: &ProgressReporter,
    ) -> ScanOutcome<Vec<SocketAddr>> {
        let scanner = PortScanner::new(
            self.port_probe.clone(),
            request.max_port_probes(),
            request.min_port_probes_percent(),
            request.port_probe_timeout(),
        )
        .with_progress_interval(self.progress_interval);

        let total = addresses.len() as u64 * request.total_ports();
        reporter.port_scan_started(request.max_port_probes(), total);
        let outcome = scanner
            .scan(
                &addresses,
                request.port_ranges(),
                &PortScanReport(reporter),
                request.token(),
            )
            .await;

        if let ScanOutcome::Completed(open) = &outcome {
            reporter.port_scan_finished(total, open.len());
        }
        outcome
    }

    /// Adds an `opc.tcp` url for every open port, named after the reverse
    /// DNS name of the address when it has one.
    async fn add_scan_targets(
        &self,
        targets: &mut Vec<DiscoveryTarget>,
        open: Vec<SocketAddr>,
        token: &CancellationToken,
    ) -> ScanOutcome<()> {
        for address in open {
            let name = tokio::select! {
                biased;
                _ = token.cancelled() => return ScanOutcome::Cancelled,
                name = self.network.reverse_lookup(address.ip()) => name,
            };
            let host = match name {
                Some(name) => name,
                None => match address.ip() {
                    IpAddr::V4(ip) => ip.to_string(),
                    IpAddr::V6(ip) => format!("[{}]", ip),
                },
            };
            let raw = format!("{}://{}:{}", OPCUA_TCP_SCHEME, host, address.port());
            match Url::parse(&raw) {
                Ok(url) => {
                    if !targets.iter().any(|t| t.url == url) {
                        targets.push(DiscoveryTarget { url, address });
                    }
                }
                Err(e) => warn!(url = %raw, error = %e, "Skipping unusable scan result"),
            }
        }
        ScanOutcome::Completed(())
    }

    /// Asks every target for its endpoints and merges the registrations.
    async fn discover_servers(
        &self,
        request: &DiscoveryRequest,
        targets: &[DiscoveryTarget],
        reporter: &ProgressReporter,
    ) -> ScanOutcome<Vec<ApplicationRegistrationModel>> {
        let token = request.token();
        let locales = request.configuration().locales();
        let mut registrations: Vec<ApplicationRegistrationModel> = Vec::new();

        reporter.server_discovery_started(targets.len());
        for (index, target) in targets.iter().enumerate() {
            if token.is_cancelled() {
                return ScanOutcome::Cancelled;
            }
            let url = target.url.as_str();
            reporter.endpoints_discovery_started(index, targets.len(), url);

            let found = tokio::select! {
                biased;
                _ = token.cancelled() => return ScanOutcome::Cancelled,
                found = self.endpoints.find_endpoints(target, locales, token) => found,
            };

            match found {
                Ok(endpoints) => {
                    let mut discovered = 0;
                    let host = target.address.ip().to_string();
                    for endpoint in &endpoints {
                        let Some(registration) = ApplicationRegistrationModel::from_discovered(
                            endpoint,
                            url,
                            &host,
                            self.identity.site_id.as_deref(),
                            &self.identity.discoverer_id,
                        ) else {
                            debug!(url, "Skipping endpoint without application uri");
                            continue;
                        };
                        merge_registration(&mut registrations, registration);
                        discovered += 1;
                    }
                    debug!(url, endpoints = discovered, "Endpoints discovered");
                    reporter.endpoints_discovery_finished(
                        index,
                        targets.len(),
                        url,
                        discovered,
                        None,
                    );
                }
                Err(e) => {
                    warn!(url, error = %format!("{:#}", e), "Endpoint discovery failed");
                    reporter.endpoints_discovery_finished(
                        index,
                        targets.len(),
                        url,
                        0,
                        Some(format!("{:#}", e)),
                    );
                }
            }
        }
        reporter.server_discovery_finished(targets.len(), registrations.len());
        ScanOutcome::Completed(registrations)
    }

    /// Hands the registrations plus the closing sentinel to the result
    /// handler. Returns the number of endpoint records.
    async fn publish(
        &self,
        request: &DiscoveryRequest,
        registrations: Vec<ApplicationRegistrationModel>,
    ) -> Result<usize> {
        let timestamp = Utc::now();
        let mut results = Vec::new();
        for registration in &registrations {
            for endpoint in &registration.endpoints {
                results.push(DiscoveryResultModel::record(
                    results.len() as u32,
                    timestamp,
                    registration.application.clone(),
                    endpoint.clone(),
                ));
            }
        }
        let records = results.len();

        let model = request.model();
        let mut diagnostics = BTreeMap::new();
        diagnostics.insert("applications".to_string(), registrations.len().to_string());
        diagnostics.insert("endpoints".to_string(), records.to_string());
        if request.mode().is_scanning() {
            diagnostics.insert("addresses".to_string(), request.total_addresses().to_string());
            diagnostics.insert("ports".to_string(), request.total_ports().to_string());
        }
        results.push(DiscoveryResultModel::sentinel(
            records as u32,
            timestamp,
            DiscoveryResultInfoModel {
                id: model.id.clone(),
                discovery: Some(request.mode()),
                discovery_config: model.configuration.clone(),
                context: model.context.clone(),
                diagnostics,
            },
        ));

        self.results
            .report_results(results, request.token())
            .await
            .map_err(|e| DiscoveryError::Publish(format!("{:#}", e)))?;

        info!(
            request_id = request.id().unwrap_or_default(),
            mode = %request.mode(),
            applications = registrations.len(),
            endpoints = records,
            "Discovery results published"
        );
        Ok(records)
    }
}

/// Merges a registration into the run's result set.
///
/// Registrations of the same application are combined; the set keeps the
/// order applications were first seen in.
fn merge_registration(
    registrations: &mut Vec<ApplicationRegistrationModel>,
    registration: ApplicationRegistrationModel,
) {
    match registrations
        .iter_mut()
        .find(|r| r.application.application_id == registration.application.application_id)
    {
        Some(existing) => existing.merge(registration),
        None => registrations.push(registration),
    }
}

