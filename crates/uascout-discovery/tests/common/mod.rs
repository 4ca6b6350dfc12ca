//! Fakes and helpers shared by the discovery integration tests

#![allow(dead_code)]

use async_channel::Receiver;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uascout_core::{
    ApplicationDescriptionModel, DiscoveredEndpointModel, DiscoveryResultModel,
    EndpointDescriptionModel, SecurityMode,
};
use uascout_discovery::{
    ChannelProgress, DiscovererIdentity, DiscoveryProgressModel, DiscoveryProgressType,
    DiscoveryResultHandler, DiscoveryServices, DiscoveryServicesConfig, DiscoveryTarget,
    EndpointDiscovery,
};
use uascout_net::{HostProbe, NetInterface, NetworkInfo, PortProbe, ProbeResult};

pub const DISCOVERER_ID: &str = "gateway1_module_discovery";

/// Network with a fixed host table and no interfaces.
#[derive(Default)]
pub struct FakeNetwork {
    hosts: HashMap<String, IpAddr>,
    stalled_reverse_lookups: bool,
}

impl FakeNetwork {
    pub fn with_host(mut self, name: &str, ip: &str) -> Self {
        self.hosts
            .insert(name.to_string(), ip.parse().expect("valid ip"));
        self
    }

    /// Reverse lookups never answer.
    pub fn with_stalled_reverse_lookups(mut self) -> Self {
        self.stalled_reverse_lookups = true;
        self
    }
}

#[async_trait]
impl NetworkInfo for FakeNetwork {
    fn interfaces(&self) -> Vec<NetInterface> {
        Vec::new()
    }

    fn is_container(&self) -> bool {
        false
    }

    async fn resolve(&self, host: &str) -> anyhow::Result<Vec<IpAddr>> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(vec![ip]);
        }
        self.hosts
            .get(host)
            .map(|ip| vec![*ip])
            .ok_or_else(|| anyhow::anyhow!("unknown host {}", host))
    }

    async fn reverse_lookup(&self, _addr: IpAddr) -> Option<String> {
        if self.stalled_reverse_lookups {
            std::future::pending::<()>().await;
        }
        None
    }
}

/// Host and port probe that never finds anything.
pub struct SilentProbe;

#[async_trait]
impl HostProbe for SilentProbe {
    async fn probe(&self, _addr: IpAddr) -> ProbeResult {
        ProbeResult::Closed
    }
}

#[async_trait]
impl PortProbe for SilentProbe {
    async fn probe(&self, _addr: SocketAddr) -> ProbeResult {
        ProbeResult::Closed
    }
}

/// Hosts that answer and sockets that accept, recording every socket tried.
#[derive(Default)]
pub struct ReachableTargets {
    sockets: Vec<SocketAddr>,
    pub tried: Mutex<Vec<SocketAddr>>,
}

impl ReachableTargets {
    pub fn with_open(mut self, socket: &str) -> Self {
        self.sockets.push(socket.parse().expect("valid socket address"));
        self
    }

    pub fn tried(&self) -> Vec<SocketAddr> {
        self.tried.lock().clone()
    }
}

#[async_trait]
impl HostProbe for ReachableTargets {
    async fn probe(&self, addr: IpAddr) -> ProbeResult {
        if self.sockets.iter().any(|s| s.ip() == addr) {
            ProbeResult::Open
        } else {
            ProbeResult::Closed
        }
    }
}

#[async_trait]
impl PortProbe for ReachableTargets {
    async fn probe(&self, addr: SocketAddr) -> ProbeResult {
        self.tried.lock().push(addr);
        if self.sockets.contains(&addr) {
            ProbeResult::Open
        } else {
            ProbeResult::Closed
        }
    }
}

/// One endpoint discovery call as observed by [`FakeEndpoints`].
#[derive(Debug, Clone)]
pub struct Call {
    pub url: String,
    pub started: Instant,
    pub finished: Instant,
}

/// Endpoint discovery answering from a table keyed by discovery url.
///
/// With a gate, every call waits for a permit before answering.
#[derive(Default)]
pub struct FakeEndpoints {
    answers: HashMap<String, Vec<DiscoveredEndpointModel>>,
    gate: Option<Arc<Semaphore>>,
    delay: Duration,
    pub calls: Mutex<Vec<Call>>,
}

impl FakeEndpoints {
    pub fn with_server(mut self, url: &str, endpoints: Vec<DiscoveredEndpointModel>) -> Self {
        self.answers.insert(url.to_string(), endpoints);
        self
    }

    pub fn with_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl EndpointDiscovery for FakeEndpoints {
    async fn find_endpoints(
        &self,
        target: &DiscoveryTarget,
        _locales: &[String],
        token: &CancellationToken,
    ) -> anyhow::Result<Vec<DiscoveredEndpointModel>> {
        let started = Instant::now();
        if let Some(gate) = &self.gate {
            tokio::select! {
                _ = token.cancelled() => anyhow::bail!("cancelled"),
                permit = gate.acquire() => permit?.forget(),
            }
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let url = target.url.as_str().to_string();
        self.calls.lock().push(Call {
            url: url.clone(),
            started,
            finished: Instant::now(),
        });
        self.answers
            .get(&url)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no server at {}", url))
    }
}

/// Result handler keeping every published batch.
#[derive(Default)]
pub struct CollectingResults {
    batches: Mutex<Vec<Vec<DiscoveryResultModel>>>,
}

impl CollectingResults {
    pub fn batches(&self) -> Vec<Vec<DiscoveryResultModel>> {
        self.batches.lock().clone()
    }
}

#[async_trait]
impl DiscoveryResultHandler for CollectingResults {
    async fn report_results(
        &self,
        results: Vec<DiscoveryResultModel>,
        _token: &CancellationToken,
    ) -> anyhow::Result<()> {
        self.batches.lock().push(results);
        Ok(())
    }
}

/// Builds an endpoint as a server would describe it.
pub fn endpoint(application_uri: &str, url: &str, mode: SecurityMode) -> DiscoveredEndpointModel {
    DiscoveredEndpointModel {
        description: EndpointDescriptionModel {
            endpoint_url: url.to_string(),
            server: ApplicationDescriptionModel {
                application_uri: application_uri.to_string(),
                application_name: Some("Test Server".to_string()),
                ..Default::default()
            },
            server_certificate: None,
            security_mode: mode,
            security_policy_uri: Some(
                "http://opcfoundation.org/UA/SecurityPolicy#Basic256Sha256".to_string(),
            ),
            security_level: Some(1),
            user_identity_tokens: Vec::new(),
        },
        accessible_endpoint_url: url.to_string(),
        capabilities: Default::default(),
    }
}

pub struct Harness {
    pub services: DiscoveryServices,
    pub endpoints: Arc<FakeEndpoints>,
    pub results: Arc<CollectingResults>,
    pub events: Receiver<DiscoveryProgressModel>,
}

/// Services settings used by the tests. The periodic scan is pushed out of
/// the way unless a test configures one.
pub fn test_config(queue_capacity: usize) -> DiscoveryServicesConfig {
    DiscoveryServicesConfig {
        initial_scan_delay: Duration::from_secs(20),
        queue_capacity,
        progress_interval: Duration::from_secs(3),
    }
}

/// Starts services over fakes that find no hosts or ports.
pub fn start(endpoints: FakeEndpoints, network: FakeNetwork, queue_capacity: usize) -> Harness {
    start_with_scanners(
        endpoints,
        network,
        test_config(queue_capacity),
        Arc::new(SilentProbe),
        Arc::new(SilentProbe),
    )
}

/// Starts services with the given settings and scan fakes.
pub fn start_with_scanners(
    endpoints: FakeEndpoints,
    network: FakeNetwork,
    config: DiscoveryServicesConfig,
    hosts: Arc<dyn HostProbe>,
    ports: Arc<dyn PortProbe>,
) -> Harness {
    let endpoints = Arc::new(endpoints);
    let results = Arc::new(CollectingResults::default());
    let (progress, events) = ChannelProgress::new(10_000);

    let services = DiscoveryServices::builder(DiscovererIdentity::new(DISCOVERER_ID))
        .config(config)
        .network(Arc::new(network))
        .endpoint_discovery(endpoints.clone())
        .result_handler(results.clone())
        .progress(Arc::new(progress))
        .host_probe(hosts)
        .port_probe(ports)
        .build()
        .expect("services build");

    Harness {
        services,
        endpoints,
        results,
        events,
    }
}

/// Waits for the terminal event of a request.
pub async fn wait_terminal(
    events: &Receiver<DiscoveryProgressModel>,
    request_id: &str,
) -> DiscoveryProgressModel {
    collect_until_terminal(events, request_id)
        .await
        .pop()
        .expect("terminal event")
}

/// Collects the events of a request up to and including its terminal event.
pub async fn collect_until_terminal(
    events: &Receiver<DiscoveryProgressModel>,
    request_id: &str,
) -> Vec<DiscoveryProgressModel> {
    let mut seen = Vec::new();
    tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            let event = events.recv().await.expect("progress channel open");
            if event.request_id.as_deref() != Some(request_id) {
                continue;
            }
            let terminal = event.event_type.is_terminal();
            seen.push(event);
            if terminal {
                break;
            }
        }
    })
    .await
    .expect("terminal event in time");
    seen
}

/// Drains every event currently buffered.
pub fn drain(events: &Receiver<DiscoveryProgressModel>) -> Vec<DiscoveryProgressModel> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

pub fn count(events: &[DiscoveryProgressModel], event_type: DiscoveryProgressType) -> usize {
    events.iter().filter(|e| e.event_type == event_type).count()
}
