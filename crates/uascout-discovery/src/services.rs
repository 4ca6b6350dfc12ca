//! Discovery services
//!
//! Accepts discovery requests from callers, runs them one at a time on a
//! background worker and resubmits the standing scan configuration on a
//! self-pacing timer.

use async_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uascout_core::config::DiscoverySettings;
use uascout_core::{
    DiscoveryCancelModel, DiscoveryConfigModel, DiscoveryMode, DiscoveryRequestModel,
    ServerRegistrationRequestModel,
};
use uascout_net::pool::{DEFAULT_PROGRESS_INTERVAL, MIN_PROGRESS_INTERVAL};
use uascout_net::{
    HostProbe, IcmpProbe, NetworkInfo, PortProbe, ScanOutcome, SystemNetwork, TcpConnectProbe,
    CONTAINER_HOST_NAME,
};

use crate::error::{DiscoveryError, Result};
use crate::handlers::{DiscoveryResultHandler, EndpointDiscovery};
use crate::metrics::{DiscoveryMetrics, DiscoveryStats};
use crate::progress::{DiscoveryProgress, LoggingProgress, ProgressReporter};
use crate::request::{DiscoveryRequest, ScanEnvironment};
use crate::runner::{DiscovererIdentity, DiscoveryRunner};
use crate::timer::RescanTimer;

/// Runtime settings of the discovery services
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryServicesConfig {
    /// Delay before the first periodic scan
    pub initial_scan_delay: Duration,
    /// Maximum number of queued requests
    pub queue_capacity: usize,
    /// Interval of scan progress reports, at least [`MIN_PROGRESS_INTERVAL`]
    pub progress_interval: Duration,
}

impl Default for DiscoveryServicesConfig {
    fn default() -> Self {
        Self {
            initial_scan_delay: Duration::from_secs(20),
            queue_capacity: 1000,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

impl From<&DiscoverySettings> for DiscoveryServicesConfig {
    fn from(settings: &DiscoverySettings) -> Self {
        Self {
            initial_scan_delay: settings.initial_scan_delay(),
            queue_capacity: settings.queue_capacity,
            progress_interval: settings.progress_interval(),
        }
    }
}

/// Builder for [`DiscoveryServices`]
pub struct DiscoveryServicesBuilder {
    identity: DiscovererIdentity,
    config: DiscoveryServicesConfig,
    network: Option<Arc<dyn NetworkInfo>>,
    endpoints: Option<Arc<dyn EndpointDiscovery>>,
    results: Option<Arc<dyn DiscoveryResultHandler>>,
    progress: Option<Arc<dyn DiscoveryProgress>>,
    host_probe: Option<Arc<dyn HostProbe>>,
    port_probe: Option<Arc<dyn PortProbe>>,
}

impl DiscoveryServicesBuilder {
    pub fn config(mut self, config: DiscoveryServicesConfig) -> Self {
        self.config = config;
        self
    }

    pub fn network(mut self, network: Arc<dyn NetworkInfo>) -> Self {
        self.network = Some(network);
        self
    }

    pub fn endpoint_discovery(mut self, endpoints: Arc<dyn EndpointDiscovery>) -> Self {
        self.endpoints = Some(endpoints);
        self
    }

    pub fn result_handler(mut self, results: Arc<dyn DiscoveryResultHandler>) -> Self {
        self.results = Some(results);
        self
    }

    pub fn progress(mut self, progress: Arc<dyn DiscoveryProgress>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn host_probe(mut self, probe: Arc<dyn HostProbe>) -> Self {
        self.host_probe = Some(probe);
        self
    }

    pub fn port_probe(mut self, probe: Arc<dyn PortProbe>) -> Self {
        self.port_probe = Some(probe);
        self
    }

    /// Starts the background worker and arms the first periodic scan.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint discovery or the result handler was
    /// not supplied.
    pub fn build(self) -> Result<DiscoveryServices> {
        let endpoints = self
            .endpoints
            .ok_or(DiscoveryError::MissingCollaborator("endpoint discovery"))?;
        let results = self
            .results
            .ok_or(DiscoveryError::MissingCollaborator("result handler"))?;
        let network = self
            .network
            .unwrap_or_else(|| Arc::new(SystemNetwork::new()));
        let progress = self.progress.unwrap_or_else(|| Arc::new(LoggingProgress));
        let host_probe = self
            .host_probe
            .unwrap_or_else(|| Arc::new(IcmpProbe::new()));
        let port_probe = self.port_probe.unwrap_or_else(|| Arc::new(TcpConnectProbe));
        let config = self.config;

        let (queue_tx, queue_rx) = async_channel::bounded(config.queue_capacity.max(1));
        let shutdown = CancellationToken::new();
        let standing = DiscoveryRequest::new(
            DiscoveryRequestModel::default(),
            &ScanEnvironment::default(),
        );

        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let weak = weak.clone();
            let callback: Arc<dyn Fn() + Send + Sync> = Arc::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.on_scan_scheduling();
                }
            });
            Inner {
                identity: self.identity.clone(),
                network: network.clone(),
                progress,
                config: config.clone(),
                queue: queue_tx,
                state: Mutex::new(State {
                    pending: Vec::new(),
                    standing,
                }),
                timer: RescanTimer::new(callback, shutdown.clone()),
                shutdown,
                container_host: OnceCell::new(),
                metrics: DiscoveryMetrics::new(),
            }
        });

        let runner = DiscoveryRunner {
            identity: self.identity,
            network,
            endpoints,
            results,
            host_probe,
            port_probe,
            progress_interval: config.progress_interval.max(MIN_PROGRESS_INTERVAL),
        };
        let worker = tokio::spawn(run_worker(inner.clone(), runner, queue_rx));
        inner.timer.arm(config.initial_scan_delay);

        info!(
            discoverer_id = %inner.identity.discoverer_id,
            queue_capacity = config.queue_capacity,
            initial_scan_delay_secs = config.initial_scan_delay.as_secs(),
            "Discovery services started"
        );

        Ok(DiscoveryServices {
            inner,
            worker: Mutex::new(Some(worker)),
        })
    }
}

/// Discovery request queue with a single background worker.
///
/// Requests run strictly one at a time in submission order. Every request
/// ends with exactly one terminal progress event: finished, cancelled or
/// error.
pub struct DiscoveryServices {
    inner: Arc<Inner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DiscoveryServices {
    pub fn builder(identity: DiscovererIdentity) -> DiscoveryServicesBuilder {
        DiscoveryServicesBuilder {
            identity,
            config: DiscoveryServicesConfig::default(),
            network: None,
            endpoints: None,
            results: None,
            progress: None,
            host_probe: None,
            port_probe: None,
        }
    }

    pub fn identity(&self) -> &DiscovererIdentity {
        &self.inner.identity
    }

    /// Queues a discovery request.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError::ResourceExhausted`] if the queue is full or
    /// the services are shut down. The rejection is reported as a progress
    /// error event first.
    pub async fn discover(&self, request: DiscoveryRequestModel) -> Result<()> {
        let env = self.inner.environment().await;
        self.inner
            .enqueue(Arc::new(DiscoveryRequest::new(request, &env)))
    }

    /// Queues discovery of a single server by its discovery url.
    pub async fn register(&self, request: ServerRegistrationRequestModel) -> Result<()> {
        self.discover(request.into()).await
    }

    /// Cancels every pending or running request with the given id and
    /// returns how many were cancelled.
    pub fn cancel(&self, request: &DiscoveryCancelModel) -> usize {
        let state = self.inner.state.lock();
        let mut cancelled = 0;
        for pending in state
            .pending
            .iter()
            .filter(|r| r.id() == Some(request.id.as_str()))
        {
            pending.cancel();
            cancelled += 1;
        }
        debug!(request_id = %request.id, cancelled, "Discovery cancel requested");
        cancelled
    }

    /// Replaces the standing scan configuration.
    ///
    /// Takes effect on the next timer firing. Arms the timer when no scan is
    /// scheduled.
    pub async fn configure(&self, mode: DiscoveryMode, configuration: DiscoveryConfigModel) {
        let env = self.inner.environment().await;
        let standing = DiscoveryRequest::new(DiscoveryRequestModel::new(mode, configuration), &env);
        info!(
            mode = %standing.mode(),
            addresses = standing.total_addresses(),
            ports = standing.total_ports(),
            "Standing discovery configured"
        );

        let scan_pending = {
            let mut state = self.inner.state.lock();
            state.standing = standing;
            state.pending.iter().any(|r| r.is_scan())
        };
        if !scan_pending {
            self.inner
                .timer
                .ensure_armed(self.inner.config.initial_scan_delay);
        }
    }

    /// Submits the standing scan configuration now.
    pub fn scan(&self) {
        self.inner.timer.arm(Duration::ZERO);
    }

    /// The standing scan request as resolved.
    pub fn standing_request(&self) -> DiscoveryRequestModel {
        self.inner.state.lock().standing.model().clone()
    }

    /// Number of requests queued or running.
    pub fn pending_count(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    pub fn stats(&self) -> DiscoveryStats {
        self.inner.metrics.stats()
    }

    /// Cancels all requests, stops the timer and waits for the worker.
    ///
    /// Calling it again has no effect.
    pub async fn shutdown(&self) {
        self.inner.stop();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "Discovery worker terminated abnormally");
                }
            }
            info!("Discovery services stopped");
        }
    }
}

impl Drop for DiscoveryServices {
    fn drop(&mut self) {
        if self.worker.lock().take().is_some() {
            warn!("Discovery services dropped while still running");
            self.inner.stop();
        }
    }
}

struct State {
    /// Requests queued or running, in submission order
    pending: Vec<Arc<DiscoveryRequest>>,
    /// Configuration resubmitted on every timer firing
    standing: DiscoveryRequest,
}

struct Inner {
    identity: DiscovererIdentity,
    network: Arc<dyn NetworkInfo>,
    progress: Arc<dyn DiscoveryProgress>,
    config: DiscoveryServicesConfig,
    queue: Sender<Arc<DiscoveryRequest>>,
    state: Mutex<State>,
    timer: RescanTimer,
    shutdown: CancellationToken,
    container_host: OnceCell<Option<Ipv4Addr>>,
    metrics: DiscoveryMetrics,
}

impl Inner {
    fn reporter(&self, request: &DiscoveryRequest) -> ProgressReporter {
        ProgressReporter::new(
            self.progress.clone(),
            &self.identity.discoverer_id,
            request.model(),
        )
    }

    async fn environment(&self) -> ScanEnvironment {
        let container_host = *self
            .container_host
            .get_or_init(|| async {
                if !self.network.is_container() {
                    return None;
                }
                match self.network.resolve(CONTAINER_HOST_NAME).await {
                    Ok(addrs) => addrs.into_iter().find_map(|addr| match addr {
                        IpAddr::V4(v4) => Some(v4),
                        IpAddr::V6(_) => None,
                    }),
                    Err(e) => {
                        debug!(error = %e, "Container host not resolvable");
                        None
                    }
                }
            })
            .await;

        ScanEnvironment {
            interfaces: self.network.interfaces(),
            container_host,
        }
    }

    fn enqueue(&self, request: Arc<DiscoveryRequest>) -> Result<()> {
        let reporter = self.reporter(&request);
        let ahead = {
            let mut state = self.state.lock();
            match self.queue.try_send(request.clone()) {
                Ok(()) => {
                    state.pending.push(request.clone());
                    state.pending.len() - 1
                }
                Err(e) => {
                    drop(state);
                    let reason = if e.is_closed() {
                        "request queue closed"
                    } else {
                        "request queue full"
                    };
                    warn!(
                        request_id = request.id().unwrap_or_default(),
                        reason, "Discovery request rejected"
                    );
                    self.metrics.record_rejected();
                    reporter.error(reason);
                    return Err(DiscoveryError::ResourceExhausted {
                        request_id: request.id().unwrap_or_default().to_string(),
                        reason: reason.to_string(),
                    });
                }
            }
        };

        self.metrics.record_submitted(ahead + 1);
        debug!(
            request_id = request.id().unwrap_or_default(),
            mode = %request.mode(),
            scan = request.is_scan(),
            ahead,
            "Discovery request queued"
        );
        if ahead > 0 {
            reporter.pending(ahead);
        }
        Ok(())
    }

    /// Timer callback: replaces pending scans with a fresh copy of the
    /// standing request.
    fn on_scan_scheduling(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        let request = {
            let state = self.state.lock();
            for pending in state.pending.iter().filter(|r| r.is_scan()) {
                pending.cancel();
            }
            if state.standing.mode() == DiscoveryMode::Off {
                debug!("Periodic discovery is off");
                return;
            }
            Arc::new(state.standing.renew().into_scan())
        };
        let idle = request.idle_time_between_scans();
        if let Err(e) = self.enqueue(request) {
            // A rejected scan never reaches the worker, which re-arms after
            // every scan. Retry after the idle time instead.
            warn!(error = %e, retry_secs = idle.as_secs(), "Failed to schedule periodic discovery");
            self.timer.arm(idle);
        }
    }

    /// Reports to every waiting request how many requests are ahead of it.
    fn report_queue_positions(&self, current: &Arc<DiscoveryRequest>) {
        let waiting: Vec<Arc<DiscoveryRequest>> = {
            let state = self.state.lock();
            state
                .pending
                .iter()
                .filter(|r| !Arc::ptr_eq(r, current))
                .cloned()
                .collect()
        };
        self.metrics.record_queue_depth(waiting.len() + 1);
        for (position, request) in waiting.iter().enumerate() {
            if !request.is_cancelled() {
                self.reporter(request).pending(position + 1);
            }
        }
    }

    async fn process(&self, runner: &DiscoveryRunner, request: &DiscoveryRequest) {
        let reporter = self.reporter(request);
        let request_id = request.id().unwrap_or_default();
        if request.is_cancelled() {
            debug!(request_id, "Discovery request cancelled before start");
            reporter.cancelled();
            self.metrics.record_cancelled();
            return;
        }

        debug!(request_id, mode = %request.mode(), scan = request.is_scan(), "Discovery run starting");
        reporter.started();
        let started = Instant::now();

        match runner.execute(request, &reporter).await {
            Ok(ScanOutcome::Completed(discovered)) => {
                debug!(
                    request_id,
                    discovered,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Discovery run completed"
                );
                reporter.finished(discovered);
                self.metrics.record_finished(started.elapsed());
            }
            Ok(ScanOutcome::Cancelled) => {
                debug!(request_id, "Discovery run cancelled");
                reporter.cancelled();
                self.metrics.record_cancelled();
            }
            Err(_) if request.is_cancelled() => {
                debug!(request_id, "Discovery run cancelled");
                reporter.cancelled();
                self.metrics.record_cancelled();
            }
            Err(e) => {
                error!(request_id, error = %e, "Discovery failed");
                reporter.error(&e.to_string());
                self.metrics.record_failed();
            }
        }
    }

    /// Removes a request from the pending list. Returns whether a scan
    /// request is still pending.
    fn remove_pending(&self, request: &Arc<DiscoveryRequest>) -> bool {
        let mut state = self.state.lock();
        state.pending.retain(|r| !Arc::ptr_eq(r, request));
        state.pending.iter().any(|r| r.is_scan())
    }

    fn stop(&self) {
        {
            let state = self.state.lock();
            for request in &state.pending {
                request.cancel();
            }
        }
        self.shutdown.cancel();
        self.timer.stop();
        self.queue.close();
    }
}

async fn run_worker(
    inner: Arc<Inner>,
    runner: DiscoveryRunner,
    queue: Receiver<Arc<DiscoveryRequest>>,
) {
    debug!("Discovery worker started");
    loop {
        let request = tokio::select! {
            biased;
            _ = inner.shutdown.cancelled() => break,
            next = queue.recv() => match next {
                Ok(request) => request,
                Err(_) => break,
            },
        };

        inner.report_queue_positions(&request);
        inner.process(&runner, &request).await;
        let scan_pending = inner.remove_pending(&request);

        if request.is_scan() && !scan_pending && !inner.shutdown.is_cancelled() {
            let idle = request.idle_time_between_scans();
            debug!(idle_secs = idle.as_secs(), "Next periodic discovery scheduled");
            inner.timer.arm(idle);
        }
    }

    while let Ok(request) = queue.try_recv() {
        request.cancel();
        inner.reporter(&request).cancelled();
        inner.metrics.record_cancelled();
        inner.remove_pending(&request);
    }
    debug!("Discovery worker stopped");
}
