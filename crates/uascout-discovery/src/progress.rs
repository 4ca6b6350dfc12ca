//! Discovery progress events and sinks.

use async_channel::{Receiver, Sender};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uascout_core::{DiscoveryRequestModel, OperationContextModel};
use uascout_net::{ScanCounters, ScanObserver};

/// Maximum number of progress events to buffer in a channel sink
pub const PROGRESS_CHANNEL_CAPACITY: usize = 1000;

/// Type of a progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiscoveryProgressType {
    Pending,
    Started,
    NetworkScanStarted,
    NetworkScanResult,
    NetworkScanProgress,
    NetworkScanFinished,
    PortScanStarted,
    PortScanResult,
    PortScanProgress,
    PortScanFinished,
    ServerDiscoveryStarted,
    EndpointsDiscoveryStarted,
    EndpointsDiscoveryFinished,
    ServerDiscoveryFinished,
    Finished,
    Cancelled,
    Error,
}

impl DiscoveryProgressType {
    /// Returns true for the events that end a request.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DiscoveryProgressType::Finished
                | DiscoveryProgressType::Cancelled
                | DiscoveryProgressType::Error
        )
    }
}

/// One progress event of a discovery request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryProgressModel {
    pub timestamp: DateTime<Utc>,

    pub event_type: DiscoveryProgressType,

    pub discoverer_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<OperationContextModel>,

    /// Probes or lookups in flight
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovered: Option<u64>,

    /// Address, endpoint or url the event is about
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub result_details: BTreeMap<String, String>,
}

/// Receives progress events.
pub trait DiscoveryProgress: Send + Sync {
    fn on_progress(&self, progress: DiscoveryProgressModel);
}

/// Writes progress events to the log.
#[derive(Debug, Clone, Default)]
pub struct LoggingProgress;

impl DiscoveryProgress for LoggingProgress {
    fn on_progress(&self, progress: DiscoveryProgressModel) {
        let request_id = progress.request_id.as_deref().unwrap_or_default();
        match progress.event_type {
            DiscoveryProgressType::Pending => info!(
                request_id,
                pending = progress.total.unwrap_or_default(),
                "Discovery request pending"
            ),
            DiscoveryProgressType::Started => info!(request_id, "Discovery started"),
            DiscoveryProgressType::Finished => info!(
                request_id,
                discovered = progress.discovered.unwrap_or_default(),
                "Discovery finished"
            ),
            DiscoveryProgressType::Cancelled => info!(request_id, "Discovery cancelled"),
            DiscoveryProgressType::Error => warn!(
                request_id,
                error = progress.result.as_deref().unwrap_or_default(),
                "Discovery failed"
            ),
            DiscoveryProgressType::NetworkScanResult
            | DiscoveryProgressType::PortScanResult
            | DiscoveryProgressType::EndpointsDiscoveryFinished => debug!(
                request_id,
                event = ?progress.event_type,
                result = progress.result.as_deref().unwrap_or_default(),
                discovered = progress.discovered.unwrap_or_default(),
                "Discovery progress"
            ),
            other => debug!(
                request_id,
                event = ?other,
                progress = progress.progress.unwrap_or_default(),
                total = progress.total.unwrap_or_default(),
                workers = progress.workers.unwrap_or_default(),
                "Discovery progress"
            ),
        }
    }
}

/// Forwards progress events into a bounded channel.
///
/// Events are dropped with a warning while the channel is full.
#[derive(Debug, Clone)]
pub struct ChannelProgress {
    tx: Sender<DiscoveryProgressModel>,
}

impl ChannelProgress {
    /// Creates a sink and the receiver its events arrive on.
    pub fn new(capacity: usize) -> (Self, Receiver<DiscoveryProgressModel>) {
        let (tx, rx) = async_channel::bounded(capacity);
        (Self { tx }, rx)
    }
}

impl DiscoveryProgress for ChannelProgress {
    fn on_progress(&self, progress: DiscoveryProgressModel) {
        if let Err(e) = self.tx.try_send(progress) {
            warn!(error = %e, "Failed to send progress event");
        }
    }
}

/// Delivers every event to each of several sinks.
#[derive(Clone, Default)]
pub struct ProgressFanOut {
    sinks: Vec<Arc<dyn DiscoveryProgress>>,
}

impl ProgressFanOut {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn DiscoveryProgress>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl DiscoveryProgress for ProgressFanOut {
    fn on_progress(&self, progress: DiscoveryProgressModel) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.on_progress(progress.clone());
            }
            last.on_progress(progress);
        }
    }
}

/// Emits the progress events of one request.
pub(crate) struct ProgressReporter {
    sink: Arc<dyn DiscoveryProgress>,
    discoverer_id: String,
    request_id: Option<String>,
    context: Option<OperationContextModel>,
}

impl ProgressReporter {
    pub(crate) fn new(
        sink: Arc<dyn DiscoveryProgress>,
        discoverer_id: &str,
        request: &DiscoveryRequestModel,
    ) -> Self {
        Self {
            sink,
            discoverer_id: discoverer_id.to_string(),
            request_id: request.id.clone(),
            context: request.context.clone(),
        }
    }

    fn event(&self, event_type: DiscoveryProgressType) -> DiscoveryProgressModel {
        DiscoveryProgressModel {
            timestamp: Utc::now(),
            event_type,
            discoverer_id: self.discoverer_id.clone(),
            request_id: self.request_id.clone(),
            context: self.context.clone(),
            workers: None,
            progress: None,
            total: None,
            discovered: None,
            result: None,
            result_details: BTreeMap::new(),
        }
    }

    fn counters(&self, event_type: DiscoveryProgressType, c: &ScanCounters) -> DiscoveryProgressModel {
        DiscoveryProgressModel {
            workers: Some(c.active),
            progress: Some(c.issued),
            total: Some(c.total),
            discovered: Some(c.found),
            ..self.event(event_type)
        }
    }

    fn send(&self, progress: DiscoveryProgressModel) {
        self.sink.on_progress(progress);
    }

    /// Reports the number of requests queued ahead of this one.
    pub(crate) fn pending(&self, ahead: usize) {
        self.send(DiscoveryProgressModel {
            total: Some(ahead as u64),
            ..self.event(DiscoveryProgressType::Pending)
        });
    }

    pub(crate) fn started(&self) {
        self.send(self.event(DiscoveryProgressType::Started));
    }

    pub(crate) fn network_scan_started(&self, workers: usize, total: u64) {
        self.send(DiscoveryProgressModel {
            workers: Some(workers),
            progress: Some(0),
            total: Some(total),
            ..self.event(DiscoveryProgressType::NetworkScanStarted)
        });
    }

    pub(crate) fn network_scan_finished(&self, total: u64, discovered: usize) {
        self.send(DiscoveryProgressModel {
            progress: Some(total),
            total: Some(total),
            discovered: Some(discovered as u64),
            ..self.event(DiscoveryProgressType::NetworkScanFinished)
        });
    }

    pub(crate) fn port_scan_started(&self, workers: usize, total: u64) {
        self.send(DiscoveryProgressModel {
            workers: Some(workers),
            progress: Some(0),
            total: Some(total),
            ..self.event(DiscoveryProgressType::PortScanStarted)
        });
    }

    pub(crate) fn port_scan_finished(&self, total: u64, discovered: usize) {
        self.send(DiscoveryProgressModel {
            progress: Some(total),
            total: Some(total),
            discovered: Some(discovered as u64),
            ..self.event(DiscoveryProgressType::PortScanFinished)
        });
    }

    pub(crate) fn server_discovery_started(&self, total: usize) {
        self.send(DiscoveryProgressModel {
            progress: Some(0),
            total: Some(total as u64),
            ..self.event(DiscoveryProgressType::ServerDiscoveryStarted)
        });
    }

    pub(crate) fn endpoints_discovery_started(&self, index: usize, total: usize, url: &str) {
        self.send(DiscoveryProgressModel {
            progress: Some(index as u64),
            total: Some(total as u64),
            result: Some(url.to_string()),
            ..self.event(DiscoveryProgressType::EndpointsDiscoveryStarted)
        });
    }

    pub(crate) fn endpoints_discovery_finished(
        &self,
        index: usize,
        total: usize,
        url: &str,
        discovered: usize,
        error: Option<String>,
    ) {
        let mut result_details = BTreeMap::new();
        if let Some(error) = error {
            result_details.insert("error".to_string(), error);
        }
        self.send(DiscoveryProgressModel {
            progress: Some(index as u64 + 1),
            total: Some(total as u64),
            discovered: Some(discovered as u64),
            result: Some(url.to_string()),
            result_details,
            ..self.event(DiscoveryProgressType::EndpointsDiscoveryFinished)
        });
    }

    pub(crate) fn server_discovery_finished(&self, total: usize, discovered: usize) {
        self.send(DiscoveryProgressModel {
            progress: Some(total as u64),
            total: Some(total as u64),
            discovered: Some(discovered as u64),
            ..self.event(DiscoveryProgressType::ServerDiscoveryFinished)
        });
    }

    pub(crate) fn finished(&self, discovered: usize) {
        self.send(DiscoveryProgressModel {
            discovered: Some(discovered as u64),
            ..self.event(DiscoveryProgressType::Finished)
        });
    }

    pub(crate) fn cancelled(&self) {
        self.send(self.event(DiscoveryProgressType::Cancelled));
    }

    pub(crate) fn error(&self, error: &str) {
        self.send(DiscoveryProgressModel {
            result: Some(error.to_string()),
            ..self.event(DiscoveryProgressType::Error)
        });
    }
}

/// Reports network scan hits and counters of a request.
pub(crate) struct NetworkScanReport<'a>(pub(crate) &'a ProgressReporter);

impl ScanObserver<IpAddr> for NetworkScanReport<'_> {
    fn on_found(&self, target: &IpAddr, counters: &ScanCounters) {
        self.0.send(DiscoveryProgressModel {
            result: Some(target.to_string()),
            ..self.0.counters(DiscoveryProgressType::NetworkScanResult, counters)
        });
    }

    fn on_progress(&self, counters: &ScanCounters) {
        self.0
            .send(self.0.counters(DiscoveryProgressType::NetworkScanProgress, counters));
    }
}

/// Reports port scan hits and counters of a request.
pub(crate) struct PortScanReport<'a>(pub(crate) &'a ProgressReporter);

impl ScanObserver<SocketAddr> for PortScanReport<'_> {
    fn on_found(&self, target: &SocketAddr, counters: &ScanCounters) {
        self.0.send(DiscoveryProgressModel {
            result: Some(target.to_string()),
            ..self.0.counters(DiscoveryProgressType::PortScanResult, counters)
        });
    }

    fn on_progress(&self, counters: &ScanCounters) {
        self.0
            .send(self.0.counters(DiscoveryProgressType::PortScanProgress, counters));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<DiscoveryProgressType>>);

    impl DiscoveryProgress for Recorder {
        fn on_progress(&self, progress: DiscoveryProgressModel) {
            self.0.lock().push(progress.event_type);
        }
    }

    fn reporter(sink: Arc<dyn DiscoveryProgress>) -> ProgressReporter {
        let request = DiscoveryRequestModel::default().with_id("req-1");
        ProgressReporter::new(sink, "gw_module_disc", &request)
    }

    #[test]
    fn test_terminal_events() {
        assert!(DiscoveryProgressType::Finished.is_terminal());
        assert!(DiscoveryProgressType::Cancelled.is_terminal());
        assert!(DiscoveryProgressType::Error.is_terminal());
        assert!(!DiscoveryProgressType::Pending.is_terminal());
    }

    #[test]
    fn test_fan_out_delivers_to_every_sink() {
        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());
        let fan_out = ProgressFanOut::new().with(a.clone()).with(b.clone());

        let reporter = reporter(Arc::new(fan_out));
        reporter.started();
        reporter.finished(2);

        let expected = vec![DiscoveryProgressType::Started, DiscoveryProgressType::Finished];
        assert_eq!(*a.0.lock(), expected);
        assert_eq!(*b.0.lock(), expected);
    }

    #[test]
    fn test_channel_progress_carries_request_identity() {
        let (sink, rx) = ChannelProgress::new(8);
        let reporter = reporter(Arc::new(sink));
        reporter.pending(2);

        let event = rx.try_recv().unwrap();
        assert_eq!(event.event_type, DiscoveryProgressType::Pending);
        assert_eq!(event.request_id.as_deref(), Some("req-1"));
        assert_eq!(event.discoverer_id, "gw_module_disc");
        assert_eq!(event.total, Some(2));
    }

    #[test]
    fn test_channel_progress_drops_when_full() {
        let (sink, rx) = ChannelProgress::new(1);
        let reporter = reporter(Arc::new(sink));
        reporter.started();
        reporter.cancelled();

        assert_eq!(rx.len(), 1);
        assert_eq!(rx.try_recv().unwrap().event_type, DiscoveryProgressType::Started);
    }

    #[test]
    fn test_scan_reports_map_counters() {
        let (sink, rx) = ChannelProgress::new(8);
        let reporter = reporter(Arc::new(sink));
        let counters = ScanCounters {
            active: 3,
            issued: 10,
            total: 100,
            found: 1,
        };

        PortScanReport(&reporter).on_found(&"10.0.0.1:4840".parse().unwrap(), &counters);

        let event = rx.try_recv().unwrap();
        assert_eq!(event.event_type, DiscoveryProgressType::PortScanResult);
        assert_eq!(event.result.as_deref(), Some("10.0.0.1:4840"));
        assert_eq!(event.workers, Some(3));
        assert_eq!(event.progress, Some(10));
        assert_eq!(event.total, Some(100));
        assert_eq!(event.discovered, Some(1));
    }
}
