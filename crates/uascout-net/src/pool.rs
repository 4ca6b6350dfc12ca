//! Bounded, adaptive probe pipeline.
//!
//! Drives a lazily generated sequence of probe targets with at most `limit`
//! probes in flight. The limit starts at the configured maximum and follows
//! the share of recent probes that got an answer, never dropping below the
//! configured floor. Counters are reported to an observer on every hit and
//! on a fixed interval.

use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::probe::ProbeResult;

/// Default interval between progress reports
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(3);

/// Shortest interval between progress reports
pub const MIN_PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// Number of recent probe results the limit is derived from
const ADAPT_WINDOW: usize = 100;

/// Outcome of a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome<T> {
    Completed(T),
    Cancelled,
}

impl<T> ScanOutcome<T> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ScanOutcome::Cancelled)
    }
}

/// Cumulative scan counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanCounters {
    /// Probes currently in flight
    pub active: usize,
    /// Probes issued so far
    pub issued: u64,
    /// Probes the scan will issue in total
    pub total: u64,
    /// Targets found so far
    pub found: u64,
}

/// Receives scan results while a scan runs.
pub trait ScanObserver<T>: Send + Sync {
    /// Called for every target that answered.
    fn on_found(&self, _target: &T, _counters: &ScanCounters) {}

    /// Called on every progress interval.
    fn on_progress(&self, _counters: &ScanCounters) {}
}

impl<T> ScanObserver<T> for () {}

/// Probe pool limits.
#[derive(Debug, Clone)]
pub struct ProbePoolConfig {
    /// Maximum probes in flight
    pub max_probes: usize,
    /// Lowest limit the pool adapts down to
    pub min_probes: usize,
    /// Timeout of a single probe
    pub timeout: Duration,
    /// Interval of progress reports
    pub progress_interval: Duration,
}

impl ProbePoolConfig {
    /// Creates a fixed size pool.
    pub fn fixed(max_probes: usize, timeout: Duration) -> Self {
        let max_probes = max_probes.max(1);
        Self {
            max_probes,
            min_probes: max_probes,
            timeout,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    /// Creates a pool that adapts down to `min_percent` of `max_probes`.
    pub fn adaptive(max_probes: usize, min_percent: u32, timeout: Duration) -> Self {
        let max_probes = max_probes.max(1);
        let min_probes = (max_probes * min_percent.min(100) as usize / 100).clamp(1, max_probes);
        Self {
            max_probes,
            min_probes,
            timeout,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }
}

/// Concurrency limit following the recent answer ratio.
#[derive(Debug)]
pub(crate) struct AdaptiveLimit {
    max: usize,
    floor: usize,
    window: VecDeque<bool>,
    answered: usize,
    current: usize,
}

impl AdaptiveLimit {
    pub(crate) fn new(max: usize, floor: usize) -> Self {
        let max = max.max(1);
        Self {
            max,
            floor: floor.clamp(1, max),
            window: VecDeque::with_capacity(ADAPT_WINDOW),
            answered: 0,
            current: max,
        }
    }

    pub(crate) fn current(&self) -> usize {
        self.current
    }

    /// Records a probe result and recomputes the limit. Only timeouts count
    /// as failures.
    pub(crate) fn record(&mut self, result: ProbeResult) {
        if self.floor == self.max {
            return;
        }
        let answered = result != ProbeResult::TimedOut;
        self.window.push_back(answered);
        if answered {
            self.answered += 1;
        }
        if self.window.len() > ADAPT_WINDOW {
            if let Some(true) = self.window.pop_front() {
                self.answered -= 1;
            }
        }
        let ratio = self.answered as f64 / self.window.len() as f64;
        let target = (self.max as f64 * ratio).round() as usize;
        self.current = target.clamp(self.floor, self.max);
    }
}

/// Runs `probe` over `targets` and collects the targets that answered.
///
/// On cancellation no further probes are issued; probes in flight run to
/// completion and the scan reports `Cancelled`.
pub async fn run_probes<T, I, F, Fut>(
    targets: I,
    total: u64,
    config: &ProbePoolConfig,
    probe: F,
    observer: &dyn ScanObserver<T>,
    token: &CancellationToken,
) -> ScanOutcome<Vec<T>>
where
    T: Clone + Send + 'static,
    I: Iterator<Item = T> + Send,
    F: Fn(T) -> Fut + Send + Sync,
    Fut: Future<Output = ProbeResult> + Send + 'static,
{
    let mut targets = targets;
    let mut limit = AdaptiveLimit::new(config.max_probes, config.min_probes);
    let mut in_flight = FuturesUnordered::new();
    let mut counters = ScanCounters {
        total,
        ..Default::default()
    };
    let mut found = Vec::new();
    let mut exhausted = false;
    let mut cancelled = false;

    let period = config.progress_interval.max(MIN_PROGRESS_INTERVAL);
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if !cancelled && token.is_cancelled() {
            debug!(issued = counters.issued, "Scan cancelled, draining probes");
            cancelled = true;
        }

        if !cancelled && !exhausted {
            while in_flight.len() < limit.current() {
                let Some(target) = targets.next() else {
                    exhausted = true;
                    break;
                };
                let timeout = config.timeout;
                let fut = probe(target.clone());
                in_flight.push(async move {
                    let result = tokio::time::timeout(timeout, fut)
                        .await
                        .unwrap_or(ProbeResult::TimedOut);
                    (target, result)
                });
                counters.issued += 1;
            }
        }

        if in_flight.is_empty() {
            break;
        }

        tokio::select! {
            biased;
            _ = token.cancelled(), if !cancelled => {
                continue;
            }
            Some((target, result)) = in_flight.next() => {
                limit.record(result);
                if result.is_open() {
                    counters.found += 1;
                    counters.active = in_flight.len();
                    observer.on_found(&target, &counters);
                    found.push(target);
                }
            }
            _ = ticker.tick() => {
                counters.active = in_flight.len();
                trace!(
                    active = counters.active,
                    issued = counters.issued,
                    total = counters.total,
                    limit = limit.current(),
                    "Scan progress"
                );
                observer.on_progress(&counters);
            }
        }
    }

    counters.active = 0;
    observer.on_progress(&counters);

    if cancelled {
        ScanOutcome::Cancelled
    } else {
        ScanOutcome::Completed(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_limit_fixed_pool_never_adapts() {
        let mut limit = AdaptiveLimit::new(50, 50);
        for _ in 0..200 {
            limit.record(ProbeResult::TimedOut);
        }
        assert_eq!(limit.current(), 50);
    }

    #[test]
    fn test_limit_shrinks_to_floor_on_timeouts() {
        let mut limit = AdaptiveLimit::new(1000, 100);
        for _ in 0..ADAPT_WINDOW {
            limit.record(ProbeResult::TimedOut);
        }
        assert_eq!(limit.current(), 100);
    }

    #[test]
    fn test_limit_follows_answer_ratio() {
        let mut limit = AdaptiveLimit::new(1000, 100);
        for i in 0..ADAPT_WINDOW {
            if i % 2 == 0 {
                limit.record(ProbeResult::Closed);
            } else {
                limit.record(ProbeResult::TimedOut);
            }
        }
        assert_eq!(limit.current(), 500);

        // Recovers once answers return
        for _ in 0..ADAPT_WINDOW {
            limit.record(ProbeResult::Open);
        }
        assert_eq!(limit.current(), 1000);
    }

    #[test]
    fn test_adaptive_config_floor() {
        let config = ProbePoolConfig::adaptive(1000, 10, Duration::from_secs(1));
        assert_eq!(config.min_probes, 100);
        let config = ProbePoolConfig::adaptive(5, 10, Duration::from_secs(1));
        assert_eq!(config.min_probes, 1);
    }

    #[derive(Default)]
    struct Recorder {
        found: Mutex<Vec<u32>>,
        progress: AtomicUsize,
    }

    impl ScanObserver<u32> for Recorder {
        fn on_found(&self, target: &u32, _counters: &ScanCounters) {
            self.found.lock().push(*target);
        }

        fn on_progress(&self, _counters: &ScanCounters) {
            self.progress.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_run_probes_collects_open_targets() {
        let config = ProbePoolConfig::fixed(4, Duration::from_secs(1));
        let recorder = Recorder::default();
        let token = CancellationToken::new();

        let outcome = run_probes(
            0u32..20,
            20,
            &config,
            |n| async move {
                if n % 5 == 0 {
                    ProbeResult::Open
                } else {
                    ProbeResult::Closed
                }
            },
            &recorder,
            &token,
        )
        .await;

        let ScanOutcome::Completed(mut found) = outcome else {
            panic!("scan was cancelled");
        };
        found.sort_unstable();
        assert_eq!(found, vec![0, 5, 10, 15]);
        assert_eq!(recorder.found.lock().len(), 4);
        assert!(recorder.progress.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_run_probes_with_zero_progress_interval() {
        let config =
            ProbePoolConfig::fixed(4, Duration::from_secs(1)).with_progress_interval(Duration::ZERO);
        let token = CancellationToken::new();

        let outcome = run_probes(
            0u32..8,
            8,
            &config,
            |n| async move {
                if n == 3 {
                    ProbeResult::Open
                } else {
                    ProbeResult::Closed
                }
            },
            &(),
            &token,
        )
        .await;

        assert_eq!(outcome, ScanOutcome::Completed(vec![3]));
    }

    #[tokio::test]
    async fn test_run_probes_respects_limit() {
        let config = ProbePoolConfig::fixed(3, Duration::from_secs(1));
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let token = CancellationToken::new();

        let outcome = run_probes(
            0u32..30,
            30,
            &config,
            |_| {
                let active = active.clone();
                let peak = peak.clone();
                async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    ProbeResult::Closed
                }
            },
            &(),
            &token,
        )
        .await;

        assert_eq!(outcome, ScanOutcome::Completed(vec![]));
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_probes_times_out_slow_probes() {
        let config = ProbePoolConfig::fixed(10, Duration::from_millis(100));
        let token = CancellationToken::new();

        let outcome = run_probes(
            0u32..3,
            3,
            &config,
            |_| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                ProbeResult::Open
            },
            &(),
            &token,
        )
        .await;

        assert_eq!(outcome, ScanOutcome::Completed(vec![]));
    }

    #[tokio::test]
    async fn test_run_probes_stops_issuing_after_cancel() {
        let config = ProbePoolConfig::fixed(2, Duration::from_secs(1));
        let token = CancellationToken::new();
        let issued = Arc::new(AtomicUsize::new(0));

        let outcome = run_probes(
            0u32..1000,
            1000,
            &config,
            |_| {
                let issued = issued.clone();
                let token = token.clone();
                async move {
                    if issued.fetch_add(1, Ordering::SeqCst) == 5 {
                        token.cancel();
                    }
                    ProbeResult::Closed
                }
            },
            &(),
            &token,
        )
        .await;

        assert!(outcome.is_cancelled());
        assert!(issued.load(Ordering::SeqCst) < 20);
    }
}
