//! Resource monitoring and throttling recommendations.
//!
//! The monitor samples CPU and memory through a [`ResourceProbe`], keeps a
//! bounded history of samples, and recommends a worker count from that
//! history.
//!
//! # Design
//!
//! - The background sampler is a tokio task stopped by a `CancellationToken`
//! - The sampler holds only a weak reference, so dropping the last monitor
//!   ends the loop even without `stop_monitoring`
//! - Readers get a copy of the history, never a live view
//! - A failed sample is logged and the tick skipped

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use chrono::Utc;
use rowtrack_core::{
    ProbeError, ProbeReading, ResourceLimitSettings, ResourceMetrics, ResourceProbe,
    ResourceStatus,
};
use sysinfo::{Pid, ProcessesToUpdate, System};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error("Background monitoring requires a running tokio runtime")]
    NoRuntime,
}

/// Thresholds and sampling parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceLimits {
    pub max_cpu_percent: f64,
    pub max_memory_percent: f64,
    pub warning_percent: f64,
    pub critical_percent: f64,
    pub check_interval: Duration,
    pub throttle_factor: f64,
    pub min_concurrent: usize,
    pub history_size: usize,
    pub throttle_window: usize,
}

impl ResourceLimits {
    pub fn from_settings(settings: &ResourceLimitSettings) -> Self {
        Self {
            max_cpu_percent: settings.max_cpu_percent,
            max_memory_percent: settings.max_memory_percent,
            warning_percent: settings.warning_percent,
            critical_percent: settings.critical_percent,
            check_interval: Duration::from_secs(settings.check_interval_seconds.max(1)),
            throttle_factor: settings.throttle_factor,
            min_concurrent: settings.min_concurrent,
            history_size: settings.history_size.max(1),
            throttle_window: settings.throttle_window.max(1),
        }
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self::from_settings(&ResourceLimitSettings::default())
    }
}

/// Probe backed by `sysinfo`.
pub struct SysinfoProbe {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        let mut system = System::new();
        // CPU usage is computed between two refreshes; prime the first one.
        system.refresh_cpu_usage();
        system.refresh_memory();
        Self {
            system: Mutex::new(system),
            pid: sysinfo::get_current_pid().ok(),
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SysinfoProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SysinfoProbe").field("pid", &self.pid).finish_non_exhaustive()
    }
}

impl ResourceProbe for SysinfoProbe {
    fn sample(&self) -> Result<ProbeReading, ProbeError> {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_cpu_usage();
        system.refresh_memory();

        let total = system.total_memory();
        if total == 0 {
            return Err(ProbeError::Unavailable("total memory reported as zero".to_string()));
        }
        let memory_percent = system.used_memory() as f64 / total as f64 * 100.0;

        let active_threads = self.pid.map_or(0, |pid| {
            system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
            system
                .process(pid)
                .and_then(|p| p.tasks())
                .map_or(1, |tasks| tasks.len().max(1))
        });

        Ok(ProbeReading {
            cpu_percent: f64::from(system.global_cpu_usage()),
            memory_percent,
            active_threads,
        })
    }
}

struct Sampler {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct MonitorInner {
    limits: ResourceLimits,
    probe: Box<dyn ResourceProbe>,
    history: Mutex<VecDeque<ResourceMetrics>>,
    queue_size: AtomicUsize,
    sampler: Mutex<Option<Sampler>>,
}

/// Samples system load and recommends a safe concurrency level.
///
/// Cheap to clone; clones share history and the sampler.
#[derive(Clone)]
pub struct ResourceMonitor {
    inner: Arc<MonitorInner>,
}

impl std::fmt::Debug for ResourceMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceMonitor")
            .field("limits", &self.inner.limits)
            .field("monitoring", &self.is_monitoring())
            .finish_non_exhaustive()
    }
}

impl ResourceMonitor {
    pub fn new(limits: ResourceLimits, probe: Box<dyn ResourceProbe>) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                history: Mutex::new(VecDeque::with_capacity(limits.history_size)),
                limits,
                probe,
                queue_size: AtomicUsize::new(0),
                sampler: Mutex::new(None),
            }),
        }
    }

    /// Monitor backed by [`SysinfoProbe`].
    pub fn with_system_probe(limits: ResourceLimits) -> Self {
        Self::new(limits, Box::new(SysinfoProbe::new()))
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.inner.limits
    }

    /// Queue depth attached to samples taken by the background loop.
    pub fn set_queue_size(&self, queue_size: usize) {
        self.inner.queue_size.store(queue_size, Ordering::Relaxed);
    }

    /// Take one sample now. Does not touch the history.
    pub fn get_current_metrics(&self, queue_size: usize) -> Result<ResourceMetrics, MonitorError> {
        let reading = self.inner.probe.sample()?;
        Ok(self.inner.classify(reading, queue_size))
    }

    /// Append a sample to the history, evicting the oldest beyond capacity.
    pub fn record(&self, metrics: ResourceMetrics) {
        self.inner.record(metrics);
    }

    /// Copy of the history, oldest first.
    pub fn history(&self) -> Vec<ResourceMetrics> {
        self.inner.history().iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<ResourceMetrics> {
        self.inner.history().back().cloned()
    }

    pub fn is_monitoring(&self) -> bool {
        self.inner
            .sampler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|s| !s.handle.is_finished())
    }

    /// Start the background sampler. A second call while running is a no-op.
    pub fn start_monitoring(&self) -> Result<(), MonitorError> {
        let mut slot = self.inner.sampler.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|s| !s.handle.is_finished()) {
            return Ok(());
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| MonitorError::NoRuntime)?;

        let cancel = CancellationToken::new();
        let handle = runtime.spawn(sample_loop(
            Arc::downgrade(&self.inner),
            self.inner.limits.check_interval,
            cancel.clone(),
        ));
        *slot = Some(Sampler { cancel, handle });
        debug!(interval = ?self.inner.limits.check_interval, "Resource monitoring started");
        Ok(())
    }

    /// Stop the background sampler. Safe to call when not started.
    pub fn stop_monitoring(&self) {
        let sampler = self
            .inner
            .sampler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(sampler) = sampler {
            sampler.cancel.cancel();
            debug!("Resource monitoring stopped");
        }
    }

    /// Recommended worker count for `current_workers`.
    ///
    /// Throttles only when the last `throttle_window` samples exist and their
    /// average CPU or memory exceeds the configured maximum. The reduced
    /// count is `floor(current * throttle_factor)`, never below
    /// `min_concurrent`.
    pub fn get_recommended_concurrency(&self, current_workers: usize) -> usize {
        let limits = &self.inner.limits;
        let window = limits.throttle_window.max(1);
        let history = self.inner.history();
        if history.len() < window {
            return current_workers;
        }

        let (cpu_sum, mem_sum) = history
            .iter()
            .rev()
            .take(window)
            .fold((0.0, 0.0), |(c, m), s| (c + s.cpu_percent, m + s.memory_percent));
        let avg_cpu = cpu_sum / window as f64;
        let avg_mem = mem_sum / window as f64;

        if avg_cpu > limits.max_cpu_percent || avg_mem > limits.max_memory_percent {
            let reduced = (current_workers as f64 * limits.throttle_factor).floor() as usize;
            let recommended = reduced.max(limits.min_concurrent);
            debug!(
                avg_cpu,
                avg_mem, current_workers, recommended, "Sustained resource pressure"
            );
            recommended
        } else {
            current_workers
        }
    }
}

impl MonitorInner {
    fn history(&self) -> std::sync::MutexGuard<'_, VecDeque<ResourceMetrics>> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn classify(&self, reading: ProbeReading, queue_size: usize) -> ResourceMetrics {
        ResourceMetrics {
            cpu_percent: reading.cpu_percent,
            memory_percent: reading.memory_percent,
            active_threads: reading.active_threads,
            queue_size,
            timestamp: Utc::now(),
            status: ResourceStatus::classify(
                reading.cpu_percent,
                reading.memory_percent,
                self.limits.warning_percent,
                self.limits.critical_percent,
            ),
        }
    }

    fn record(&self, metrics: ResourceMetrics) {
        let mut history = self.history();
        while history.len() >= self.limits.history_size.max(1) {
            history.pop_front();
        }
        history.push_back(metrics);
    }

    fn tick(&self) {
        match self.probe.sample() {
            Ok(reading) => {
                let metrics = self.classify(reading, self.queue_size.load(Ordering::Relaxed));
                if metrics.status == ResourceStatus::Critical {
                    warn!(
                        cpu = metrics.cpu_percent,
                        memory = metrics.memory_percent,
                        "Resource usage critical"
                    );
                }
                self.record(metrics);
            }
            Err(e) => warn!(error = %e, "Resource sample failed, skipping tick"),
        }
    }
}

async fn sample_loop(inner: Weak<MonitorInner>, period: Duration, cancel: CancellationToken) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(inner) = inner.upgrade() else { break };
                inner.tick();
            }
            () = cancel.cancelled() => break,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    /// Probe returning fixed readings, failing every `fail_every`th call.
    pub(crate) struct FixedProbe {
        pub cpu: f64,
        pub memory: f64,
        pub fail_every: u32,
        pub calls: Arc<AtomicU32>,
    }

    impl FixedProbe {
        pub(crate) fn new(cpu: f64, memory: f64) -> Self {
            Self {
                cpu,
                memory,
                fail_every: 0,
                calls: Arc::new(AtomicU32::new(0)),
            }
        }

        /// Shared count of `sample` calls, readable once boxed.
        pub(crate) fn calls(&self) -> Arc<AtomicU32> {
            Arc::clone(&self.calls)
        }
    }

    impl ResourceProbe for FixedProbe {
        fn sample(&self) -> Result<ProbeReading, ProbeError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_every > 0 && n % self.fail_every == 0 {
                return Err(ProbeError::Unavailable("flaky".into()));
            }
            Ok(ProbeReading {
                cpu_percent: self.cpu,
                memory_percent: self.memory,
                active_threads: 4,
            })
        }
    }

    fn sample(cpu: f64, memory: f64) -> ResourceMetrics {
        ResourceMetrics {
            cpu_percent: cpu,
            memory_percent: memory,
            active_threads: 1,
            queue_size: 0,
            timestamp: Utc::now(),
            status: ResourceStatus::Normal,
        }
    }

    fn monitor() -> ResourceMonitor {
        ResourceMonitor::new(ResourceLimits::default(), Box::new(FixedProbe::new(10.0, 10.0)))
    }

    #[test]
    fn test_sustained_pressure_throttles() {
        let m = monitor();
        for _ in 0..5 {
            m.record(sample(90.0, 30.0));
        }
        let recommended = m.get_recommended_concurrency(10);
        assert!(recommended < 10);
        assert_eq!(recommended, 5);
    }

    #[test]
    fn test_low_usage_keeps_workers() {
        let m = monitor();
        for _ in 0..5 {
            m.record(sample(40.0, 40.0));
        }
        assert_eq!(m.get_recommended_concurrency(10), 10);
    }

    #[test]
    fn test_single_spike_does_not_throttle() {
        let m = monitor();
        m.record(sample(40.0, 40.0));
        m.record(sample(40.0, 40.0));
        m.record(sample(99.0, 40.0));
        assert_eq!(m.get_recommended_concurrency(10), 10);

        let m = monitor();
        m.record(sample(99.0, 99.0));
        assert_eq!(m.get_recommended_concurrency(10), 10);
    }

    #[test]
    fn test_memory_pressure_floors_at_min() {
        let m = monitor();
        for _ in 0..3 {
            m.record(sample(10.0, 95.0));
        }
        assert_eq!(m.get_recommended_concurrency(1), 1);
        assert_eq!(m.get_recommended_concurrency(3), 1);
    }

    #[test]
    fn test_history_is_bounded() {
        let limits = ResourceLimits {
            history_size: 3,
            ..ResourceLimits::default()
        };
        let m = ResourceMonitor::new(limits, Box::new(FixedProbe::new(1.0, 1.0)));
        for i in 0..5 {
            m.record(sample(f64::from(i), 0.0));
        }
        let history = m.history();
        assert_eq!(history.len(), 3);
        assert!((history[0].cpu_percent - 2.0).abs() < f64::EPSILON);
        assert!((m.latest().unwrap().cpu_percent - 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_current_metrics_classifies_status() {
        let m = ResourceMonitor::new(ResourceLimits::default(), Box::new(FixedProbe::new(95.0, 20.0)));
        let metrics = m.get_current_metrics(7).unwrap();
        assert_eq!(metrics.status, ResourceStatus::Critical);
        assert_eq!(metrics.queue_size, 7);
        assert!(m.history().is_empty());
    }

    #[test]
    fn test_start_without_runtime_fails() {
        let m = monitor();
        assert!(matches!(m.start_monitoring(), Err(MonitorError::NoRuntime)));
        m.stop_monitoring();
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_idempotent_and_failures_skip_ticks() {
        let limits = ResourceLimits {
            check_interval: Duration::from_millis(10),
            ..ResourceLimits::default()
        };
        let probe = FixedProbe {
            fail_every: 2,
            ..FixedProbe::new(20.0, 20.0)
        };
        let m = ResourceMonitor::new(limits, Box::new(probe));

        m.stop_monitoring();
        m.start_monitoring().unwrap();
        m.start_monitoring().unwrap();
        assert!(m.is_monitoring());

        for _ in 0..10 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        m.stop_monitoring();
        m.stop_monitoring();
        tokio::task::yield_now().await;

        let samples = m.history().len();
        assert!(samples >= 3, "got {samples} samples");
        assert!(!m.is_monitoring());
    }
}
