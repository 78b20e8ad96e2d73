//! Dual-pool adaptive task processor.
//!
//! Two classes of work run side by side:
//!
//! - **Channel tasks** pass through a resizable worker budget. The budget
//!   starts at `max_concurrent_channels` and is lowered or restored by a
//!   background rebalance loop that follows the [`ResourceMonitor`].
//! - **Download tasks** pass through a fixed semaphore of
//!   `max_concurrent_downloads` permits. Submission waits for a permit, so no
//!   more than that many downloads ever execute at once.
//!
//! Task bodies are blocking closures run on tokio's blocking pool. A running
//! task is never interrupted; [`TaskHandle::cancel`] only prevents a task
//! that has not started yet.
//!
//! # State machine
//!
//! `Created → Running → Stopped`. Submissions are accepted only while
//! `Running`. `stop` drains in-flight tasks up to the shutdown grace period,
//! then stops the monitor. Counters stay readable afterwards.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rowtrack_core::{
    DEFAULT_MAX_FIELD_LENGTH, ProcessorEvent, ProgressSink, ResourceStatus, Settings, TaskKind,
    TaskPriority, sanitize_error_message,
};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore, oneshot};
use tokio::task::JoinError;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::monitor::{MonitorError, ResourceLimits, ResourceMonitor};

// ============================================================================
// Configuration and errors
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessorConfig {
    pub max_concurrent_channels: usize,
    pub max_concurrent_downloads: usize,
    /// Channel tasks allowed to wait for a worker at once.
    pub max_queue_size: usize,
    pub shutdown_grace: Duration,
    pub task_timeout: Duration,
    pub limits: ResourceLimits,
}

impl ProcessorConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        let mass = &settings.mass_download;
        Self {
            max_concurrent_channels: mass.max_concurrent_channels.max(1),
            max_concurrent_downloads: mass.max_concurrent_downloads.max(1),
            max_queue_size: mass.max_queue_size.max(1),
            shutdown_grace: Duration::from_secs(mass.shutdown_grace_seconds),
            task_timeout: Duration::from_secs(mass.task_timeout_seconds),
            limits: ResourceLimits::from_settings(&settings.resource_limits),
        }
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::with_defaults())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessorState {
    Created,
    Running,
    Stopped,
}

impl fmt::Display for ProcessorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Stopped => "stopped",
        })
    }
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Processor is not accepting submissions (state: {0})")]
    NotAccepting(ProcessorState),

    #[error("Channel queue is full ({0} tasks waiting)")]
    QueueFull(usize),

    #[error(transparent)]
    Monitor(#[from] MonitorError),
}

/// Why a task handle did not yield a value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError<E> {
    /// The task body returned an error.
    #[error("Task failed: {0}")]
    Failed(E),

    #[error("Task panicked: {0}")]
    Panicked(String),

    #[error("Timed out after {0:?} waiting for task")]
    Timeout(Duration),

    #[error("Task was cancelled before it started")]
    Cancelled,
}

impl<E> TaskError<E> {
    /// A timed-out wait leaves the handle pending, so waiting again may
    /// still yield the outcome. Everything else is final.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// A task that ended in failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedTask {
    pub task_id: String,
    pub kind: TaskKind,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

/// Bookkeeping kept for every submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub kind: TaskKind,
    pub priority: TaskPriority,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub succeeded: Option<bool>,
}

/// Snapshot of processor counters plus the latest resource sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessorStatus {
    pub state: ProcessorState,
    pub current_workers: usize,
    pub active_tasks: usize,
    pub active_downloads: usize,
    pub queue_size: usize,
    pub completed_tasks: usize,
    pub failed_tasks: usize,
    pub cancelled_tasks: usize,
    pub channel_slots_available: usize,
    pub download_slots_available: usize,
    pub cpu_percent: Option<f64>,
    pub memory_percent: Option<f64>,
    pub resource_status: Option<ResourceStatus>,
}

/// Aggregate outcome of [`ConcurrentProcessor::wait_for_completion`].
#[derive(Debug)]
pub struct CompletionReport<T, E> {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    /// One entry per handle, in submission order.
    pub results: Vec<Result<T, TaskError<E>>>,
    /// Fraction of tasks that completed, 0.0 for an empty batch.
    pub success_rate: f64,
}

// ============================================================================
// Worker budget
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct GateSlots {
    active: usize,
    limit: usize,
}

/// Resizable counting gate for channel tasks.
///
/// Lowering the limit never interrupts holders; it only delays new
/// acquisitions until enough permits are released.
#[derive(Debug)]
struct WorkerGate {
    slots: Mutex<GateSlots>,
    notify: Notify,
}

impl WorkerGate {
    fn new(limit: usize) -> Self {
        Self {
            slots: Mutex::new(GateSlots {
                active: 0,
                limit: limit.max(1),
            }),
            notify: Notify::new(),
        }
    }

    fn slots(&self) -> MutexGuard<'_, GateSlots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn acquire(self: &Arc<Self>) -> GatePermit {
        loop {
            // Registered before the check so a release in between is not missed.
            let notified = self.notify.notified();
            {
                let mut slots = self.slots();
                if slots.active < slots.limit {
                    slots.active += 1;
                    return GatePermit {
                        gate: Arc::clone(self),
                    };
                }
            }
            notified.await;
        }
    }

    /// Returns the previous limit.
    fn set_limit(&self, limit: usize) -> usize {
        let previous = {
            let mut slots = self.slots();
            std::mem::replace(&mut slots.limit, limit.max(1))
        };
        self.notify.notify_waiters();
        previous
    }

    fn snapshot(&self) -> GateSlots {
        *self.slots()
    }
}

struct GatePermit {
    gate: Arc<WorkerGate>,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        {
            let mut slots = self.gate.slots();
            slots.active = slots.active.saturating_sub(1);
        }
        self.gate.notify.notify_waiters();
    }
}

// ============================================================================
// Task handles
// ============================================================================

const QUEUED: u8 = 0;
const RUNNING: u8 = 1;
const CANCELLED: u8 = 2;

#[derive(Debug)]
struct TaskControl {
    state: AtomicU8,
    cancelled: CancellationToken,
}

impl TaskControl {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            state: AtomicU8::new(QUEUED),
            cancelled: CancellationToken::new(),
        })
    }

    /// Move to running. False if the task was cancelled first.
    fn begin(&self) -> bool {
        self.state
            .compare_exchange(QUEUED, RUNNING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Handle to a submitted task.
#[derive(Debug)]
pub struct TaskHandle<T, E> {
    task_id: String,
    kind: TaskKind,
    control: Arc<TaskControl>,
    /// Taken once an outcome has been delivered.
    rx: Option<oneshot::Receiver<Result<T, TaskError<E>>>>,
}

impl<T, E> TaskHandle<T, E> {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub const fn kind(&self) -> TaskKind {
        self.kind
    }

    /// Prevent the task from starting. Returns false once it is running or done.
    pub fn cancel(&self) -> bool {
        let won = self
            .control
            .state
            .compare_exchange(QUEUED, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            self.control.cancelled.cancel();
        }
        won
    }

    /// Wait up to `timeout` for the task's outcome.
    ///
    /// On [`TaskError::Timeout`] the handle stays pending and may be waited
    /// on again. A zero timeout still returns an outcome that is already
    /// available. Once an outcome has been returned, later calls report
    /// [`TaskError::Cancelled`].
    pub async fn result(&mut self, timeout: Duration) -> Result<T, TaskError<E>> {
        let Some(rx) = self.rx.as_mut() else {
            return Err(TaskError::Cancelled);
        };
        match tokio::time::timeout(timeout, rx).await {
            Ok(received) => {
                self.rx = None;
                // Sender dropped without an outcome: the runtime shut the task down.
                received.unwrap_or(Err(TaskError::Cancelled))
            }
            Err(_) => Err(TaskError::Timeout(timeout)),
        }
    }

    /// True once an outcome has been returned by [`TaskHandle::result`].
    pub const fn is_settled(&self) -> bool {
        self.rx.is_none()
    }
}

// ============================================================================
// Processor
// ============================================================================

struct Shared {
    config: ProcessorConfig,
    state: Mutex<ProcessorState>,
    gate: Arc<WorkerGate>,
    downloads: Arc<Semaphore>,
    monitor: ResourceMonitor,
    sink: Box<dyn ProgressSink>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    queued: AtomicUsize,
    active_downloads: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    cancelled: AtomicUsize,
    failures: Mutex<Vec<FailedTask>>,
    records: Mutex<HashMap<String, TaskRecord>>,
}

/// Runs channel and download work under separate concurrency limits.
pub struct ConcurrentProcessor {
    shared: Arc<Shared>,
}

impl fmt::Debug for ConcurrentProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrentProcessor")
            .field("state", &self.state())
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

impl ConcurrentProcessor {
    /// Processor with a `sysinfo`-backed monitor.
    pub fn new(config: ProcessorConfig, sink: Box<dyn ProgressSink>) -> Self {
        let monitor = ResourceMonitor::with_system_probe(config.limits.clone());
        Self::with_monitor(config, monitor, sink)
    }

    pub fn with_monitor(
        config: ProcessorConfig,
        monitor: ResourceMonitor,
        sink: Box<dyn ProgressSink>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                gate: Arc::new(WorkerGate::new(config.max_concurrent_channels)),
                downloads: Arc::new(Semaphore::new(config.max_concurrent_downloads.max(1))),
                config,
                state: Mutex::new(ProcessorState::Created),
                monitor,
                sink,
                tracker: TaskTracker::new(),
                shutdown: CancellationToken::new(),
                queued: AtomicUsize::new(0),
                active_downloads: AtomicUsize::new(0),
                completed: AtomicUsize::new(0),
                failed: AtomicUsize::new(0),
                cancelled: AtomicUsize::new(0),
                failures: Mutex::new(Vec::new()),
                records: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.shared.config
    }

    pub fn monitor(&self) -> &ResourceMonitor {
        &self.shared.monitor
    }

    pub fn state(&self) -> ProcessorState {
        *self.shared.state()
    }

    /// Start the monitor and the rebalance loop. Must run inside a tokio runtime.
    pub fn start(&self) -> Result<(), ProcessorError> {
        let mut state = self.shared.state();
        match *state {
            ProcessorState::Running => return Ok(()),
            ProcessorState::Stopped => return Err(ProcessorError::NotAccepting(*state)),
            ProcessorState::Created => {}
        }

        self.shared.monitor.start_monitoring()?;
        tokio::spawn(rebalance_loop(
            Arc::downgrade(&self.shared),
            self.shared.config.limits.check_interval,
            self.shared.shutdown.clone(),
        ));
        *state = ProcessorState::Running;

        info!(
            channels = self.shared.config.max_concurrent_channels,
            downloads = self.shared.config.max_concurrent_downloads,
            "Concurrent processor started"
        );
        Ok(())
    }

    /// Queue a blocking task on the channel pool.
    pub fn submit_channel_task<T, E, F>(
        &self,
        task_id: impl Into<String>,
        priority: TaskPriority,
        body: F,
    ) -> Result<TaskHandle<T, E>, ProcessorError>
    where
        T: Send + 'static,
        E: fmt::Display + Send + 'static,
        F: FnOnce() -> Result<T, E> + Send + 'static,
    {
        let task_id = task_id.into();
        let state = self.shared.state();
        if *state != ProcessorState::Running {
            return Err(ProcessorError::NotAccepting(*state));
        }
        let waiting = self.shared.queued.load(Ordering::Acquire);
        if waiting >= self.shared.config.max_queue_size {
            return Err(ProcessorError::QueueFull(waiting));
        }
        self.shared.queued.fetch_add(1, Ordering::AcqRel);
        self.shared.monitor.set_queue_size(waiting + 1);
        self.shared.on_submitted(&task_id, TaskKind::Channel, priority);

        let control = TaskControl::new();
        let (tx, rx) = oneshot::channel();
        let shared = Arc::clone(&self.shared);
        let task_control = Arc::clone(&control);
        let id = task_id.clone();

        self.shared.tracker.spawn(async move {
            let permit = tokio::select! {
                permit = shared.gate.acquire() => Some(permit),
                () = task_control.cancelled.cancelled() => None,
            };
            let remaining = shared.queued.fetch_sub(1, Ordering::AcqRel).saturating_sub(1);
            shared.monitor.set_queue_size(remaining);
            execute(&shared, &id, TaskKind::Channel, &task_control, body, tx).await;
            drop(permit);
        });
        drop(state);

        Ok(TaskHandle {
            task_id,
            kind: TaskKind::Channel,
            control,
            rx: Some(rx),
        })
    }

    /// Run a blocking task on the download pool.
    ///
    /// Waits for a download slot before returning, so a caller submitting in
    /// a loop is held back while the pool is full.
    pub async fn submit_download_task<T, E, F>(
        &self,
        task_id: impl Into<String>,
        body: F,
    ) -> Result<TaskHandle<T, E>, ProcessorError>
    where
        T: Send + 'static,
        E: fmt::Display + Send + 'static,
        F: FnOnce() -> Result<T, E> + Send + 'static,
    {
        let task_id = task_id.into();
        {
            let state = self.shared.state();
            if *state != ProcessorState::Running {
                return Err(ProcessorError::NotAccepting(*state));
            }
        }

        let permit: OwnedSemaphorePermit = Arc::clone(&self.shared.downloads)
            .acquire_owned()
            .await
            .map_err(|_| ProcessorError::NotAccepting(ProcessorState::Stopped))?;

        // Recorded only once a slot is held, so a stop while waiting leaves no trace.
        let state = self.shared.state();
        if *state != ProcessorState::Running {
            return Err(ProcessorError::NotAccepting(*state));
        }
        self.shared.on_submitted(&task_id, TaskKind::Download, TaskPriority::Normal);

        let control = TaskControl::new();
        let (tx, rx) = oneshot::channel();
        let shared = Arc::clone(&self.shared);
        let task_control = Arc::clone(&control);
        let id = task_id.clone();

        self.shared.tracker.spawn(async move {
            shared.active_downloads.fetch_add(1, Ordering::AcqRel);
            execute(&shared, &id, TaskKind::Download, &task_control, body, tx).await;
            shared.active_downloads.fetch_sub(1, Ordering::AcqRel);
            drop(permit);
        });
        drop(state);

        Ok(TaskHandle {
            task_id,
            kind: TaskKind::Download,
            control,
            rx: Some(rx),
        })
    }

    /// Wait for every handle, sharing one overall deadline.
    ///
    /// Handles still pending at the deadline are cancelled if they have not
    /// started and reported as timed out.
    pub async fn wait_for_completion<T, E>(
        &self,
        handles: Vec<TaskHandle<T, E>>,
        timeout: Duration,
    ) -> CompletionReport<T, E> {
        let total = handles.len();
        let deadline = Instant::now() + timeout;
        let mut results = Vec::with_capacity(total);

        for mut handle in handles {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let outcome = handle.result(remaining).await;
            if matches!(outcome, Err(TaskError::Timeout(_))) {
                let never_started = handle.cancel();
                error!(task_id = %handle.task_id, never_started, "Timed out waiting for task");
            }
            results.push(outcome);
        }

        let completed = results.iter().filter(|r| r.is_ok()).count();
        CompletionReport {
            total,
            completed,
            failed: total - completed,
            results,
            success_rate: if total == 0 { 0.0 } else { completed as f64 / total as f64 },
        }
    }

    /// Re-evaluate the channel budget against the monitor.
    ///
    /// The recommendation is computed from the configured maximum, so the
    /// budget returns to full size once pressure subsides. Returns the new
    /// size when it changed.
    pub fn rebalance(&self) -> Option<usize> {
        self.shared.rebalance()
    }

    pub fn get_status(&self) -> ProcessorStatus {
        let shared = &self.shared;
        let gate = shared.gate.snapshot();
        let queue_size = shared.queued.load(Ordering::Acquire);
        // The monitoring loop keeps history fresh; sample live only before its first tick.
        let metrics = shared
            .monitor
            .latest()
            .or_else(|| shared.monitor.get_current_metrics(queue_size).ok());

        ProcessorStatus {
            state: *shared.state(),
            current_workers: gate.limit,
            active_tasks: gate.active,
            active_downloads: shared.active_downloads.load(Ordering::Acquire),
            queue_size,
            completed_tasks: shared.completed.load(Ordering::Acquire),
            failed_tasks: shared.failed.load(Ordering::Acquire),
            cancelled_tasks: shared.cancelled.load(Ordering::Acquire),
            channel_slots_available: gate.limit.saturating_sub(gate.active),
            download_slots_available: shared.downloads.available_permits(),
            cpu_percent: metrics.as_ref().map(|m| m.cpu_percent),
            memory_percent: metrics.as_ref().map(|m| m.memory_percent),
            resource_status: metrics.map(|m| m.status),
        }
    }

    pub fn failed_tasks(&self) -> Vec<FailedTask> {
        self.shared
            .failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn task_record(&self, task_id: &str) -> Option<TaskRecord> {
        self.shared.records().get(task_id).cloned()
    }

    /// Stop accepting work, drain in-flight tasks, stop the monitor.
    ///
    /// Idempotent. Tasks still running after the grace period keep running
    /// detached; their outcomes still reach their handles.
    pub async fn stop(&self) {
        {
            let mut state = self.shared.state();
            if *state == ProcessorState::Stopped {
                return;
            }
            *state = ProcessorState::Stopped;
        }

        self.shared.downloads.close();
        self.shared.shutdown.cancel();
        self.shared.tracker.close();

        let grace = self.shared.config.shutdown_grace;
        if tokio::time::timeout(grace, self.shared.tracker.wait()).await.is_err() {
            warn!(
                still_running = self.shared.tracker.len(),
                ?grace,
                "Shutdown grace period elapsed with tasks in flight"
            );
        }
        self.shared.monitor.stop_monitoring();

        info!(
            completed = self.shared.completed.load(Ordering::Acquire),
            failed = self.shared.failed.load(Ordering::Acquire),
            "Concurrent processor stopped"
        );
    }
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, ProcessorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn records(&self) -> MutexGuard<'_, HashMap<String, TaskRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn on_submitted(&self, task_id: &str, kind: TaskKind, priority: TaskPriority) {
        self.records().insert(
            task_id.to_string(),
            TaskRecord {
                task_id: task_id.to_string(),
                kind,
                priority,
                submitted_at: Utc::now(),
                started_at: None,
                finished_at: None,
                succeeded: None,
            },
        );
        debug!(task_id, kind = kind.as_str(), ?priority, "Task submitted");
        self.sink.emit(ProcessorEvent::submitted(task_id, kind, priority));
    }

    fn on_started(&self, task_id: &str, kind: TaskKind) {
        if let Some(record) = self.records().get_mut(task_id) {
            record.started_at = Some(Utc::now());
        }
        self.sink.emit(ProcessorEvent::started(task_id, kind));
    }

    fn on_finished(&self, task_id: &str, succeeded: bool) {
        if let Some(record) = self.records().get_mut(task_id) {
            record.finished_at = Some(Utc::now());
            record.succeeded = Some(succeeded);
        }
    }

    fn on_completed(&self, task_id: &str, kind: TaskKind, elapsed: Duration) {
        self.on_finished(task_id, true);
        self.completed.fetch_add(1, Ordering::AcqRel);
        let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        debug!(task_id, kind = kind.as_str(), elapsed_ms, "Task completed");
        self.sink.emit(ProcessorEvent::completed(task_id, kind, elapsed_ms));
    }

    fn on_failed(&self, task_id: &str, kind: TaskKind, raw_reason: &str) {
        self.on_finished(task_id, false);
        self.failed.fetch_add(1, Ordering::AcqRel);
        let reason = sanitize_error_message(raw_reason, DEFAULT_MAX_FIELD_LENGTH);
        error!(task_id, kind = kind.as_str(), error = %reason, "Task failed");
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(FailedTask {
                task_id: task_id.to_string(),
                kind,
                reason: reason.clone(),
                failed_at: Utc::now(),
            });
        self.sink.emit(ProcessorEvent::failed(task_id, kind, reason));
    }

    fn rebalance(&self) -> Option<usize> {
        let ceiling = self.config.max_concurrent_channels.max(1);
        let recommended = self
            .monitor
            .get_recommended_concurrency(ceiling)
            .clamp(1, ceiling);

        if let Some(latest) = self.monitor.latest() {
            if latest.status != ResourceStatus::Normal {
                self.sink.emit(ProcessorEvent::ResourceWarning {
                    status: latest.status,
                    cpu_percent: latest.cpu_percent,
                    memory_percent: latest.memory_percent,
                });
            }
        }

        let current = self.gate.snapshot().limit;
        if recommended == current {
            return None;
        }
        let previous = self.gate.set_limit(recommended);
        info!(from = previous, to = recommended, "Resized channel worker budget");
        self.sink.emit(ProcessorEvent::PoolResized {
            from: previous,
            to: recommended,
        });
        Some(recommended)
    }
}

async fn execute<T, E, F>(
    shared: &Shared,
    task_id: &str,
    kind: TaskKind,
    control: &TaskControl,
    body: F,
    tx: oneshot::Sender<Result<T, TaskError<E>>>,
) where
    T: Send + 'static,
    E: fmt::Display + Send + 'static,
    F: FnOnce() -> Result<T, E> + Send + 'static,
{
    if !control.begin() {
        shared.cancelled.fetch_add(1, Ordering::AcqRel);
        shared.on_finished(task_id, false);
        debug!(task_id, "Task cancelled before start");
        let _ = tx.send(Err(TaskError::Cancelled));
        return;
    }

    shared.on_started(task_id, kind);
    let started = Instant::now();
    let outcome = match tokio::task::spawn_blocking(body).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(TaskError::Failed(e)),
        Err(join) => Err(TaskError::Panicked(panic_message(join))),
    };

    match &outcome {
        Ok(_) => shared.on_completed(task_id, kind, started.elapsed()),
        Err(TaskError::Failed(e)) => shared.on_failed(task_id, kind, &e.to_string()),
        Err(other) => shared.on_failed(task_id, kind, &other.to_string()),
    }
    let _ = tx.send(outcome);
}

fn panic_message(join: JoinError) -> String {
    if join.is_cancelled() {
        return "blocking task was cancelled".to_string();
    }
    let payload = join.into_panic();
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string())
}

async fn rebalance_loop(shared: Weak<Shared>, period: Duration, shutdown: CancellationToken) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick fires immediately; skip it so the monitor has samples.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Some(shared) = shared.upgrade() else { break };
                shared.rebalance();
            }
            () = shutdown.cancelled() => break,
        }
    }
}
