//! The row pipeline: pending rows in, recorded outcomes out.
//!
//! # Flow
//!
//! 1. Make sure the CSV carries every tracking column
//! 2. Collect pending (row, kind) work in file order
//! 3. Submit one download task per pair; submission waits for a free slot
//! 4. Each task downloads, writes its sidecar, uploads, and persists its own
//!    outcome, so finished work is recorded even if the run is interrupted
//! 5. Tasks that never produced an outcome (panics) are recorded as failures
//! 6. On interruption the processor is stopped first, then every outcome that
//!    arrived during shutdown is still counted

use std::collections::{HashMap, VecDeque};
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rowtrack_core::{
    DownloadKind, DownloadResult, KindFilter, MediaDownloader, ObjectStore, RowContext,
};
use rowtrack_csv::{CsvManager, PendingRow};
use rowtrack_runtime::{ConcurrentProcessor, ProcessorStatus, TaskError, TaskHandle};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::PipelineError;
use crate::job::{Job, JobOutcome};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOptions {
    pub filter: KindFilter,
    /// Only this row, when set.
    pub row_id: Option<String>,
    /// Also retry rows whose last attempt failed.
    pub include_failed: bool,
    /// Failed kinds with this many attempts are left alone.
    pub retry_attempts: u32,
    /// Upper bound on rows taken from the pending list.
    pub max_rows: Option<usize>,
    /// List the work without downloading or writing.
    pub dry_run: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            filter: KindFilter::Both,
            row_id: None,
            include_failed: false,
            retry_attempts: 3,
            max_rows: None,
            dry_run: false,
        }
    }
}

/// One (row, kind) pair the run would download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedDownload {
    pub row_id: String,
    pub row_index: usize,
    pub name: String,
    pub row_type: String,
    pub email: String,
    pub kind: DownloadKind,
    pub urls: Vec<String>,
    pub attempts: u32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    /// Pairs handed to a downloader.
    pub attempted: usize,
    pub succeeded: usize,
    /// Failures, permanent ones included.
    pub failed: usize,
    pub permanent: usize,
    /// Pairs whose outcome could not be written to the CSV.
    pub persist_failures: usize,
    pub uploaded_files: usize,
    /// Pairs still running when the run was cut short.
    pub unfinished: usize,
    pub interrupted: bool,
    pub planned: Vec<PlannedDownload>,
    pub final_status: Option<ProcessorStatus>,
}

impl RunSummary {
    /// True when every attempted pair succeeded and was recorded.
    pub const fn is_clean(&self) -> bool {
        self.failed == 0 && self.persist_failures == 0 && self.unfinished == 0 && !self.interrupted
    }

    fn record(&mut self, outcome: &JobOutcome) {
        if outcome.result.success() {
            self.succeeded += 1;
        } else {
            self.failed += 1;
            if outcome.result.permanent_failure() {
                self.permanent += 1;
            }
        }
        if !outcome.persisted {
            self.persist_failures += 1;
        }
        self.uploaded_files += outcome.uploaded_files;
    }
}

/// Drives pending rows through the processor and the collaborators.
pub struct RowPipeline {
    csv: Arc<CsvManager>,
    processor: ConcurrentProcessor,
    downloaders: HashMap<DownloadKind, Arc<dyn MediaDownloader>>,
    store: Option<Arc<dyn ObjectStore>>,
    downloads_dir: PathBuf,
}

impl RowPipeline {
    pub fn new(csv: Arc<CsvManager>, processor: ConcurrentProcessor, downloads_dir: impl Into<PathBuf>) -> Self {
        Self {
            csv,
            processor,
            downloaders: HashMap::new(),
            store: None,
            downloads_dir: downloads_dir.into(),
        }
    }

    /// Register the downloader for its kind, replacing any previous one.
    #[must_use]
    pub fn with_downloader(mut self, downloader: Arc<dyn MediaDownloader>) -> Self {
        self.downloaders.insert(downloader.kind(), downloader);
        self
    }

    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn csv(&self) -> &CsvManager {
        &self.csv
    }

    pub const fn processor(&self) -> &ConcurrentProcessor {
        &self.processor
    }

    /// Pending work after applying the row filter and row cap.
    pub fn plan(&self, options: &PipelineOptions) -> Result<Vec<PlannedDownload>, PipelineError> {
        plan_with(&self.csv, options)
    }

    /// Run once. The processor is stopped afterwards, so a pipeline runs a
    /// single time.
    ///
    /// Cancelling `cancel` stops new submissions; tasks already running
    /// finish and record their own outcomes within the shutdown grace period.
    /// Only tasks still running after the grace period count as unfinished.
    pub async fn run(self, options: PipelineOptions, cancel: CancellationToken) -> Result<RunSummary, PipelineError> {
        if options.dry_run {
            let planned = self.plan(&options)?;
            info!(pairs = planned.len(), "Dry run, nothing downloaded");
            return Ok(RunSummary {
                planned,
                ..RunSummary::default()
            });
        }

        let csv = Arc::clone(&self.csv);
        let ensured = tokio::task::spawn_blocking(move || csv.ensure_tracking_columns())
            .await
            .map_err(|e| PipelineError::Join(e.to_string()))?;
        if !ensured {
            return Err(PipelineError::Schema(self.csv.path().display().to_string()));
        }

        let csv = Arc::clone(&self.csv);
        let plan_options = options.clone();
        let planned = tokio::task::spawn_blocking(move || plan_with(&csv, &plan_options))
            .await
            .map_err(|e| PipelineError::Join(e.to_string()))??;
        let mut summary = RunSummary::default();
        if planned.is_empty() {
            info!("No pending downloads");
            return Ok(summary);
        }

        self.processor.start()?;
        info!(pairs = planned.len(), "Starting downloads");

        let mut pending: VecDeque<(TaskHandle<JobOutcome, Infallible>, RowContext, DownloadKind)> =
            VecDeque::with_capacity(planned.len());
        for item in &planned {
            let Some(job) = self.job_for(item) else {
                continue;
            };
            let (ctx, kind) = (job.ctx.clone(), job.kind);
            let task_id = job.task_id();
            let submitted = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    summary.interrupted = true;
                    break;
                }
                submitted = self.processor.submit_download_task(task_id, move || Ok::<_, Infallible>(job.run())) => submitted,
            };
            match submitted {
                Ok(handle) => pending.push_back((handle, ctx, kind)),
                Err(e) => {
                    error!(error = %e, "Stopped submitting downloads");
                    break;
                }
            }
        }
        summary.attempted = pending.len();

        // One deadline shared by the whole batch.
        let deadline = Instant::now() + self.processor.config().task_timeout;
        while let Some((mut handle, ctx, kind)) = pending.pop_front() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let waited = tokio::select! {
                outcome = handle.result(remaining) => Some(outcome),
                () = cancel.cancelled() => None,
            };
            let Some(outcome) = waited else {
                warn!(in_flight = pending.len() + 1, "Run interrupted, waiting for in-flight downloads to record their outcomes");
                summary.interrupted = true;
                pending.push_front((handle, ctx, kind));
                break;
            };
            self.settle(outcome, ctx, kind, &mut summary).await;
        }

        self.processor.stop().await;
        // Downloads that finished during shutdown already hold their outcome.
        for (mut handle, ctx, kind) in pending {
            let outcome = handle.result(Duration::ZERO).await;
            self.settle(outcome, ctx, kind, &mut summary).await;
        }

        summary.final_status = Some(self.processor.get_status());
        info!(
            attempted = summary.attempted,
            succeeded = summary.succeeded,
            failed = summary.failed,
            permanent = summary.permanent,
            persist_failures = summary.persist_failures,
            unfinished = summary.unfinished,
            interrupted = summary.interrupted,
            "Run finished"
        );
        Ok(summary)
    }

    fn job_for(&self, item: &PlannedDownload) -> Option<Job> {
        let Some(downloader) = self.downloaders.get(&item.kind) else {
            warn!(kind = %item.kind, row_id = %item.row_id, "No downloader registered, skipping");
            return None;
        };
        let ctx = RowContext::new(
            item.row_id.as_str(),
            item.row_index,
            item.row_type.as_str(),
            item.name.as_str(),
            item.email.as_str(),
        );
        Some(Job {
            ctx,
            kind: item.kind,
            urls: item.urls.clone(),
            downloader: Arc::clone(downloader),
            store: self.store.clone(),
            csv: Arc::clone(&self.csv),
            downloads_dir: self.downloads_dir.clone(),
        })
    }

    /// Fold one task's outcome into the summary, recording failures the task
    /// could not record itself.
    async fn settle(
        &self,
        outcome: Result<JobOutcome, TaskError<Infallible>>,
        ctx: RowContext,
        kind: DownloadKind,
        summary: &mut RunSummary,
    ) {
        match outcome {
            Ok(outcome) => summary.record(&outcome),
            Err(TaskError::Failed(never)) => match never {},
            Err(TaskError::Panicked(message)) => {
                let result = DownloadResult::failed(ctx, kind, format!("worker panicked: {message}"));
                let csv = Arc::clone(&self.csv);
                let persist = tokio::task::spawn_blocking(move || {
                    let ok = csv.update_download_status(result.row_context().row_index(), kind, &result);
                    (result, ok)
                })
                .await;
                match persist {
                    Ok((result, persisted)) => summary.record(&JobOutcome {
                        result,
                        uploaded_files: 0,
                        persisted,
                    }),
                    Err(e) => {
                        error!(error = %e, "Failed to record a panicked download");
                        summary.failed += 1;
                        summary.persist_failures += 1;
                    }
                }
            }
            Err(TaskError::Timeout(after)) => {
                warn!(row_id = %ctx.row_id(), kind = %kind, ?after, "Download still running at the deadline");
                summary.unfinished += 1;
            }
            Err(TaskError::Cancelled) => {
                debug!(row_id = %ctx.row_id(), kind = %kind, "Download cancelled before it started");
                summary.unfinished += 1;
            }
        }
    }
}

fn plan_with(csv: &CsvManager, options: &PipelineOptions) -> Result<Vec<PlannedDownload>, PipelineError> {
    let rows = csv.pending_work(options.filter, options.include_failed, options.retry_attempts)?;
    let rows: Vec<PendingRow> = rows
        .into_iter()
        .filter(|row| {
            options
                .row_id
                .as_deref()
                .is_none_or(|id| row.context.row_id() == id.trim())
        })
        .take(options.max_rows.unwrap_or(usize::MAX))
        .collect();

    if let (Some(id), true) = (&options.row_id, rows.is_empty()) {
        warn!(row_id = %id, "Row not found or has no pending downloads");
    }

    Ok(rows
        .into_iter()
        .flat_map(|row| {
            let ctx = row.context;
            row.work.into_iter().map(move |work| PlannedDownload {
                row_id: ctx.row_id().to_string(),
                row_index: ctx.row_index(),
                name: ctx.name().to_string(),
                row_type: ctx.row_type().to_string(),
                email: ctx.email().to_string(),
                kind: work.kind,
                urls: work.urls,
                attempts: work.attempts,
            })
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowtrack_core::{NoopProgressSink, ProbeError, ProbeReading, ResourceProbe};
    use rowtrack_csv::CsvManagerConfig;
    use rowtrack_download::LocalObjectStore;
    use rowtrack_runtime::{ProcessorConfig, ResourceMonitor};
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const HEADER: &str = "row_id,name,email,type,processed,youtube_playlist,youtube_status,google_drive,drive_status";

    struct QuietProbe;

    impl ResourceProbe for QuietProbe {
        fn sample(&self) -> Result<ProbeReading, ProbeError> {
            Ok(ProbeReading {
                cpu_percent: 5.0,
                memory_percent: 5.0,
                active_threads: 1,
            })
        }
    }

    #[derive(Clone, Copy)]
    enum Mode {
        Succeed,
        Permanent,
        /// Permanent failure reported after a pause.
        SlowPermanent,
        Panic,
    }

    struct FakeDownloader {
        dir: PathBuf,
        mode: Mode,
        calls: Arc<AtomicUsize>,
    }

    impl MediaDownloader for FakeDownloader {
        fn kind(&self) -> DownloadKind {
            DownloadKind::Youtube
        }

        fn download(&self, _url: &str, ctx: &RowContext) -> DownloadResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.mode {
                Mode::Succeed => {
                    let name = format!("abc123{}.mp4", ctx.filename_suffix());
                    std::fs::create_dir_all(&self.dir).unwrap();
                    std::fs::write(self.dir.join(&name), "video").unwrap();
                    DownloadResult::succeeded(ctx.clone(), DownloadKind::Youtube, vec![name], Some("abc123".into()))
                }
                Mode::Permanent => DownloadResult::permanent(ctx.clone(), DownloadKind::Youtube, "Video unavailable"),
                Mode::SlowPermanent => {
                    std::thread::sleep(Duration::from_millis(300));
                    DownloadResult::permanent(ctx.clone(), DownloadKind::Youtube, "Video unavailable")
                }
                Mode::Panic => panic!("downloader exploded"),
            }
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        csv_path: PathBuf,
        downloads: PathBuf,
        storage: PathBuf,
        calls: Arc<AtomicUsize>,
    }

    fn fixture(rows: &str) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("output.csv");
        std::fs::write(&csv_path, format!("{HEADER}\n{rows}")).unwrap();
        Fixture {
            downloads: dir.path().join("downloads"),
            storage: dir.path().join("storage"),
            csv_path,
            calls: Arc::new(AtomicUsize::new(0)),
            _dir: dir,
        }
    }

    fn manager(path: &Path) -> Arc<CsvManager> {
        let mut config = CsvManagerConfig::for_path(path);
        config.lock_timeout = Duration::from_secs(10);
        config.lock_check_interval = Duration::from_millis(5);
        Arc::new(CsvManager::new(path, config))
    }

    fn pipeline(f: &Fixture, mode: Mode) -> RowPipeline {
        let config = ProcessorConfig {
            max_concurrent_downloads: 2,
            shutdown_grace: Duration::from_secs(5),
            task_timeout: Duration::from_secs(30),
            ..ProcessorConfig::default()
        };
        let monitor = ResourceMonitor::new(config.limits.clone(), Box::new(QuietProbe));
        let processor = ConcurrentProcessor::with_monitor(config, monitor, Box::new(NoopProgressSink::new()));
        RowPipeline::new(manager(&f.csv_path), processor, &f.downloads)
            .with_downloader(Arc::new(FakeDownloader {
                dir: f.downloads.clone(),
                mode,
                calls: Arc::clone(&f.calls),
            }))
            .with_store(Arc::new(LocalObjectStore::new(&f.storage)))
    }

    fn youtube_only() -> PipelineOptions {
        PipelineOptions {
            filter: KindFilter::Only(DownloadKind::Youtube),
            ..PipelineOptions::default()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_run_records_success_sidecar_and_mappings() {
        let f = fixture("1,Alice,a@x,TypeX,,https://youtu.be/dQw4w9WgXcQ,,,\n2,Bob,b@x,TypeY,,https://youtu.be/9bZkp7q19f0,,,\n");
        let summary = pipeline(&f, Mode::Succeed)
            .run(youtube_only(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.attempted, 2);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.uploaded_files, 2);
        assert!(summary.is_clean());

        let table = manager(&f.csv_path).read().unwrap();
        assert_eq!(table.get(0, "youtube_status"), Some("completed"));
        assert_eq!(table.get(0, "youtube_files"), Some("abc123_row1_TypeX.mp4"));
        assert_eq!(table.get(0, "youtube_media_id"), Some("abc123"));
        assert_eq!(table.get(0, "youtube_attempts"), Some("1"));
        assert_ne!(table.get(0, "s3_paths"), Some("{}"));
        assert!(table.get(1, "file_uuids").unwrap().contains("abc123_row2_TypeY.mp4"));
        assert!(f.downloads.join("abc123_row1_TypeX_metadata.json").is_file());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_permanent_failure_is_not_retried() {
        let f = fixture("1,Alice,a@x,TypeX,,https://youtu.be/gone0000001,,,\n");
        let summary = pipeline(&f, Mode::Permanent)
            .run(youtube_only(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.permanent, 1);

        let retry = PipelineOptions {
            include_failed: true,
            ..youtube_only()
        };
        let summary = pipeline(&f, Mode::Succeed).run(retry, CancellationToken::new()).await.unwrap();
        assert_eq!(summary.attempted, 0);
        assert_eq!(f.calls.load(Ordering::SeqCst), 1);

        let table = manager(&f.csv_path).read().unwrap();
        assert_eq!(table.get(0, "youtube_status"), Some("failed"));
        assert_eq!(table.get(0, "permanent_failure"), Some("youtube"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_panicking_downloader_is_recorded_as_failure() {
        let f = fixture("1,Alice,a@x,TypeX,,https://youtu.be/dQw4w9WgXcQ,,,\n");
        let summary = pipeline(&f, Mode::Panic)
            .run(youtube_only(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.permanent, 0);
        assert_eq!(summary.persist_failures, 0);

        let table = manager(&f.csv_path).read().unwrap();
        assert_eq!(table.get(0, "youtube_status"), Some("failed"));
        assert!(table.get(0, "download_errors").unwrap().starts_with("youtube:"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_dry_run_touches_nothing() {
        let f = fixture("1,Alice,a@x,TypeX,,https://youtu.be/a|https://youtu.be/b,,,\n2,Bob,b@x,TypeY,,,,,\n");
        let before = std::fs::read(&f.csv_path).unwrap();
        let options = PipelineOptions {
            dry_run: true,
            ..youtube_only()
        };
        let summary = pipeline(&f, Mode::Succeed).run(options, CancellationToken::new()).await.unwrap();

        assert_eq!(summary.attempted, 0);
        assert_eq!(summary.planned.len(), 1);
        assert_eq!(summary.planned[0].row_id, "1");
        assert_eq!(summary.planned[0].urls, ["https://youtu.be/a", "https://youtu.be/b"]);
        assert_eq!(f.calls.load(Ordering::SeqCst), 0);
        assert_eq!(std::fs::read(&f.csv_path).unwrap(), before);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_row_id_filter() {
        let f = fixture("1,Alice,a@x,TypeX,,https://youtu.be/a,,,\n2,Bob,b@x,TypeY,,https://youtu.be/b,,,\n");
        let options = PipelineOptions {
            row_id: Some("2".into()),
            ..youtube_only()
        };
        let summary = pipeline(&f, Mode::Succeed).run(options, CancellationToken::new()).await.unwrap();
        assert_eq!(summary.attempted, 1);

        let table = manager(&f.csv_path).read().unwrap();
        assert_eq!(table.get(0, "youtube_status"), Some(""));
        assert_eq!(table.get(1, "youtube_status"), Some("completed"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancelled_run_submits_nothing() {
        let f = fixture("1,Alice,a@x,TypeX,,https://youtu.be/a,,,\n");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let summary = pipeline(&f, Mode::Succeed).run(youtube_only(), cancel).await.unwrap();
        assert!(summary.interrupted);
        assert_eq!(summary.attempted, 0);
        assert_eq!(f.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_interrupted_run_counts_outcomes_finished_during_shutdown() {
        let f = fixture("1,Alice,a@x,TypeX,,https://youtu.be/a,,,\n2,Bob,b@x,TypeY,,https://youtu.be/b,,,\n");
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let summary = pipeline(&f, Mode::SlowPermanent).run(youtube_only(), cancel).await.unwrap();
        assert!(summary.interrupted);
        assert_eq!(summary.attempted, 2);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.permanent, 2);
        assert_eq!(summary.unfinished, 0);
        assert_eq!(f.calls.load(Ordering::SeqCst), 2);

        let table = manager(&f.csv_path).read().unwrap();
        for row in 0..2 {
            assert_eq!(table.get(row, "youtube_status"), Some("failed"));
            assert_eq!(table.get(row, "permanent_failure"), Some("youtube"));
        }
    }
}
