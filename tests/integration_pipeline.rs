//! End-to-end runs: CSV rows through the processor, fake collaborators, local
//! object storage, and back into the CSV.

mod common;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use common::fixtures::{CsvFixture, manager_for};
use common::probes::FixedProbe;
use rowtrack::domain::{MediaDownloader, NoopProgressSink};
use rowtrack::download::{LocalObjectStore, find_sidecars, read_sidecar};
use rowtrack::store::parse_mapping;
use rowtrack::{
    ConcurrentProcessor, DownloadKind, DownloadResult, PipelineOptions, ProcessorConfig,
    ResourceMonitor, RowContext, RowPipeline,
};
use tokio_util::sync::CancellationToken;

/// Writes one file per call, or fails permanently for URLs containing "gone".
struct FakeDownloader {
    kind: DownloadKind,
    dir: PathBuf,
    calls: Arc<AtomicUsize>,
}

impl MediaDownloader for FakeDownloader {
    fn kind(&self) -> DownloadKind {
        self.kind
    }

    fn download(&self, url: &str, ctx: &RowContext) -> DownloadResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if url.contains("gone") {
            return DownloadResult::permanent(ctx.clone(), self.kind, "HTTP 404 from drive");
        }
        let (media_id, ext) = match self.kind {
            DownloadKind::Youtube => ("abc123", "mp4"),
            DownloadKind::Drive => ("1FileIdAbcdef", "pdf"),
        };
        let name = format!("{media_id}{}.{ext}", ctx.filename_suffix());
        std::fs::create_dir_all(&self.dir).unwrap();
        std::fs::write(self.dir.join(&name), b"payload").unwrap();
        DownloadResult::succeeded(ctx.clone(), self.kind, vec![name], Some(media_id.to_string()))
    }
}

struct Harness {
    fixture: CsvFixture,
    calls: Arc<AtomicUsize>,
}

impl Harness {
    fn new(rows: &str) -> Self {
        Self {
            fixture: CsvFixture::with_rows(rows),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn downloads(&self) -> PathBuf {
        self.fixture.subdir("downloads")
    }

    fn pipeline(&self) -> RowPipeline {
        let config = ProcessorConfig {
            max_concurrent_downloads: 2,
            shutdown_grace: Duration::from_secs(5),
            task_timeout: Duration::from_secs(30),
            ..ProcessorConfig::default()
        };
        let monitor = ResourceMonitor::new(config.limits.clone(), Box::new(FixedProbe::quiet()));
        let processor = ConcurrentProcessor::with_monitor(config, monitor, Box::new(NoopProgressSink::new()));
        let fake = |kind| {
            Arc::new(FakeDownloader {
                kind,
                dir: self.downloads(),
                calls: Arc::clone(&self.calls),
            })
        };
        RowPipeline::new(Arc::new(manager_for(&self.fixture.path)), processor, self.downloads())
            .with_downloader(fake(DownloadKind::Youtube))
            .with_downloader(fake(DownloadKind::Drive))
            .with_store(Arc::new(LocalObjectStore::new(self.fixture.subdir("storage"))))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_alice_row_completes_end_to_end() {
    let harness = Harness::new("1,Alice,alice@example.com,TypeX,yes,https://youtu.be/dQw4w9WgXcQ,,,");

    let summary = harness
        .pipeline()
        .run(PipelineOptions::default(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.attempted, 1);
    assert_eq!(summary.succeeded, 1);
    assert!(summary.is_clean());

    let row = manager_for(&harness.fixture.path).find_row_by_id("1").unwrap().unwrap();
    assert_eq!(row["youtube_status"], "completed");
    assert_eq!(row["youtube_media_id"], "abc123");
    assert_eq!(row["drive_status"], "");

    let s3_paths = parse_mapping(&row["s3_paths"]);
    let file_uuids = parse_mapping(&row["file_uuids"]);
    assert_eq!(s3_paths.len(), 1);
    let uuid = &file_uuids["abc123_row1_TypeX.mp4"];
    assert!(s3_paths[uuid].ends_with(".mp4"));

    let sidecars = find_sidecars(&harness.downloads());
    assert_eq!(sidecars.len(), 1);
    let sidecar = read_sidecar(&sidecars[0]).unwrap();
    assert_eq!(sidecar.row_context().row_id(), "1");
    assert_eq!(sidecar.row_context().name(), "Alice");
    assert!(sidecar.download_result.success);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mixed_kinds_and_permanent_failures() {
    let harness = Harness::new(
        "1,Alice,alice@example.com,TypeX,yes,https://youtu.be/dQw4w9WgXcQ,,https://drive.google.com/file/d/1FileIdAbcdef/view,\n\
         2,Bob,bob@example.com,TypeY,yes,,,https://drive.google.com/file/d/gone0000000000/view,\n\
         3,Carol,carol@example.com,TypeZ,yes,,,,",
    );

    let summary = harness
        .pipeline()
        .run(PipelineOptions::default(), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(summary.attempted, 3);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.permanent, 1);
    assert_eq!(summary.persist_failures, 0);

    let manager = manager_for(&harness.fixture.path);
    let table = manager.read().unwrap();
    assert_eq!(table.get(0, "youtube_status"), Some("completed"));
    assert_eq!(table.get(0, "drive_status"), Some("completed"));
    assert_eq!(table.get(1, "drive_status"), Some("failed"));
    assert_eq!(table.get(1, "permanent_failure"), Some("drive"));
    assert!(table.get(1, "download_errors").unwrap().contains("404"));
    assert_eq!(table.get(2, "youtube_status"), Some(""));

    // A second run with retries enabled finds nothing left to do.
    let calls_before = harness.calls.load(Ordering::SeqCst);
    let retry = PipelineOptions {
        include_failed: true,
        ..PipelineOptions::default()
    };
    let summary = harness.pipeline().run(retry, CancellationToken::new()).await.unwrap();
    assert_eq!(summary.attempted, 0);
    assert_eq!(harness.calls.load(Ordering::SeqCst), calls_before);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dry_run_plans_without_side_effects() {
    let harness = Harness::new("1,Alice,alice@example.com,TypeX,yes,https://youtu.be/dQw4w9WgXcQ,,,");
    let before = harness.fixture.bytes();

    let options = PipelineOptions {
        dry_run: true,
        ..PipelineOptions::default()
    };
    let summary = harness.pipeline().run(options, CancellationToken::new()).await.unwrap();

    assert_eq!(summary.planned.len(), 1);
    assert_eq!(summary.planned[0].kind, DownloadKind::Youtube);
    assert_eq!(summary.attempted, 0);
    assert_eq!(harness.calls.load(Ordering::SeqCst), 0);
    assert_eq!(harness.fixture.bytes(), before);
}
