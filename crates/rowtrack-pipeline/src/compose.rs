//! Default wiring of a pipeline from [`Settings`].

use std::sync::Arc;

use rowtrack_core::{ProgressSink, Settings};
use rowtrack_csv::CsvManager;
use rowtrack_download::{DriveDownloader, LocalObjectStore, YtDlpDownloader};
use rowtrack_runtime::{ConcurrentProcessor, ProcessorConfig};

use crate::pipeline::RowPipeline;

/// Pipeline with the rate-limited yt-dlp and Drive downloaders and local
/// object storage.
pub fn pipeline_from_settings(settings: &Settings, sink: Box<dyn ProgressSink>) -> RowPipeline {
    let csv = Arc::new(CsvManager::from_settings(settings));
    let processor = ConcurrentProcessor::new(ProcessorConfig::from_settings(settings), sink);
    RowPipeline::new(csv, processor, settings.paths.downloads_dir.clone())
        .with_downloader(Arc::new(YtDlpDownloader::from_settings(settings)))
        .with_downloader(Arc::new(DriveDownloader::from_settings(settings)))
        .with_store(Arc::new(LocalObjectStore::new(settings.paths.storage_dir.clone())))
}
