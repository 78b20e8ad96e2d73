//! Work for one (row, kind) pair, run on a download worker.

use std::path::PathBuf;
use std::sync::Arc;

use rowtrack_core::{
    DownloadKind, DownloadResult, MediaDownloader, ObjectStore, RowContext,
};
use rowtrack_csv::CsvManager;
use rowtrack_download::{upload_artifacts, write_sidecar};
use tracing::{info, warn};

/// What a finished job reports back to the pipeline.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub result: DownloadResult,
    pub uploaded_files: usize,
    /// False when any CSV write for this job failed.
    pub persisted: bool,
}

/// Everything needed to download, store and record one row's links of one kind.
pub(crate) struct Job {
    pub ctx: RowContext,
    pub kind: DownloadKind,
    pub urls: Vec<String>,
    pub downloader: Arc<dyn MediaDownloader>,
    pub store: Option<Arc<dyn ObjectStore>>,
    pub csv: Arc<CsvManager>,
    pub downloads_dir: PathBuf,
}

impl Job {
    pub fn task_id(&self) -> String {
        format!("row{}-{}", self.ctx.row_id(), self.kind)
    }

    /// Download, write the sidecar, upload, then record the outcome.
    pub fn run(self) -> JobOutcome {
        let result = self.downloader.download(&self.urls.join("|"), &self.ctx);
        let result = self.attach_sidecar(result);

        let mut persisted = true;
        let mut uploaded_files = 0;
        if let (Some(store), true) = (&self.store, result.success()) {
            let uploaded = upload_artifacts(store.as_ref(), &self.downloads_dir, result.files_downloaded());
            uploaded_files = uploaded.file_uuids.len();
            if !uploaded.s3_paths.is_empty() {
                persisted &= self.csv.update_s3_mappings(
                    self.ctx.row_id(),
                    &uploaded.s3_paths,
                    &uploaded.file_uuids,
                );
            }
        }

        persisted &= self
            .csv
            .update_download_status(self.ctx.row_index(), self.kind, &result);

        info!(
            row_id = %self.ctx.row_id(),
            kind = %self.kind,
            success = result.success(),
            permanent = result.permanent_failure(),
            uploaded_files,
            persisted,
            "Row download finished"
        );
        JobOutcome {
            result,
            uploaded_files,
            persisted,
        }
    }

    fn attach_sidecar(&self, result: DownloadResult) -> DownloadResult {
        if !result.success() {
            return result;
        }
        match write_sidecar(&self.downloads_dir, &result) {
            Ok(path) => match path.file_name() {
                Some(name) => {
                    let name = name.to_string_lossy().into_owned();
                    result.with_metadata_file(name)
                }
                None => result,
            },
            Err(e) => {
                warn!(row_id = %self.ctx.row_id(), kind = %self.kind, error = %e, "Failed to write metadata sidecar");
                result
            }
        }
    }
}
