//! Folding per-URL attempts into one [`DownloadResult`].

use std::path::{Path, PathBuf};

use rowtrack_core::{
    DEFAULT_MAX_FIELD_LENGTH, DownloadKind, DownloadResult, RowContext, sanitize_csv_field,
};

use crate::error::CollaboratorError;

/// Everything one row's cell produced across its URLs.
#[derive(Debug, Default)]
pub(crate) struct Attempts {
    pub files: Vec<String>,
    pub media_ids: Vec<String>,
    pub errors: Vec<CollaboratorError>,
}

impl Attempts {
    /// Record downloaded paths by file name.
    pub fn add_paths(&mut self, paths: &[PathBuf]) {
        self.files.extend(
            paths
                .iter()
                .filter_map(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned()),
        );
    }

    pub fn add_path(&mut self, path: &Path) {
        self.add_paths(&[path.to_path_buf()]);
    }

    /// Any file counts as success. A failure is permanent only when every
    /// URL failed permanently.
    pub fn into_result(self, ctx: &RowContext, kind: DownloadKind) -> DownloadResult {
        let media_id = if self.media_ids.is_empty() {
            None
        } else {
            Some(self.media_ids.join(","))
        };

        if !self.files.is_empty() {
            return DownloadResult::succeeded(ctx.clone(), kind, self.files, media_id);
        }

        if self.errors.is_empty() {
            return DownloadResult::permanent(ctx.clone(), kind, format!("No {kind} URL provided"))
                .with_media_id(media_id);
        }

        let message = self
            .errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        let message = sanitize_csv_field(&message, DEFAULT_MAX_FIELD_LENGTH);
        let result = if self.errors.iter().all(CollaboratorError::is_permanent) {
            DownloadResult::permanent(ctx.clone(), kind, message)
        } else {
            DownloadResult::failed(ctx.clone(), kind, message)
        };
        result.with_media_id(media_id)
    }
}
