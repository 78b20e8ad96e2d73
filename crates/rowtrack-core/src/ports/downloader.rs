//! Media downloader port.

use crate::row::{DownloadResult, RowContext};
use crate::status::DownloadKind;

/// A collaborator that fetches one URL on behalf of one row.
///
/// Implementations are blocking and run on worker threads. They never
/// return errors: every failure is folded into a failed [`DownloadResult`],
/// with `permanent_failure` set when retrying cannot help.
pub trait MediaDownloader: Send + Sync {
    /// Which tracking columns results from this downloader update.
    fn kind(&self) -> DownloadKind;

    fn download(&self, url: &str, ctx: &RowContext) -> DownloadResult;
}
