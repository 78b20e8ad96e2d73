//! YouTube collaborator backed by the `yt-dlp` executable.
//!
//! # Design
//!
//! - One `yt-dlp` process per URL, bounded by a hard timeout
//! - Files are named `{video_id}_row{row_id}_{type}.{ext}` so every artifact
//!   points back at its row
//! - Exit failures whose output names removed or private content are
//!   permanent; everything else goes through the shared backoff policy
//! - Every `yt-dlp` run, retries included, takes a token from the YouTube
//!   rate limiter first

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use rowtrack_core::{
    BackoffPolicy, DownloadKind, DownloadResult, MediaDownloader, RateLimitSettings, RateLimiter,
    RowContext, Settings,
};
use tracing::{debug, info, warn};

use crate::error::CollaboratorError;
use crate::outcome::Attempts;
use crate::process::run_with_timeout;

static VIDEO_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:v=|youtu\.be/|/shorts/|/embed/|/live/)([A-Za-z0-9_-]{11})")
        .expect("static regex")
});
static LIST_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[?&]list=([A-Za-z0-9_-]+)").expect("static regex"));
static VIDEO_IDS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"video_ids=([A-Za-z0-9_,%-]+)").expect("static regex"));
static BARE_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{11}$").expect("static regex"));

/// True for URLs on a YouTube host.
pub fn is_youtube_url(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    lower.contains("youtube.com/") || lower.contains("youtu.be/")
}

/// Identifier recorded for a URL.
///
/// - `watch_videos?video_ids=a,b` yields the comma-joined valid ids
/// - a `list=` parameter yields the playlist id
/// - anything else yields the single video id
pub fn extract_media_id(url: &str) -> Option<String> {
    if url.contains("watch_videos") {
        if let Some(caps) = VIDEO_IDS_RE.captures(url) {
            let raw = caps[1].replace("%2C", ",").replace("%2c", ",");
            let ids: Vec<&str> = raw.split(',').filter(|s| BARE_ID_RE.is_match(s)).collect();
            if !ids.is_empty() {
                return Some(ids.join(","));
            }
        }
    }
    if let Some(caps) = LIST_RE.captures(url) {
        return Some(caps[1].to_string());
    }
    VIDEO_ID_RE.captures(url).map(|caps| caps[1].to_string())
}

/// `yt-dlp` format selector capped at `resolution` lines.
pub fn format_selector(resolution: &str) -> String {
    format!("bestvideo[height<={resolution}]+bestaudio/best[height<={resolution}]/best")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YtDlpConfig {
    pub program: PathBuf,
    pub output_dir: PathBuf,
    /// Container passed to `--merge-output-format`.
    pub container: String,
    pub resolution: String,
    pub timeout: Duration,
    /// Upper bound on items fetched from one playlist.
    pub max_videos: Option<usize>,
    pub retry: BackoffPolicy,
}

impl YtDlpConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        let downloads = &settings.downloads;
        Self {
            program: PathBuf::from(&downloads.ytdlp_path),
            output_dir: settings.paths.downloads_dir.clone(),
            container: downloads.youtube_format.clone(),
            resolution: downloads.youtube_resolution.clone(),
            timeout: Duration::from_secs(downloads.subprocess_timeout_seconds),
            max_videos: downloads.max_videos,
            retry: BackoffPolicy::from_settings(&settings.retry),
        }
    }
}

#[derive(Debug, Clone)]
pub struct YtDlpDownloader {
    config: YtDlpConfig,
    limiter: Arc<RateLimiter>,
}

impl YtDlpDownloader {
    /// Downloader limited at the default YouTube rate.
    pub fn new(config: YtDlpConfig) -> Self {
        let limiter = RateLimiter::for_kind(&RateLimitSettings::default(), DownloadKind::Youtube);
        Self {
            config,
            limiter: Arc::new(limiter),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(YtDlpConfig::from_settings(settings)).with_rate_limiter(Arc::new(
            RateLimiter::for_kind(&settings.rate_limits, DownloadKind::Youtube),
        ))
    }

    #[must_use]
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub const fn config(&self) -> &YtDlpConfig {
        &self.config
    }

    fn command(&self, url: &str, ctx: &RowContext) -> Command {
        // `%` starts a yt-dlp template field
        let suffix = ctx.filename_suffix().replace('%', "%%");
        let template = self
            .config
            .output_dir
            .join(format!("%(id)s{suffix}.%(ext)s"));

        let mut cmd = Command::new(&self.config.program);
        cmd.arg("-f")
            .arg(format_selector(&self.config.resolution))
            .arg("--merge-output-format")
            .arg(&self.config.container)
            .arg("--no-progress")
            .arg("--no-simulate")
            .arg("--print")
            .arg("after_move:filepath")
            .arg("--output")
            .arg(template);
        if let Some(max) = self.config.max_videos {
            cmd.arg("--playlist-end").arg(max.to_string());
        }
        cmd.arg(url);
        cmd
    }

    /// Download one URL, returning the paths `yt-dlp` reported.
    pub fn download_url(&self, url: &str, ctx: &RowContext) -> Result<Vec<PathBuf>, CollaboratorError> {
        if !is_youtube_url(url) {
            return Err(CollaboratorError::InvalidUrl(url.to_string()));
        }
        std::fs::create_dir_all(&self.config.output_dir)
            .map_err(|e| CollaboratorError::io(&self.config.output_dir, &e))?;

        self.config.retry.retry(
            |attempt| {
                self.limiter.acquire()?;
                debug!(url = %url, attempt = attempt + 1, "Running yt-dlp");
                let output = run_with_timeout(self.command(url, ctx), self.config.timeout)?;
                if !output.success {
                    return Err(CollaboratorError::ExitStatus {
                        program: self.config.program.display().to_string(),
                        code: output.code,
                        stderr: last_error_line(&output.stderr),
                    });
                }
                let files = reported_files(&output.stdout, &self.config.output_dir);
                if files.is_empty() {
                    Err(CollaboratorError::NoFiles)
                } else {
                    Ok(files)
                }
            },
            CollaboratorError::is_retryable,
        )
    }
}

impl MediaDownloader for YtDlpDownloader {
    fn kind(&self) -> DownloadKind {
        DownloadKind::Youtube
    }

    fn download(&self, url: &str, ctx: &RowContext) -> DownloadResult {
        let mut attempts = Attempts::default();
        for link in crate::split_urls(url) {
            if let Some(id) = extract_media_id(link) {
                attempts.media_ids.push(id);
            }
            match self.download_url(link, ctx) {
                Ok(paths) => {
                    info!(row_id = %ctx.row_id(), url = %link, files = paths.len(), "YouTube download finished");
                    attempts.add_paths(&paths);
                }
                Err(e) => {
                    warn!(row_id = %ctx.row_id(), url = %link, permanent = e.is_permanent(), "YouTube download failed");
                    attempts.errors.push(e);
                }
            }
        }
        attempts.into_result(ctx, DownloadKind::Youtube)
    }
}

/// Lines of `--print after_move:filepath` output that name existing files.
fn reported_files(stdout: &str, output_dir: &Path) -> Vec<PathBuf> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| {
            let p = PathBuf::from(l);
            if p.is_absolute() { p } else { output_dir.join(p) }
        })
        .filter(|p| p.is_file())
        .collect()
}

/// The most informative line of stderr, preferring `ERROR:` lines.
fn last_error_line(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    lines
        .iter()
        .rev()
        .find(|l| l.starts_with("ERROR"))
        .or_else(|| lines.last())
        .map(|l| (*l).to_string())
        .unwrap_or_default()
}
