//! Google Drive collaborator over plain HTTP.
//!
//! Public files are fetched through the `uc?export=download` endpoint. Large
//! files answer with a virus-scan interstitial whose form carries the
//! `confirm` token needed for the real download. Folder links are expanded
//! by scraping file ids out of the folder page. Each file fetch and each
//! folder listing takes a token from the Drive rate limiter.
//!
//! The blocking client is built per call; downloads always run on worker
//! threads, never on the async runtime.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use reqwest::blocking::{Client, Response};
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use rowtrack_core::{
    BackoffPolicy, DEFAULT_MAX_FIELD_LENGTH, DownloadKind, DownloadResult, MediaDownloader,
    RateLimitSettings, RateLimiter, RowContext, Settings, sanitize_error_message,
};
use tracing::{debug, info, warn};

use crate::error::CollaboratorError;
use crate::outcome::Attempts;

static FILE_PATH_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/file/d/([A-Za-z0-9_-]+)").expect("static regex"));
static QUERY_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[?&](?:id|file_id|fileId|docid)=([A-Za-z0-9_-]+)").expect("static regex")
});
static FOLDER_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/folders/([A-Za-z0-9_-]+)").expect("static regex"));
static VALID_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("static regex"));
static CONFIRM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"name="confirm"\s+value="([^"]+)""#).expect("static regex"));
static UUID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"name="uuid"\s+value="([^"]+)""#).expect("static regex"));
static FOLDER_ENTRY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:/file/d/|data-id=")([A-Za-z0-9_-]+)"#).expect("static regex")
});
static DISPOSITION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"filename="?([^";]+)"?"#).expect("static regex"));

/// Page fragments that mean the file is not publicly readable.
const ACCESS_DENIED_MARKERS: &[&str] = &[
    "sign in - google accounts",
    "access denied",
    "permission denied",
    "error 404",
    "error 403",
];

/// Folder pages larger than this are not scraped.
const MAX_FOLDER_PAGE_BYTES: usize = 1024 * 1024;

/// Ids shorter than this in folder pages are page chrome, not files.
const MIN_FILE_ID_LEN: usize = 11;

pub fn is_drive_url(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    lower.contains("drive.google.com") || lower.contains("docs.google.com")
}

pub fn is_folder_url(url: &str) -> bool {
    FOLDER_ID_RE.is_match(url)
}

pub fn extract_file_id(url: &str) -> Option<String> {
    FILE_PATH_ID_RE
        .captures(url)
        .or_else(|| QUERY_ID_RE.captures(url))
        .map(|caps| caps[1].to_string())
}

pub fn extract_folder_id(url: &str) -> Option<String> {
    FOLDER_ID_RE.captures(url).map(|caps| caps[1].to_string())
}

/// `confirm` and optional `uuid` values from a virus-scan warning form.
pub fn parse_confirm_form(html: &str) -> Option<(String, Option<String>)> {
    let confirm = CONFIRM_RE.captures(html)?[1].to_string();
    let uuid = UUID_RE.captures(html).map(|caps| caps[1].to_string());
    Some((confirm, uuid))
}

/// File ids linked from a folder page, in page order without duplicates.
pub fn folder_file_ids(html: &str, folder_id: &str) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for caps in FOLDER_ENTRY_RE.captures_iter(html) {
        let id = &caps[1];
        if id.len() >= MIN_FILE_ID_LEN && id != folder_id && !ids.iter().any(|known| known == id) {
            ids.push(id.to_string());
        }
    }
    ids
}

/// File name from a `Content-Disposition` header value.
pub fn filename_from_disposition(header: &str) -> Option<String> {
    let raw = DISPOSITION_RE.captures(header)?[1].trim().to_string();
    let name = Path::new(&raw).file_name()?.to_string_lossy().into_owned();
    (!name.is_empty()).then_some(name)
}

pub fn looks_like_access_denied(html: &str) -> bool {
    let lower = html.to_lowercase();
    ACCESS_DENIED_MARKERS.iter().any(|m| lower.contains(m))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveConfig {
    pub output_dir: PathBuf,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Base for `uc` and folder URLs.
    pub base_url: String,
    /// Endpoint that serves confirmed large-file downloads.
    pub confirm_url: String,
    /// Honour `HTTP(S)_PROXY` environment variables.
    pub use_system_proxy: bool,
    pub retry: BackoffPolicy,
}

impl DriveConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            output_dir: settings.paths.downloads_dir.clone(),
            timeout: Duration::from_secs(settings.downloads.http_timeout_seconds),
            base_url: "https://drive.google.com".to_string(),
            confirm_url: "https://drive.usercontent.google.com/download".to_string(),
            use_system_proxy: true,
            retry: BackoffPolicy::from_settings(&settings.retry),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DriveDownloader {
    config: DriveConfig,
    limiter: Arc<RateLimiter>,
}

impl DriveDownloader {
    /// Downloader limited at the default Drive rate.
    pub fn new(config: DriveConfig) -> Self {
        let limiter = RateLimiter::for_kind(&RateLimitSettings::default(), DownloadKind::Drive);
        Self {
            config,
            limiter: Arc::new(limiter),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(DriveConfig::from_settings(settings)).with_rate_limiter(Arc::new(
            RateLimiter::for_kind(&settings.rate_limits, DownloadKind::Drive),
        ))
    }

    #[must_use]
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = limiter;
        self
    }

    pub const fn config(&self) -> &DriveConfig {
        &self.config
    }

    fn client(&self) -> Result<Client, CollaboratorError> {
        let mut builder = Client::builder()
            .timeout(self.config.timeout)
            .user_agent(concat!("rowtrack/", env!("CARGO_PKG_VERSION")));
        if !self.config.use_system_proxy {
            builder = builder.no_proxy();
        }
        Ok(builder.build()?)
    }

    /// Fetch one file into the output directory and return its path.
    ///
    /// The body is staged in a temporary file next to the destination and
    /// renamed into place only once complete.
    pub fn download_file(
        &self,
        client: &Client,
        file_id: &str,
        ctx: &RowContext,
    ) -> Result<PathBuf, CollaboratorError> {
        if !VALID_ID_RE.is_match(file_id) {
            return Err(CollaboratorError::InvalidUrl(format!("bad Drive file id {file_id}")));
        }

        self.limiter.acquire()?;
        let url = format!("{}/uc?export=download&id={file_id}", self.config.base_url);
        debug!(file_id = %file_id, "Requesting Drive file");
        let mut response = checked(client.get(&url).send()?)?;

        if is_html(&response) {
            let page = response.text()?;
            let Some((confirm, uuid)) = parse_confirm_form(&page) else {
                return Err(classify_page(&page));
            };
            debug!(file_id = %file_id, "Following virus-scan confirmation");
            let mut query = vec![
                ("id", file_id.to_string()),
                ("export", "download".to_string()),
                ("confirm", confirm),
            ];
            if let Some(uuid) = uuid {
                query.push(("uuid", uuid));
            }
            response = checked(client.get(&self.config.confirm_url).query(&query).send()?)?;
            if is_html(&response) {
                return Err(classify_page(&response.text()?));
            }
        }

        let extension = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(filename_from_disposition)
            .and_then(|name| {
                Path::new(&name)
                    .extension()
                    .map(|e| e.to_string_lossy().to_ascii_lowercase())
            });

        self.persist_body(&mut response, file_id, ctx, extension)
    }

    fn persist_body(
        &self,
        response: &mut Response,
        file_id: &str,
        ctx: &RowContext,
        extension: Option<String>,
    ) -> Result<PathBuf, CollaboratorError> {
        let dir = &self.config.output_dir;
        std::fs::create_dir_all(dir).map_err(|e| CollaboratorError::io(dir, &e))?;

        let mut staged = tempfile::NamedTempFile::new_in(dir).map_err(|e| CollaboratorError::io(dir, &e))?;
        let bytes = std::io::copy(response, staged.as_file_mut())
            .map_err(|e| CollaboratorError::Http(format!("body read failed: {e}")))?;
        staged
            .as_file_mut()
            .flush()
            .map_err(|e| CollaboratorError::io(staged.path(), &e))?;

        let extension = match extension {
            Some(ext) => ext,
            None => crate::storage::detect_extension(staged.path()),
        };
        let target = dir.join(format!("{file_id}{}.{extension}", ctx.filename_suffix()));
        staged
            .persist(&target)
            .map_err(|e| CollaboratorError::io(&target, &e.error))?;
        debug!(path = %target.display(), bytes, "Drive file saved");
        Ok(target)
    }

    /// File ids listed on a public folder page.
    pub fn list_folder(&self, client: &Client, folder_id: &str) -> Result<Vec<String>, CollaboratorError> {
        if !VALID_ID_RE.is_match(folder_id) {
            return Err(CollaboratorError::InvalidUrl(format!("bad Drive folder id {folder_id}")));
        }
        self.limiter.acquire()?;
        let url = format!("{}/drive/folders/{folder_id}", self.config.base_url);
        let response = checked(client.get(&url).send()?)?;
        if !is_html(&response) {
            return Err(CollaboratorError::HtmlResponse(
                "folder page is not HTML".to_string(),
            ));
        }
        let page = response.text()?;
        if page.len() > MAX_FOLDER_PAGE_BYTES {
            return Err(CollaboratorError::HtmlResponse(format!(
                "folder page too large ({} bytes)",
                page.len()
            )));
        }
        let ids = folder_file_ids(&page, folder_id);
        if ids.is_empty() && looks_like_access_denied(&page) {
            return Err(classify_page(&page));
        }
        Ok(ids)
    }

    fn fetch_with_retry(
        &self,
        client: &Client,
        file_id: &str,
        ctx: &RowContext,
    ) -> Result<PathBuf, CollaboratorError> {
        self.config.retry.retry(
            |_| self.download_file(client, file_id, ctx),
            CollaboratorError::is_retryable,
        )
    }

    fn download_link(&self, client: &Client, link: &str, ctx: &RowContext, attempts: &mut Attempts) {
        if !is_drive_url(link) {
            attempts.errors.push(CollaboratorError::InvalidUrl(link.to_string()));
            return;
        }

        if let Some(folder_id) = extract_folder_id(link) {
            attempts.media_ids.push(folder_id.clone());
            let listed = self.config.retry.retry(
                |_| self.list_folder(client, &folder_id),
                CollaboratorError::is_retryable,
            );
            match listed {
                Ok(ids) if ids.is_empty() => attempts.errors.push(CollaboratorError::NoFiles),
                Ok(ids) => {
                    info!(folder_id = %folder_id, files = ids.len(), "Expanding Drive folder");
                    for id in ids {
                        match self.fetch_with_retry(client, &id, ctx) {
                            Ok(path) => attempts.add_path(&path),
                            Err(e) => attempts.errors.push(e),
                        }
                    }
                }
                Err(e) => attempts.errors.push(e),
            }
            return;
        }

        let Some(file_id) = extract_file_id(link) else {
            attempts.errors.push(CollaboratorError::InvalidUrl(link.to_string()));
            return;
        };
        attempts.media_ids.push(file_id.clone());
        match self.fetch_with_retry(client, &file_id, ctx) {
            Ok(path) => attempts.add_path(&path),
            Err(e) => attempts.errors.push(e),
        }
    }
}

impl MediaDownloader for DriveDownloader {
    fn kind(&self) -> DownloadKind {
        DownloadKind::Drive
    }

    fn download(&self, url: &str, ctx: &RowContext) -> DownloadResult {
        let client = match self.client() {
            Ok(client) => client,
            Err(e) => return DownloadResult::failed(ctx.clone(), DownloadKind::Drive, e.to_string()),
        };

        let mut attempts = Attempts::default();
        for link in crate::split_urls(url) {
            let before = attempts.errors.len();
            self.download_link(&client, link, ctx, &mut attempts);
            for e in &attempts.errors[before..] {
                warn!(row_id = %ctx.row_id(), url = %link, permanent = e.is_permanent(), "Drive download failed");
            }
        }
        attempts.into_result(ctx, DownloadKind::Drive)
    }
}

fn checked(response: Response) -> Result<Response, CollaboratorError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(CollaboratorError::HttpStatus {
            status: status.as_u16(),
            url: response.url().to_string(),
        })
    }
}

fn is_html(response: &Response) -> bool {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.to_ascii_lowercase().contains("text/html"))
}

fn classify_page(page: &str) -> CollaboratorError {
    let summary = sanitize_error_message(page, DEFAULT_MAX_FIELD_LENGTH);
    if looks_like_access_denied(page) {
        CollaboratorError::AccessDenied(summary)
    } else {
        CollaboratorError::HtmlResponse(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_extract_ids() {
        assert_eq!(
            extract_file_id("https://drive.google.com/file/d/1AbCdEfGhIjKlMn/view?usp=sharing").as_deref(),
            Some("1AbCdEfGhIjKlMn")
        );
        assert_eq!(
            extract_file_id("https://drive.google.com/open?id=1AbCdEfGhIjKlMn").as_deref(),
            Some("1AbCdEfGhIjKlMn")
        );
        assert_eq!(
            extract_file_id("https://docs.google.com/uc?export=download&fileId=XYZ_123-abc").as_deref(),
            Some("XYZ_123-abc")
        );
        assert_eq!(extract_file_id("https://drive.google.com/"), None);
        assert_eq!(
            extract_folder_id("https://drive.google.com/drive/folders/1FolderIdXYZ?usp=share").as_deref(),
            Some("1FolderIdXYZ")
        );
        assert!(is_folder_url("https://drive.google.com/drive/u/0/folders/abc"));
    }

    #[test]
    fn test_confirm_form_and_disposition() {
        let page = r#"<form><input type="hidden" name="confirm" value="t"><input type="hidden" name="uuid" value="u-1"></form>"#;
        assert_eq!(parse_confirm_form(page), Some(("t".into(), Some("u-1".into()))));
        assert_eq!(parse_confirm_form("<html>nothing</html>"), None);
        assert_eq!(
            filename_from_disposition(r#"attachment; filename="report final.pdf""#).as_deref(),
            Some("report final.pdf")
        );
        assert_eq!(
            filename_from_disposition("attachment; filename=../../etc/passwd").as_deref(),
            Some("passwd")
        );
    }

    #[test]
    fn test_folder_scraping_dedups_and_skips_short_ids() {
        let page = r#"<a href="/file/d/1AAAAAAAAAAAA/view"></a><div data-id="1BBBBBBBBBBBB"></div>
            <a href="/file/d/1AAAAAAAAAAAA/view"></a><div data-id="short"></div><div data-id="1FOLDERIDXYZ0"></div>"#;
        assert_eq!(folder_file_ids(page, "1FOLDERIDXYZ0"), vec!["1AAAAAAAAAAAA", "1BBBBBBBBBBBB"]);
    }

    #[test]
    fn test_classify_page() {
        assert!(matches!(
            classify_page("<title>Sign in - Google Accounts</title>"),
            CollaboratorError::AccessDenied(_)
        ));
        let err = classify_page("<html><script>window.x = {}</script><p>Something odd</p></html>");
        assert!(matches!(err, CollaboratorError::HtmlResponse(_)));
        assert!(!err.to_string().contains('<'));
    }

    /// Serve canned HTTP responses, one connection each.
    fn serve(responses: Vec<Vec<u8>>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            for body in responses {
                let Ok((mut stream, _)) = listener.accept() else { return };
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut line = String::new();
                while reader.read_line(&mut line).map(|n| n > 0).unwrap_or(false) {
                    if line == "\r\n" {
                        break;
                    }
                    line.clear();
                }
                let _ = stream.write_all(&body);
            }
        });
        format!("http://{addr}")
    }

    fn response(status: &str, headers: &[(&str, &str)], body: &[u8]) -> Vec<u8> {
        let mut out = format!("HTTP/1.1 {status}\r\nConnection: close\r\nContent-Length: {}\r\n", body.len());
        for (k, v) in headers {
            out.push_str(&format!("{k}: {v}\r\n"));
        }
        out.push_str("\r\n");
        let mut bytes = out.into_bytes();
        bytes.extend_from_slice(body);
        bytes
    }

    fn downloader(base: &str, dir: &Path) -> DriveDownloader {
        DriveDownloader::new(DriveConfig {
            output_dir: dir.to_path_buf(),
            timeout: Duration::from_secs(5),
            base_url: base.to_string(),
            confirm_url: format!("{base}/download"),
            use_system_proxy: false,
            retry: BackoffPolicy::immediate(1),
        })
    }

    fn ctx() -> RowContext {
        RowContext::new("5", 1, "Type 2", "Bob", "b@x")
    }

    #[test]
    fn test_downloads_file_with_disposition_name() {
        let dir = tempfile::tempdir().unwrap();
        let base = serve(vec![response(
            "200 OK",
            &[
                ("Content-Type", "application/pdf"),
                ("Content-Disposition", r#"attachment; filename="notes.pdf""#),
            ],
            b"%PDF-1.4 body",
        )]);
        let result = downloader(&base, dir.path())
            .download("https://drive.google.com/file/d/1FileIdAbcdef/view", &ctx());
        assert!(result.success(), "{:?}", result.error_message());
        assert_eq!(result.files_downloaded(), ["1FileIdAbcdef_row5_Type_2.pdf"]);
        assert_eq!(result.media_id(), Some("1FileIdAbcdef"));
        let saved = std::fs::read(dir.path().join("1FileIdAbcdef_row5_Type_2.pdf")).unwrap();
        assert_eq!(saved, b"%PDF-1.4 body");
    }

    #[test]
    fn test_follows_virus_scan_confirmation() {
        let dir = tempfile::tempdir().unwrap();
        let warning = br#"<html><title>Virus scan warning</title><form><input name="confirm" value="tok"><input name="uuid" value="abc"></form></html>"#;
        let base = serve(vec![
            response("200 OK", &[("Content-Type", "text/html; charset=utf-8")], warning),
            response("200 OK", &[("Content-Type", "application/octet-stream")], b"big file bytes"),
        ]);
        let result = downloader(&base, dir.path())
            .download("https://drive.google.com/uc?id=1LargeFileIdX", &ctx());
        assert!(result.success(), "{:?}", result.error_message());
        assert_eq!(result.files_downloaded().len(), 1);
        assert!(result.files_downloaded()[0].starts_with("1LargeFileIdX_row5_Type_2."));
    }

    #[test]
    fn test_exhausted_rate_limit_skips_request() {
        let dir = tempfile::tempdir().unwrap();
        let base = serve(vec![response(
            "200 OK",
            &[("Content-Type", "application/pdf")],
            b"%PDF-1.4 body",
        )]);
        let limiter = RateLimiter::new(
            "drive",
            rowtrack_core::ServiceRateLimit {
                rate_per_second: 0.001,
                burst: 1,
            },
            Duration::from_millis(50),
        );
        let downloader = downloader(&base, dir.path()).with_rate_limiter(Arc::new(limiter));

        let first = downloader.download("https://drive.google.com/file/d/1FileIdAbcdef/view", &ctx());
        assert!(first.success(), "{:?}", first.error_message());

        let second = downloader.download("https://drive.google.com/file/d/1OtherFileIdX/view", &ctx());
        assert!(!second.success());
        assert!(!second.permanent_failure());
        assert!(second.error_message().unwrap().contains("Rate limit"));
    }

    #[test]
    fn test_not_found_is_permanent() {
        let dir = tempfile::tempdir().unwrap();
        let base = serve(vec![response("404 Not Found", &[], b"")]);
        let result = downloader(&base, dir.path())
            .download("https://drive.google.com/file/d/1MissingFileX/view", &ctx());
        assert!(!result.success());
        assert!(result.permanent_failure());
    }

    #[test]
    fn test_login_page_is_permanent_and_sanitized() {
        let dir = tempfile::tempdir().unwrap();
        let page = b"<html><head><title>Sign in - Google Accounts</title><script>window.WIZ = {}</script></head></html>";
        let base = serve(vec![response("200 OK", &[("Content-Type", "text/html")], page)]);
        let result = downloader(&base, dir.path())
            .download("https://drive.google.com/file/d/1PrivateFileX/view", &ctx());
        assert!(result.permanent_failure());
        let message = result.error_message().unwrap();
        assert!(!message.contains('<'));
        assert!(!message.contains("window."));
    }
}
