//! Settings domain types and validation.
//!
//! A [`Settings`] value is built once at process start and handed to each
//! component's constructor. There is no global configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::retry::BackoffStrategy;
use crate::status::DownloadKind;

/// Environment variable overriding `paths.output_csv`.
pub const ENV_CSV_PATH: &str = "ROWTRACK_CSV_PATH";
/// Environment variable overriding `paths.downloads_dir`.
pub const ENV_DOWNLOADS_DIR: &str = "ROWTRACK_DOWNLOADS_DIR";

/// Application settings, grouped by concern.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub paths: PathSettings,
    pub csv: CsvSettings,
    pub mass_download: MassDownloadSettings,
    pub resource_limits: ResourceLimitSettings,
    pub retry: RetrySettings,
    pub downloads: DownloadSettings,
    pub rate_limits: RateLimitSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathSettings {
    pub output_csv: PathBuf,
    pub downloads_dir: PathBuf,
    /// Relative paths resolve against the CSV's directory.
    pub backup_dir: PathBuf,
    pub storage_dir: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            output_csv: PathBuf::from("outputs/output.csv"),
            downloads_dir: PathBuf::from("downloads"),
            backup_dir: PathBuf::from("backups/output"),
            storage_dir: PathBuf::from("storage"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CsvSettings {
    pub auto_backup: bool,
    pub use_file_lock: bool,
    pub lock_timeout_seconds: u64,
    pub lock_check_interval_ms: u64,
    pub max_field_length: usize,
    /// Number of backups kept per CSV; 0 keeps all of them.
    pub backup_retention: usize,
}

impl Default for CsvSettings {
    fn default() -> Self {
        Self {
            auto_backup: true,
            use_file_lock: true,
            lock_timeout_seconds: 30,
            lock_check_interval_ms: 100,
            max_field_length: 200,
            backup_retention: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MassDownloadSettings {
    pub max_concurrent_channels: usize,
    pub max_concurrent_downloads: usize,
    pub max_queue_size: usize,
    pub shutdown_grace_seconds: u64,
    pub task_timeout_seconds: u64,
}

impl Default for MassDownloadSettings {
    fn default() -> Self {
        Self {
            max_concurrent_channels: 3,
            max_concurrent_downloads: 3,
            max_queue_size: 100,
            shutdown_grace_seconds: 30,
            task_timeout_seconds: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ResourceLimitSettings {
    pub max_cpu_percent: f64,
    pub max_memory_percent: f64,
    pub warning_percent: f64,
    pub critical_percent: f64,
    pub check_interval_seconds: u64,
    pub throttle_factor: f64,
    pub min_concurrent: usize,
    pub history_size: usize,
    /// Number of most recent samples that must all be available, and whose
    /// average must exceed a limit, before throttling kicks in.
    pub throttle_window: usize,
}

impl Default for ResourceLimitSettings {
    fn default() -> Self {
        Self {
            max_cpu_percent: 80.0,
            max_memory_percent: 80.0,
            warning_percent: 75.0,
            critical_percent: 90.0,
            check_interval_seconds: 5,
            throttle_factor: 0.5,
            min_concurrent: 1,
            history_size: 100,
            throttle_window: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetrySettings {
    pub strategy: BackoffStrategy,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            strategy: BackoffStrategy::Exponential,
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 60_000,
            jitter: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DownloadSettings {
    pub ytdlp_path: String,
    pub youtube_format: String,
    pub youtube_resolution: String,
    pub subprocess_timeout_seconds: u64,
    pub http_timeout_seconds: u64,
    pub max_videos: Option<usize>,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            ytdlp_path: "yt-dlp".to_string(),
            youtube_format: "mp4".to_string(),
            youtube_resolution: "720".to_string(),
            subprocess_timeout_seconds: 1800,
            http_timeout_seconds: 30,
            max_videos: None,
        }
    }
}

/// Token-bucket parameters for one remote service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServiceRateLimit {
    /// Sustained requests per second.
    pub rate_per_second: f64,
    /// Requests allowed back to back from a full bucket.
    pub burst: u32,
}

impl Default for ServiceRateLimit {
    fn default() -> Self {
        Self {
            rate_per_second: 2.0,
            burst: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateLimitSettings {
    pub youtube: ServiceRateLimit,
    pub drive: ServiceRateLimit,
    /// Longest a request waits for a token before giving up.
    pub wait_timeout_seconds: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            youtube: ServiceRateLimit::default(),
            drive: ServiceRateLimit::default(),
            wait_timeout_seconds: 60,
        }
    }
}

impl RateLimitSettings {
    pub const fn for_kind(&self, kind: DownloadKind) -> ServiceRateLimit {
        match kind {
            DownloadKind::Youtube => self.youtube,
            DownloadKind::Drive => self.drive,
        }
    }
}

impl Settings {
    /// Create settings with sensible defaults.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::default()
    }

    /// Load a TOML file over the defaults. Missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let text = std::fs::read_to_string(path).map_err(|e| SettingsError::Io {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let settings: Self = toml::from_str(&text).map_err(|e| SettingsError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        validate_settings(&settings)?;
        Ok(settings)
    }

    /// Apply `.env` and process environment overrides.
    ///
    /// A missing `.env` file is not an error.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        let _ = dotenvy::dotenv();
        if let Ok(csv) = std::env::var(ENV_CSV_PATH) {
            if !csv.trim().is_empty() {
                self.paths.output_csv = PathBuf::from(csv);
            }
        }
        if let Ok(dir) = std::env::var(ENV_DOWNLOADS_DIR) {
            if !dir.trim().is_empty() {
                self.paths.downloads_dir = PathBuf::from(dir);
            }
        }
        self
    }

    /// Dotted-path lookup, e.g. `resource_limits.max_cpu_percent`.
    pub fn get(&self, dotted_path: &str) -> Option<serde_json::Value> {
        let mut current = serde_json::to_value(self).ok()?;
        for segment in dotted_path.split('.') {
            current = current.get_mut(segment)?.take();
        }
        Some(current)
    }

    /// Backup directory resolved against the CSV's directory.
    pub fn backup_dir(&self) -> PathBuf {
        if self.paths.backup_dir.is_absolute() {
            return self.paths.backup_dir.clone();
        }
        let base = self
            .paths
            .output_csv
            .parent()
            .map_or_else(PathBuf::new, Path::to_path_buf);
        base.join(&self.paths.backup_dir)
    }
}

/// Settings validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SettingsError {
    #[error("Failed to read settings file {path}: {message}")]
    Io { path: PathBuf, message: String },

    #[error("Failed to parse settings file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("{name} must be in (0, 100], got {value}")]
    PercentOutOfRange { name: &'static str, value: f64 },

    #[error("throttle_factor must be in (0, 1], got {0}")]
    ThrottleFactor(f64),

    #[error("{0} must be at least 1")]
    ZeroLimit(&'static str),

    #[error("min_concurrent ({min}) cannot exceed max_concurrent_channels ({max})")]
    MinAboveMax { min: usize, max: usize },

    #[error("warning_percent ({warning}) must not exceed critical_percent ({critical})")]
    ThresholdOrder { warning: f64, critical: f64 },

    #[error("rate_limits.{service}.rate_per_second must be positive, got {value}")]
    RateOutOfRange { service: &'static str, value: f64 },

    #[error("Output CSV path cannot be empty")]
    EmptyCsvPath,
}

/// Validate settings values.
pub fn validate_settings(settings: &Settings) -> Result<(), SettingsError> {
    let limits = &settings.resource_limits;
    for (name, value) in [
        ("max_cpu_percent", limits.max_cpu_percent),
        ("max_memory_percent", limits.max_memory_percent),
        ("warning_percent", limits.warning_percent),
        ("critical_percent", limits.critical_percent),
    ] {
        if !(value > 0.0 && value <= 100.0) {
            return Err(SettingsError::PercentOutOfRange { name, value });
        }
    }
    if limits.warning_percent > limits.critical_percent {
        return Err(SettingsError::ThresholdOrder {
            warning: limits.warning_percent,
            critical: limits.critical_percent,
        });
    }
    if !(limits.throttle_factor > 0.0 && limits.throttle_factor <= 1.0) {
        return Err(SettingsError::ThrottleFactor(limits.throttle_factor));
    }

    let mass = &settings.mass_download;
    for (name, value) in [
        ("max_concurrent_channels", mass.max_concurrent_channels),
        ("max_concurrent_downloads", mass.max_concurrent_downloads),
        ("max_queue_size", mass.max_queue_size),
        ("min_concurrent", limits.min_concurrent),
        ("history_size", limits.history_size),
        ("throttle_window", limits.throttle_window),
    ] {
        if value == 0 {
            return Err(SettingsError::ZeroLimit(name));
        }
    }
    if limits.check_interval_seconds == 0 {
        return Err(SettingsError::ZeroLimit("check_interval_seconds"));
    }
    if limits.min_concurrent > mass.max_concurrent_channels {
        return Err(SettingsError::MinAboveMax {
            min: limits.min_concurrent,
            max: mass.max_concurrent_channels,
        });
    }

    let rates = &settings.rate_limits;
    for (service, limit) in [("youtube", rates.youtube), ("drive", rates.drive)] {
        if !(limit.rate_per_second.is_finite() && limit.rate_per_second > 0.0) {
            return Err(SettingsError::RateOutOfRange {
                service,
                value: limit.rate_per_second,
            });
        }
        if limit.burst == 0 {
            return Err(SettingsError::ZeroLimit("rate_limits burst"));
        }
    }
    if rates.wait_timeout_seconds == 0 {
        return Err(SettingsError::ZeroLimit("rate_limits.wait_timeout_seconds"));
    }

    if settings.paths.output_csv.as_os_str().is_empty() {
        return Err(SettingsError::EmptyCsvPath);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_validate() {
        let settings = Settings::with_defaults();
        assert!(validate_settings(&settings).is_ok());
        assert_eq!(settings.mass_download.max_concurrent_channels, 3);
        assert!((settings.resource_limits.throttle_factor - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_dotted_lookup() {
        let settings = Settings::with_defaults();
        assert_eq!(
            settings.get("mass_download.max_concurrent_channels"),
            Some(serde_json::json!(3))
        );
        assert_eq!(
            settings.get("resource_limits.max_cpu_percent"),
            Some(serde_json::json!(80.0))
        );
        assert_eq!(settings.get("resource_limits.nope"), None);
    }

    #[test]
    fn test_validate_rejects_bad_percent() {
        let mut settings = Settings::with_defaults();
        settings.resource_limits.max_cpu_percent = 120.0;
        assert!(matches!(
            validate_settings(&settings),
            Err(SettingsError::PercentOutOfRange { name: "max_cpu_percent", .. })
        ));
    }

    #[test]
    fn test_validate_rejects_zero_downloads() {
        let mut settings = Settings::with_defaults();
        settings.mass_download.max_concurrent_downloads = 0;
        assert!(matches!(
            validate_settings(&settings),
            Err(SettingsError::ZeroLimit("max_concurrent_downloads"))
        ));
    }

    #[test]
    fn test_validate_min_above_max() {
        let mut settings = Settings::with_defaults();
        settings.resource_limits.min_concurrent = 5;
        assert!(matches!(
            validate_settings(&settings),
            Err(SettingsError::MinAboveMax { min: 5, max: 3 })
        ));
    }

    #[test]
    fn test_load_partial_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rowtrack.toml");
        std::fs::write(
            &path,
            "[mass_download]\nmax_concurrent_downloads = 2\n\n[retry]\nstrategy = \"fibonacci\"\n",
        )
        .unwrap();

        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.mass_download.max_concurrent_downloads, 2);
        assert_eq!(settings.mass_download.max_concurrent_channels, 3);
        assert_eq!(settings.retry.strategy, BackoffStrategy::Fibonacci);
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[resource_limits]\nthrottle_factor = 1.5\n").unwrap();
        assert!(matches!(Settings::load(&path), Err(SettingsError::ThrottleFactor(_))));
    }

    #[test]
    fn test_rate_limits_load_and_validate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rowtrack.toml");
        std::fs::write(&path, "[rate_limits.drive]\nrate_per_second = 0.5\nburst = 2\n").unwrap();
        let settings = Settings::load(&path).unwrap();
        assert_eq!(settings.rate_limits.for_kind(DownloadKind::Drive).burst, 2);
        assert_eq!(settings.rate_limits.for_kind(DownloadKind::Youtube), ServiceRateLimit::default());
        assert_eq!(settings.get("rate_limits.wait_timeout_seconds"), Some(serde_json::json!(60)));

        let mut bad = Settings::with_defaults();
        bad.rate_limits.youtube.rate_per_second = 0.0;
        assert!(matches!(
            validate_settings(&bad),
            Err(SettingsError::RateOutOfRange { service: "youtube", .. })
        ));
    }

    #[test]
    fn test_backup_dir_relative_to_csv() {
        let mut settings = Settings::with_defaults();
        settings.paths.output_csv = PathBuf::from("/data/outputs/output.csv");
        assert_eq!(settings.backup_dir(), PathBuf::from("/data/outputs/backups/output"));
    }
}
