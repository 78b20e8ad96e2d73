//! Settings loading, validation and dotted lookups.

use rowtrack::domain::{SettingsError, validate_settings};
use rowtrack::{CsvManager, ProcessorConfig, Settings};
use serde_json::json;

#[test]
fn test_file_overrides_defaults_and_flows_into_components() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rowtrack.toml");
    std::fs::write(
        &path,
        r#"
[paths]
output_csv = "data/rows.csv"

[mass_download]
max_concurrent_channels = 6
max_concurrent_downloads = 2

[resource_limits]
max_cpu_percent = 70.0
"#,
    )
    .unwrap();

    let settings = Settings::load(&path).unwrap();
    assert_eq!(settings.get("mass_download.max_concurrent_channels"), Some(json!(6)));
    assert_eq!(settings.get("resource_limits.max_cpu_percent"), Some(json!(70.0)));
    assert_eq!(settings.get("csv.lock_timeout_seconds"), Some(json!(30)));
    assert_eq!(settings.get("no.such.key"), None);

    let config = ProcessorConfig::from_settings(&settings);
    assert_eq!(config.max_concurrent_channels, 6);
    assert_eq!(config.max_concurrent_downloads, 2);

    let manager = CsvManager::from_settings(&settings);
    assert!(manager.path().ends_with("data/rows.csv"));
    assert!(manager.config().backup_dir.ends_with("data/backups/output"));
}

#[test]
fn test_out_of_range_values_are_rejected() {
    let mut settings = Settings::with_defaults();
    settings.resource_limits.max_cpu_percent = 140.0;
    assert!(matches!(
        validate_settings(&settings),
        Err(SettingsError::PercentOutOfRange { .. })
    ));

    let mut settings = Settings::with_defaults();
    settings.mass_download.max_concurrent_downloads = 0;
    assert!(matches!(validate_settings(&settings), Err(SettingsError::ZeroLimit(_))));

    let mut settings = Settings::with_defaults();
    settings.resource_limits.min_concurrent = 9;
    assert!(matches!(validate_settings(&settings), Err(SettingsError::MinAboveMax { .. })));
}
