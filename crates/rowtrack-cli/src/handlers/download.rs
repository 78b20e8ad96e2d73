//! `rowtrack download`
//!
//! Builds the pipeline from the resolved settings, ties Ctrl-C to a
//! cancellation token, and prints the run summary.

use anyhow::Result;
use rowtrack_core::Settings;
use rowtrack_pipeline::{PipelineOptions, RunSummary, pipeline_from_settings};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::bootstrap::CliContext;
use crate::commands::DownloadArgs;
use crate::error::CliError;
use crate::presentation::{TerminalProgress, print_plan, print_run_summary};

/// Settings and options for one invocation.
fn resolve(base: &Settings, args: &DownloadArgs) -> Result<(Settings, PipelineOptions), CliError> {
    let mut settings = base.clone();
    if let Some(max_videos) = args.max_videos {
        if max_videos == 0 {
            return Err(CliError::Arguments("--max-videos must be at least 1".into()));
        }
        settings.downloads.max_videos = Some(max_videos);
    }
    let options = PipelineOptions {
        filter: args.kind.into(),
        row_id: args.row_id.clone(),
        include_failed: args.include_failed,
        retry_attempts: settings.retry.max_attempts,
        max_rows: args.max_rows,
        dry_run: args.dry_run,
    };
    Ok((settings, options))
}

pub async fn execute(ctx: &CliContext, args: &DownloadArgs) -> Result<()> {
    let (settings, options) = resolve(&ctx.settings, args)?;

    if options.dry_run {
        let pipeline = pipeline_from_settings(&settings, Box::new(TerminalProgress::hidden()));
        let summary = pipeline
            .run(options, CancellationToken::new())
            .await
            .map_err(CliError::from)?;
        print_plan(&summary.planned);
        return Ok(());
    }

    let progress = TerminalProgress::new(0);
    let pipeline = pipeline_from_settings(&settings, Box::new(progress.clone()));
    let total = tokio::task::block_in_place(|| pipeline.plan(&options)).map_or(0, |planned| planned.len());
    progress.set_total(total as u64);

    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, letting running downloads record their outcomes");
                cancel.cancel();
            }
        })
    };

    let result = pipeline.run(options, cancel).await;
    watcher.abort();
    progress.finish();
    let summary = result.map_err(CliError::from)?;

    print_run_summary(&summary);
    check_summary(&summary, &settings)?;
    Ok(())
}

/// Failed downloads are recorded outcomes, not command failures. The command
/// fails when it was interrupted or an outcome could not be written back.
fn check_summary(summary: &RunSummary, settings: &Settings) -> Result<(), CliError> {
    if summary.interrupted {
        return Err(CliError::Interrupted);
    }
    if summary.persist_failures > 0 {
        return Err(CliError::Failed(format!(
            "{} outcome(s) could not be written to {}",
            summary.persist_failures,
            settings.paths.output_csv.display()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::KindArg;
    use rowtrack_core::{DownloadKind, KindFilter};

    fn args() -> DownloadArgs {
        DownloadArgs {
            kind: KindArg::Both,
            row_id: None,
            all: false,
            max_videos: None,
            max_rows: None,
            dry_run: false,
            include_failed: false,
        }
    }

    #[test]
    fn test_resolve_applies_flags() {
        let mut args = args();
        args.kind = KindArg::Youtube;
        args.max_videos = Some(4);
        args.row_id = Some("7".into());
        args.include_failed = true;
        let (settings, options) = resolve(&Settings::with_defaults(), &args).unwrap();
        assert_eq!(settings.downloads.max_videos, Some(4));
        assert_eq!(options.filter, KindFilter::Only(DownloadKind::Youtube));
        assert_eq!(options.row_id.as_deref(), Some("7"));
        assert!(options.include_failed);
        assert_eq!(options.retry_attempts, settings.retry.max_attempts);
    }

    #[test]
    fn test_zero_max_videos_is_rejected() {
        let mut args = args();
        args.max_videos = Some(0);
        let err = resolve(&Settings::with_defaults(), &args).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_interrupted_run_exits_130() {
        let summary = RunSummary {
            interrupted: true,
            ..RunSummary::default()
        };
        let err = check_summary(&summary, &Settings::with_defaults()).unwrap_err();
        assert_eq!(err.exit_code(), 130);
    }

    #[test]
    fn test_failed_downloads_are_not_a_command_failure() {
        let summary = RunSummary {
            attempted: 2,
            succeeded: 1,
            failed: 1,
            permanent: 1,
            ..RunSummary::default()
        };
        assert!(check_summary(&summary, &Settings::with_defaults()).is_ok());

        let unrecorded = RunSummary {
            persist_failures: 1,
            ..summary
        };
        assert_eq!(check_summary(&unrecorded, &Settings::with_defaults()).unwrap_err().exit_code(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_dry_run_leaves_csv_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("output.csv");
        let original = "row_id,name,processed,youtube_playlist,youtube_status\n1,Alice,yes,https://youtu.be/dQw4w9WgXcQ,\n";
        std::fs::write(&csv, original).unwrap();
        let mut settings = Settings::with_defaults();
        settings.paths.output_csv = csv.clone();
        settings.paths.downloads_dir = dir.path().join("downloads");
        let ctx = CliContext { settings };

        let mut args = args();
        args.dry_run = true;
        execute(&ctx, &args).await.unwrap();

        assert_eq!(std::fs::read_to_string(&csv).unwrap(), original);
        assert!(!dir.path().join("downloads").exists());
    }
}
