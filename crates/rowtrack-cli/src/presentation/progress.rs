//! Progress bar fed by processor events.

use indicatif::{ProgressBar, ProgressStyle};
use rowtrack_core::{ProcessorEvent, ProgressSink, TaskKind};

/// [`ProgressSink`] that drives an `indicatif` bar.
///
/// Every finished download advances the bar by one; warnings and pool
/// resizes are printed above it.
#[derive(Clone)]
pub struct TerminalProgress {
    bar: ProgressBar,
}

impl TerminalProgress {
    pub fn new(total: u64) -> Self {
        let bar = ProgressBar::new(total);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .map_or_else(|_| ProgressStyle::default_bar(), |s| s.progress_chars("█▓░"));
        bar.set_style(style);
        Self { bar }
    }

    /// Bar that never draws, for non-interactive runs.
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }

    pub fn set_total(&self, total: u64) {
        self.bar.set_length(total);
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }
}

impl ProgressSink for TerminalProgress {
    fn emit(&self, event: ProcessorEvent) {
        match event {
            ProcessorEvent::TaskStarted {
                task_id,
                kind: TaskKind::Download,
            } => self.bar.set_message(format!("downloading {task_id}")),
            ProcessorEvent::DownloadCompleted { task_id, .. } => {
                self.bar.inc(1);
                self.bar.set_message(format!("finished {task_id}"));
            }
            ProcessorEvent::DownloadFailed { task_id, error } => {
                self.bar.inc(1);
                self.bar.println(format!("✗ {task_id}: {error}"));
            }
            ProcessorEvent::PoolResized { from, to } => {
                self.bar.println(format!("Worker budget {from} -> {to}"));
            }
            ProcessorEvent::ResourceWarning {
                status,
                cpu_percent,
                memory_percent,
            } => self.bar.println(format!(
                "Resource {}: cpu {cpu_percent:.0}%, memory {memory_percent:.0}%",
                status.as_str()
            )),
            _ => {}
        }
    }

    fn clone_box(&self) -> Box<dyn ProgressSink> {
        Box::new(self.clone())
    }
}
