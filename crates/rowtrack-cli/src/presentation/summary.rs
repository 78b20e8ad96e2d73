//! Tables and summaries printed after a command finishes.

use rowtrack_csv::StatusSummary;
use rowtrack_pipeline::{PlannedDownload, RunSummary};

use super::{print_separator, truncate_string};

pub fn print_plan(planned: &[PlannedDownload]) {
    if planned.is_empty() {
        println!("Nothing to download.");
        return;
    }
    println!("Would download {} item(s):\n", planned.len());
    println!(
        "{:<10} {:<24} {:<8} {:<9} {:<5} URLs",
        "Row", "Name", "Kind", "Attempts", "Links"
    );
    print_separator(90);
    for item in planned {
        println!(
            "{:<10} {:<24} {:<8} {:<9} {:<5} {}",
            truncate_string(&item.row_id, 10),
            truncate_string(&item.name, 23),
            item.kind.as_str(),
            item.attempts,
            item.urls.len(),
            truncate_string(&item.urls.join(" | "), 40),
        );
    }
}

pub fn print_run_summary(summary: &RunSummary) {
    println!();
    println!("Download summary");
    print_separator(32);
    println!("{:<22} {}", "Attempted", summary.attempted);
    println!("{:<22} {}", "Succeeded", summary.succeeded);
    println!("{:<22} {}", "Failed", summary.failed);
    println!("{:<22} {}", "  of which permanent", summary.permanent);
    println!("{:<22} {}", "Files uploaded", summary.uploaded_files);
    if summary.persist_failures > 0 {
        println!("{:<22} {}", "Not recorded in CSV", summary.persist_failures);
    }
    if summary.unfinished > 0 {
        println!("{:<22} {}", "Unfinished", summary.unfinished);
    }
    if summary.interrupted {
        println!("Run interrupted before all rows were processed.");
    }
}

pub fn print_status(summary: &StatusSummary) {
    println!("{} row(s)\n", summary.total_rows);
    println!(
        "{:<10} {:>9} {:>10} {:>8} {:>9} {:>10}",
        "Kind", "Pending", "Completed", "Failed", "Streamed", "Permanent"
    );
    print_separator(61);
    for (kind, counts) in &summary.by_kind {
        println!(
            "{:<10} {:>9} {:>10} {:>8} {:>9} {:>10}",
            kind, counts.pending, counts.completed, counts.failed, counts.streamed, counts.permanent
        );
    }
}
