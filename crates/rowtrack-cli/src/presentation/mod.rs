//! Terminal output helpers.
//!
//! Format-only: everything here takes finished values and prints them.

pub mod progress;
pub mod summary;

pub use progress::TerminalProgress;
pub use summary::{print_plan, print_run_summary, print_status};

/// Print a horizontal rule of the given width.
pub fn print_separator(width: usize) {
    println!("{}", "-".repeat(width));
}

/// Truncate to at most `max_len` characters, marking the cut with `...`.
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
    format!("{kept}...")
}
