//! `rowtrack ensure-columns` and `rowtrack migrate-mappings`

use anyhow::Result;
use tracing::info;

use crate::bootstrap::CliContext;
use crate::error::CliError;

/// Add missing tracking columns, creating the CSV when it does not exist.
pub fn ensure_columns(ctx: &CliContext) -> Result<()> {
    let manager = ctx.csv_manager();
    if !manager.ensure_tracking_columns() {
        return Err(CliError::Failed(format!(
            "Could not add tracking columns to {}",
            manager.path().display()
        ))
        .into());
    }
    println!("Tracking columns present in {}", manager.path().display());
    Ok(())
}

pub fn migrate_mappings(ctx: &CliContext) -> Result<()> {
    let manager = ctx.csv_manager();
    let converted = manager.migrate_legacy_mappings().map_err(CliError::from)?;
    info!(converted, "Mapping migration finished");
    if converted == 0 {
        println!("No legacy mapping cells found.");
    } else {
        println!("Converted {converted} mapping cell(s) to JSON.");
    }
    Ok(())
}
