//! `rowtrack status`

use anyhow::Result;

use crate::bootstrap::CliContext;
use crate::error::CliError;
use crate::presentation::print_status;

pub fn execute(ctx: &CliContext, json: bool) -> Result<()> {
    let summary = ctx
        .csv_manager()
        .get_download_status_summary()
        .map_err(CliError::from)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_status(&summary);
    }
    Ok(())
}
