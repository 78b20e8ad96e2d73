//! `rowtrack` entry point.

use std::process::ExitCode;

use clap::Parser;
use rowtrack_cli::{Cli, CliContext, Commands, exit_code_for, handlers, init_logging};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::from(exit_code_for(&err))
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let ctx = CliContext::from_cli(&cli)?;
    match cli.command {
        Commands::Download(args) => handlers::download::execute(&ctx, &args).await,
        Commands::Status { json } => handlers::status::execute(&ctx, json),
        Commands::EnsureColumns => handlers::maintenance::ensure_columns(&ctx),
        Commands::MigrateMappings => handlers::maintenance::migrate_mappings(&ctx),
    }
}
