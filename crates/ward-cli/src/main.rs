mod admin_commands;
mod bootstrap_helpers;
mod cli_args;

use anyhow::Result;
use clap::Parser;
use ward_runtime::default_config_path;

use crate::admin_commands::{execute_ward_command, resolve_ward_config};
use crate::bootstrap_helpers::init_tracing;
use crate::cli_args::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let config = resolve_ward_config(&config_path, cli.database.as_deref())?;
    init_tracing(&config.log_filter);
    tracing::debug!(
        config = %config_path.display(),
        database = %config.database_path.display(),
        "ward config resolved"
    );
    let report = execute_ward_command(&cli.command, &config_path, config).await?;
    println!("{report}");
    Ok(())
}
