use std::path::PathBuf;

use clap::{Parser, Subcommand};
use ward_core::PrincipalId;

fn parse_principal_id(value: &str) -> Result<PrincipalId, String> {
    value
        .parse::<PrincipalId>()
        .map_err(|error| format!("failed to parse principal uuid: {error}"))
}

#[derive(Debug, Parser)]
#[command(
    name = "ward",
    about = "Administer Ward principal permissions and display formats",
    version
)]
/// Public struct `Cli` used across Ward components.
pub struct Cli {
    #[arg(
        long,
        env = "WARD_CONFIG",
        help = "Path to ward.json. Defaults to .ward/ward.json; a missing file means defaults."
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        env = "WARD_DATABASE",
        help = "SQLite database path. Overrides database_path from the config file."
    )]
    pub database: Option<PathBuf>,

    #[command(subcommand)]
    pub command: WardCommand,
}

#[derive(Debug, Subcommand)]
/// Enumerates supported `WardCommand` values.
pub enum WardCommand {
    /// Write a default config file and create the database.
    Init {
        #[arg(long, help = "Overwrite an existing config file.")]
        force: bool,
    },
    /// Inspect or edit one principal.
    User {
        #[arg(value_parser = parse_principal_id)]
        principal: PrincipalId,
        #[command(subcommand)]
        action: UserAction,
    },
    /// Reload every cached principal from the database.
    Reload,
}

#[derive(Debug, Subcommand)]
/// Enumerates supported `UserAction` values.
pub enum UserAction {
    /// Grant a node, or persist a deny with a leading `-`.
    Add {
        #[arg(allow_hyphen_values = true)]
        node: String,
    },
    /// Remove a stored entry.
    Remove {
        #[arg(allow_hyphen_values = true)]
        node: String,
    },
    /// List stored entries.
    List,
    /// Show format and entry count.
    Info {
        #[arg(long, help = "Print the principal as JSON.")]
        json: bool,
    },
    /// Set the prefix; no value clears it.
    Prefix {
        #[arg(num_args = 0.., trailing_var_arg = true, allow_hyphen_values = true)]
        value: Vec<String>,
    },
    /// Set the suffix; no value clears it.
    Suffix {
        #[arg(num_args = 0.., trailing_var_arg = true, allow_hyphen_values = true)]
        value: Vec<String>,
    },
}
