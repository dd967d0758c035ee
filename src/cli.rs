use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::types::LogLevel;

#[derive(Parser, Debug)]
#[command(
    name = "zendesk-export-rs",
    about = "Export the Zendesk tickets of a list of clients to PDF",
    version
)]
pub struct Cli {
    /// JSON configuration file
    #[arg(short = 'c', long, global = true, env = "ZENDESK_EXPORT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (overrides the config file; RUST_LOG overrides both)
    #[arg(long, value_enum, global = true)]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Export every pending ticket (default)
    Export(ExportArgs),

    /// Show checkpoint and result counts
    Status {
        /// Also list every recorded failure
        #[arg(long)]
        failed: bool,
    },

    /// Delete the checkpoint so the next export starts over
    ResetState {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },

    /// Check that every exported PDF is still present and valid
    Verify,
}

#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportArgs {
    /// Ignore the saved checkpoint
    #[arg(long)]
    pub reset_checkpoint: bool,

    /// Run the browser without a window
    #[arg(long)]
    pub headless: bool,

    /// Disable progress bar
    #[arg(long)]
    pub no_progress_bar: bool,
}

impl Cli {
    /// The subcommand to run; `export` when none was given.
    pub fn effective_command(&self) -> Command {
        self.command
            .clone()
            .unwrap_or_else(|| Command::Export(ExportArgs::default()))
    }

    /// The config path, which every command needs.
    pub fn config_path(&self) -> anyhow::Result<&PathBuf> {
        self.config
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("No config file given (use --config or ZENDESK_EXPORT_CONFIG)"))
    }
}
