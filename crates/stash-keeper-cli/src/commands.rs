use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "stash-keeper")]
#[command(about = "Archive finished downloads exactly once", long_about = None)]
pub struct Cli {
    /// Configuration file to use instead of ./Config.toml
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Watch the monitored directory until interrupted
    Run,
    /// Scan, wait out the stability threshold, archive what settled and exit
    Once,
    /// Print the effective configuration as TOML
    PrintConfig,
    /// List the extension presets
    Presets {
        /// Write the built-in presets to the presets file
        #[arg(long)]
        write: bool,
    },
    /// Show archived records, newest first
    Records {
        /// Only records for this relative path (full history, oldest first)
        #[arg(long)]
        path: Option<String>,
        /// Maximum number of records to show
        #[arg(long, default_value_t = 20)]
        limit: u64,
    },
    /// Summarize the backup store
    Status,
}
