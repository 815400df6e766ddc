//! CLI definitions for readsel.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// readsel CLI.
#[derive(Parser)]
#[command(name = "readsel")]
#[command(about = "Select-all controls for the expanded answers of a live reading page")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path (default: ~/.readsel/config.toml)
    #[arg(short, long, global = true, env = "READSEL_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Attach to the browser and augment the page (default)
    Run(RunArgs),

    /// Load and validate the configuration
    CheckConfig,
}

#[derive(Args, Default, Debug, PartialEq)]
pub(crate) struct RunArgs {
    /// Browser debugging endpoint (overrides browser.endpoint)
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Attach to the first page whose URL contains this fragment
    /// (overrides browser.page_url)
    #[arg(long, conflicts_with = "open")]
    pub page: Option<String>,

    /// Open this URL in a new tab instead of attaching to an existing one
    #[arg(long)]
    pub open: Option<String>,
}
