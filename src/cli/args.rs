//! CLI argument definitions using clap
//!
//! Commands:
//! - sagad init --config <path>
//! - sagad serve --config <path> [--port <port>] [--data-dir <dir>]

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// sagad - a compensation-based Long-Running Action coordinator
#[derive(Parser, Debug)]
#[command(name = "sagad")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Write a default configuration file
    Init {
        /// Path to configuration file
        #[arg(long, default_value = "./sagad.json")]
        config: PathBuf,
    },

    /// Run the coordinator
    Serve {
        /// Path to configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Override the configured HTTP port
        #[arg(long)]
        port: Option<u16>,

        /// Override the store with a file backend rooted here
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
}
