use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "segpipe")]
#[command(author, version, about = "Stream media segments into an external decoder")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Play the segments listed in a manifest
    Play {
        /// Manifest JSON produced by the resolver
        #[arg(required = true)]
        manifest: PathBuf,

        /// Item directory: reuse a recorded copy, or mirror and record into it
        #[arg(long)]
        item_dir: Option<PathBuf>,
    },

    /// Check that the external decoders are available
    CheckTools {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
