//! CLI interface for Contrail

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Polyphonic sonification of live telemetry
#[derive(Parser)]
#[command(name = "contrail")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Play simulated flight traffic in real time
    Play {
        /// Configuration file path (defaults apply when missing)
        #[arg(short, long, default_value = "contrail.yaml")]
        config: PathBuf,

        /// Stop after this many seconds instead of waiting for Ctrl-C
        #[arg(short, long)]
        duration: Option<u64>,

        /// Write one WAV stem per aircraft into the configured directory
        #[arg(long)]
        record: bool,
    },

    /// Render simulated traffic offline to a WAV file
    Render {
        /// Configuration file path (defaults apply when missing)
        #[arg(short, long, default_value = "contrail.yaml")]
        config: PathBuf,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        /// Duration in seconds
        #[arg(short, long, default_value = "60")]
        duration: u64,

        /// Also write per-aircraft stems into this directory
        #[arg(long)]
        stems: Option<PathBuf>,
    },

    /// List available audio output devices
    Devices,

    /// Validate a configuration file
    Check {
        /// Configuration file path
        #[arg(short, long, default_value = "contrail.yaml")]
        config: PathBuf,
    },

    /// Generate an example configuration file
    Init,
}
