//! CLI argument parsing using clap

use clap::{Parser, Subcommand};

/// vadev - virtual audio device streaming engine
///
/// Host-side exerciser: create a device, drive its streams, and poll the
/// shared parameter block.
#[derive(Parser, Debug)]
#[command(name = "vadev")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Configuration file (default: vadev.toml next to the executable)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Verbose output (can be repeated for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode - only show errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Log output to file
    #[arg(long, global = true)]
    pub log: Option<String>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show the device configuration and supported formats
    Info,

    /// Create a device, start its streams, and poll positions until Ctrl+C
    Run {
        /// Requested stream buffer size in KiB
        #[arg(short, long, default_value = "64")]
        buffer: usize,

        /// Polling interval in milliseconds
        #[arg(short, long, default_value = "250")]
        interval: u64,

        /// Also drive a capture stream alongside the render stream
        #[arg(long)]
        capture: bool,
    },

    /// Map the shared parameter block and dump every field
    Inspect,
}

impl Args {
    /// Get the log level based on verbose/quiet flags
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else {
            match self.verbose {
                0 => tracing::Level::INFO,
                1 => tracing::Level::DEBUG,
                _ => tracing::Level::TRACE,
            }
        }
    }
}

impl Default for Command {
    fn default() -> Self {
        Command::Info
    }
}
