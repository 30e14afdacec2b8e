//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// pisc - GPS clock sync and sensor control plane
#[derive(Parser, Debug)]
#[command(
    name = "pisc",
    author,
    version,
    about = "GPS clock sync and sensor control plane",
    long_about = "Distributes GPS time, position and orientation from a reference node to \n\
                  sensor nodes over UDP, synchronizing their clocks with round-trip \n\
                  compensation, and runs each node's sensors with bounded shutdown."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "PISC_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "PISC_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    /// Prometheus metrics port (0 = disabled)
    #[arg(long, default_value = "0", global = true, env = "PISC_METRICS_PORT")]
    pub metrics_port: u16,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the reference node (time source and subscription server)
    Server(ServerArgs),

    /// Run a sensor node
    Client(ClientArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),

    /// Display configuration information
    Info(InfoArgs),
}

/// Arguments for the `server` command
#[derive(Parser, Debug, Clone)]
pub struct ServerArgs {
    /// Path to configuration file (TOML or JSON)
    #[arg(short, long, default_value = "field.toml", env = "PISC_CONFIG")]
    pub config: PathBuf,

    /// Override the bind address
    #[arg(long, env = "PISC_SERVER_BIND")]
    pub host: Option<String>,

    /// Override the UDP subscription port
    #[arg(long, env = "PISC_SERVER_PORT")]
    pub port: Option<u16>,

    /// Override the TCP stream listener port
    #[arg(long, env = "PISC_STREAM_PORT")]
    pub stream_port: Option<u16>,

    /// Do not publish the local clock as time
    #[arg(long)]
    pub no_feed: bool,
}

/// Arguments for the `client` command
#[derive(Parser, Debug, Clone)]
pub struct ClientArgs {
    /// Path to configuration file (TOML or JSON)
    #[arg(short, long, default_value = "field.toml", env = "PISC_CONFIG")]
    pub config: PathBuf,

    /// Override the server host
    #[arg(long, env = "PISC_SERVER_HOST")]
    pub server_host: Option<String>,

    /// Override the server UDP port
    #[arg(long, env = "PISC_SERVER_PORT")]
    pub server_port: Option<u16>,

    /// Subscribe without the sync handshake
    #[arg(long)]
    pub no_sync: bool,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "field.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "field.toml")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Show per-sensor settings
    #[arg(long)]
    pub sensors: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

impl From<LogFormat> for observability::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => Self::Json,
            LogFormat::Pretty => Self::Pretty,
            LogFormat::Compact => Self::Compact,
        }
    }
}
