//! Command line arguments.

use {clap::Parser, std::path::PathBuf};

/// Runs one underwriter instance per configured destination chain.
#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, env = "UNDERWRITER_CONFIG")]
    pub config: PathBuf,

    /// Log filter directive, e.g. `info` or `underwriter=debug`.
    #[arg(long, env = "UNDERWRITER_LOG", default_value = "info")]
    pub log: String,
}
