// CLI module for lazarus-sw
// Author: kelexine (https://github.com/kelexine)

use clap::Parser;
use std::path::PathBuf;

/// lazarus-sw - offline cache worker for the Lazarus notes app
#[derive(Parser, Debug, Default)]
#[command(name = "lazarus-sw", version, about, long_about = None)]
pub struct Args {
    /// Path to a TOML config file (default: ~/.lazarus-sw/config.toml)
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Cache version tag for this deployment; bump it whenever the asset list changes
    #[arg(long, env = "LAZARUS_SW_CACHE_VERSION")]
    pub cache_version: Option<String>,

    /// Origin of the application server to front
    #[arg(long)]
    pub upstream: Option<String>,

    /// Port to listen on
    #[arg(long, short = 'p')]
    pub port: Option<u16>,
}
