use std::path::PathBuf;

use clap::Parser;

/// Matrix application service bridging Instagram accounts into rooms
#[derive(Parser, Debug)]
#[command(name = "matrix-bridge-instagram")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, env = "CONFIG_PATH")]
    pub config: Option<PathBuf>,

    /// Write the appservice registration file to this path and exit
    #[arg(short = 'r', long)]
    pub generate_registration: Option<PathBuf>,
}
