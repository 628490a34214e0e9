//! Mount a read-only shadow of a slow directory tree, caching file contents on a fast one.
use std::path::PathBuf;

use clap::Parser;
use tracing::{debug, error};

mod app_config;
mod daemon;
mod trc;

use crate::app_config::Config;
use crate::trc::Trc;

#[derive(Parser)]
#[command(
    version,
    about = "Read-only shadow filesystem that migrates files to a cache tier on first read."
)]
struct Args {
    #[arg(
        short,
        long,
        value_parser,
        help = "Optional path to a tier-fs config TOML."
    )]
    config_path: Option<PathBuf>,

    /// Origin tree to shadow. Overrides the config file.
    #[arg(long)]
    origin: Option<PathBuf>,

    /// Cache directory. Overrides the config file. Emptied on start.
    #[arg(long)]
    cache: Option<PathBuf>,

    /// Where to mount the shadow. Overrides the config file.
    #[arg(short, long)]
    mount_point: Option<PathBuf>,
}

impl Args {
    fn apply_overrides(self, mut config: Config) -> Config {
        if let Some(origin) = self.origin {
            config.origin = origin;
        }
        if let Some(cache) = self.cache {
            config.cache.path = cache;
        }
        if let Some(mount_point) = self.mount_point {
            config.mount_point = mount_point;
        }
        config
    }
}

/// Main entry point for the application.
fn main() {
    let args = Args::parse();

    // Errors use eprintln until tracing is initialized.
    let config = Config::load(args.config_path.as_deref()).unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {e}");
        std::process::exit(1);
    });
    let config = args.apply_overrides(config);
    if let Err(error_messages) = config.validate() {
        eprintln!("Configuration is invalid.");
        for msg in &error_messages {
            eprintln!(" - {msg}");
        }
        std::process::exit(1);
    }

    if let Err(e) = Trc::default().init() {
        eprintln!(
            "Failed to initialize logging. Without logging, we can't provide any useful error \
             messages, so we have to exit: {e}"
        );
        std::process::exit(1);
    }

    debug!(config = ?config, "Starting tier-fs...");
    if let Err(e) = daemon::spawn(config) {
        error!("tier-fs failed: {e}");
        std::process::exit(1);
    }
}
