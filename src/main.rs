//! `sharefsd` binary entry point: parse CLI overrides, load config,
//! set up logging, run the server until a protocol engine exits.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use sharefs::config::{Cli, Config};

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path).unwrap_or_else(|e| {
            eprintln!("failed to load {}: {e}, using defaults", path.display());
            Config::default()
        }),
        None => Config::default(),
    };
    config.apply_cli(&cli);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    sharefs::server::run(config).await
}
