//! regcache CLI entry point.

use anyhow::{Context, Result};
use clap::Parser;

use regcache::Config;

mod cli;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let config =
        Config::load_with(args.config.as_deref()).context("Failed to load configuration")?;
    regcache::logging::init_logging(&config.logging);

    cli::dispatch(args.command, &config).await
}
