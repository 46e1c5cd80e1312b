//! ACB CLI Binary
//!
//! Command-line administration for the agent context broker.

use acb::config::ConfigLoader;
use acb::logging::init_logging;
use acb::tooling::cli::{Cli, CliContext};
use clap::Parser;
use std::process;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = init_logging(Some(&cli.logging_config(&config.logging))) {
        eprintln!("Warning: {}", e);
    }

    let context = match CliContext::with_config(config) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("Error opening broker storage: {}", e);
            process::exit(1);
        }
    };

    match context.execute(&cli.command).await {
        Ok(output) => {
            println!("{}", output);
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}
